use std::io::Write;

use serde_json::{json, Map};

use super::{WriteError, Writer};
use crate::lightcurve::LightCurve;

/// `{"meta": {...}, "data": {"column": [values...]}}`, in metadata and
/// column order.
pub struct JsonWriter;

impl Writer for JsonWriter {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn write(&self, lightcurve: &LightCurve, out: &mut dyn Write) -> Result<(), WriteError> {
        let mut meta = Map::with_capacity(lightcurve.meta.len());
        for (key, value) in lightcurve.meta.iter() {
            meta.insert(key.to_string(), serde_json::to_value(value)?);
        }
        let mut data = Map::with_capacity(lightcurve.data.n_cols());
        for (name, column) in lightcurve.data.columns() {
            data.insert(name.to_string(), serde_json::to_value(column)?);
        }
        let document = json!({ "meta": meta, "data": data });
        serde_json::to_writer_pretty(&mut *out, &document)?;
        writeln!(out)?;
        Ok(())
    }
}
