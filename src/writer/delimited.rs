use std::io::Write;

use super::{render_text, WriteError, Writer};
use crate::lightcurve::LightCurve;

/// Delimited text: `#key: value` metadata lines, a header line of column
/// names, then one line per row.
pub struct DelimitedWriter {
    delimiter: char,
    marker: char,
    extension: &'static str,
}

impl DelimitedWriter {
    pub fn ascii() -> Self {
        DelimitedWriter {
            delimiter: ' ',
            marker: '#',
            extension: "dat",
        }
    }

    pub fn csv() -> Self {
        DelimitedWriter {
            delimiter: ',',
            marker: '#',
            extension: "csv",
        }
    }

    fn join<I, S>(&self, items: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut line = String::new();
        for (idx, item) in items.into_iter().enumerate() {
            if idx > 0 {
                line.push(self.delimiter);
            }
            line.push_str(item.as_ref());
        }
        line
    }
}

impl Writer for DelimitedWriter {
    fn extension(&self) -> &'static str {
        self.extension
    }

    fn write(&self, lightcurve: &LightCurve, out: &mut dyn Write) -> Result<(), WriteError> {
        for (key, value) in lightcurve.meta.iter() {
            writeln!(out, "{}{}: {}", self.marker, key, render_text(value))?;
        }
        let data = &lightcurve.data;
        writeln!(out, "{}", self.join(data.names()))?;
        for idx in 0..data.n_rows() {
            writeln!(out, "{}", self.join(data.row(idx).map(render_text)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightcurve::Table;
    use dessn_db::{Record, Value};

    fn lightcurve() -> LightCurve {
        let mut data = Table::new(["Date", "Band", "Flux"]);
        data.push_row(vec![Value::Float(56001.25), "desg".into(), Value::Float(3.5)])
            .unwrap();
        data.push_row(vec![Value::Float(56002.0), "desr".into(), Value::Null])
            .unwrap();
        let meta = Record::new()
            .with("snid", 42_i64)
            .with("host_specz", Value::Null);
        LightCurve::new(42, meta, data)
    }

    fn render(writer: &DelimitedWriter) -> String {
        let mut buf = Vec::new();
        writer.write(&lightcurve(), &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_ascii() {
        assert_eq!(
            render(&DelimitedWriter::ascii()),
            "#snid: 42\n#host_specz: NULL\nDate Band Flux\n56001.25 desg 3.5\n56002 desr NULL\n"
        );
    }

    #[test]
    fn test_csv() {
        let text = render(&DelimitedWriter::csv());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2], "Date,Band,Flux");
        assert_eq!(lines[4], "56002,desr,NULL");
        assert_eq!(DelimitedWriter::csv().extension(), "csv");
        assert_eq!(DelimitedWriter::ascii().extension(), "dat");
    }

    #[test]
    fn test_empty_table_still_has_header() {
        let lc = LightCurve::new(1, Record::new(), Table::new(["Date", "Flux"]));
        let mut buf = Vec::new();
        DelimitedWriter::csv().write(&lc, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "Date,Flux\n");
    }
}
