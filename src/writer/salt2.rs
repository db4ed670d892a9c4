use std::io::Write;

use super::{render_text, WriteError, Writer};
use crate::lightcurve::LightCurve;
use crate::transform::{salt2_column_name, salt2_meta_key};

/// Columns the SALT2 fitter cannot run without
const REQUIRED_COLUMNS: [&str; 2] = ["Filter", "MagSys"];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Salt2Options {
    /// Keep the canonical names instead of the SALT2 vocabulary
    pub raw: bool,
    /// Refuse output the fitter would reject
    pub pedantic: bool,
}

/// SALT2 light-curve file: `@KEY VALUE` metadata, `#Column :` declarations,
/// `#end :`, then whitespace-separated rows.
pub struct Salt2Writer {
    options: Salt2Options,
}

impl Salt2Writer {
    pub fn new(options: Salt2Options) -> Self {
        Salt2Writer { options }
    }

    fn column_names(&self, lightcurve: &LightCurve) -> Vec<String> {
        lightcurve
            .data
            .names()
            .iter()
            .map(|name| {
                if self.options.raw {
                    name.clone()
                } else {
                    salt2_column_name(name).into_owned()
                }
            })
            .collect()
    }
}

impl Writer for Salt2Writer {
    fn extension(&self) -> &'static str {
        "salt2"
    }

    fn write(&self, lightcurve: &LightCurve, out: &mut dyn Write) -> Result<(), WriteError> {
        let names = self.column_names(lightcurve);
        if self.options.pedantic {
            let missing: Vec<String> = REQUIRED_COLUMNS
                .into_iter()
                .filter(|required| !names.iter().any(|n| n == required))
                .map(String::from)
                .collect();
            if !missing.is_empty() {
                return Err(WriteError::MissingColumns(missing));
            }
        }

        for (key, value) in lightcurve.meta.iter() {
            let key = if self.options.raw {
                key.to_string()
            } else {
                salt2_meta_key(key).into_owned()
            };
            writeln!(out, "@{} {}", key, render_text(value))?;
        }
        for name in &names {
            writeln!(out, "#{} :", name)?;
        }
        writeln!(out, "#end :")?;

        let data = &lightcurve.data;
        for idx in 0..data.n_rows() {
            let row: Vec<String> = data.row(idx).map(render_text).collect();
            writeln!(out, "{}", row.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightcurve::Table;
    use dessn_db::{Record, Value};

    fn lightcurve(columns: &[&str]) -> LightCurve {
        let mut data = Table::new(columns.iter().copied());
        data.push_row(columns.iter().map(|_| Value::Int(1)).collect())
            .unwrap();
        let meta = Record::new()
            .with("snid", 42_i64)
            .with("host_specz", 0.12)
            .with("numepochs", 5_i64);
        LightCurve::new(42, meta, data)
    }

    fn render(options: Salt2Options, lc: &LightCurve) -> Result<String, WriteError> {
        let mut buf = Vec::new();
        Salt2Writer::new(options).write(lc, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap())
    }

    #[test]
    fn test_translated_names() {
        let lc = lightcurve(&["Date", "Band", "Flux", "ZPsys"]);
        let text = render(Salt2Options::default(), &lc).unwrap();
        assert_eq!(
            text,
            "@SN 42\n@Z_HELIO 0.12\n@numepochs 5\n\
             #Date :\n#Filter :\n#FluxPsf :\n#MagSys :\n#end :\n1 1 1 1\n"
        );
    }

    #[test]
    fn test_raw_keeps_canonical_names() {
        let lc = lightcurve(&["Date", "Band"]);
        let options = Salt2Options {
            raw: true,
            pedantic: false,
        };
        let text = render(options, &lc).unwrap();
        assert!(text.starts_with("@snid 42\n"));
        assert!(text.contains("#Band :\n"));
    }

    #[test]
    fn test_pedantic_requires_filter_and_magsys() {
        let lc = lightcurve(&["Date", "Flux"]);
        let pedantic = Salt2Options {
            raw: false,
            pedantic: true,
        };
        match render(pedantic, &lc) {
            Err(WriteError::MissingColumns(missing)) => {
                assert_eq!(missing, vec!["Filter".to_string(), "MagSys".to_string()])
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
        assert!(render(Salt2Options::default(), &lc).is_ok());

        let complete = lightcurve(&["Date", "Band", "ZPsys"]);
        assert!(render(pedantic, &complete).is_ok());

        // raw names are checked as they are written
        let raw_pedantic = Salt2Options {
            raw: true,
            pedantic: true,
        };
        assert!(matches!(
            render(raw_pedantic, &complete),
            Err(WriteError::MissingColumns(_))
        ));
    }
}
