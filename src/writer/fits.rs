//! Multi-candidate FITS output.
//!
//! The primary HDU holds the run header. `META` has one row per candidate and
//! `PHOT` holds every candidate's rows back to back; `PTROBS_MIN` and
//! `PTROBS_MAX` in `META` are the 1-based inclusive range of the candidate's
//! rows in `PHOT`.
use std::path::Path;

use dessn_db::{Record, Value};
use fitsio::hdu::FitsHdu;
use fitsio::tables::{ColumnDataType, ColumnDescription, ConcreteColumnDescription};
use fitsio::FitsFile;

use super::WriteError;
use crate::lightcurve::{Table, TableError};

pub const META_EXTENSION: &str = "META";
pub const DATA_EXTENSION: &str = "PHOT";
pub const PTROBS_MIN: &str = "PTROBS_MIN";
pub const PTROBS_MAX: &str = "PTROBS_MAX";

/// A batch flattened into the two tables that go into the file
#[derive(Debug, Clone, PartialEq)]
pub struct MergedBatch {
    pub meta: Table,
    pub data: Table,
}

/// Checks the batch and concatenates it. Nothing touches the disk, so every
/// consistency error surfaces before the output file is created.
pub fn merge_batch(metas: &[Record], tables: &[Table]) -> Result<MergedBatch, WriteError> {
    if metas.is_empty() && tables.is_empty() {
        return Err(WriteError::EmptyBatch);
    }
    if metas.len() != tables.len() {
        return Err(WriteError::LengthMismatch {
            meta: metas.len(),
            data: tables.len(),
        });
    }

    let meta_names: Vec<String> = metas[0]
        .names()
        .map(String::from)
        .chain([PTROBS_MIN.to_string(), PTROBS_MAX.to_string()])
        .collect();
    let mut meta = Table::new(meta_names);
    let mut data = Table::default();
    let mut offset: i64 = 0;

    for (index, (record, table)) in metas.iter().zip(tables).enumerate() {
        let names: Vec<&str> = record.names().collect();
        if names.len() + 2 != meta.n_cols() || names.iter().zip(meta.names()).any(|(a, b)| a != b)
        {
            return Err(WriteError::SchemaMismatch {
                index,
                source: TableError::ColumnMismatch {
                    expected: meta.names()[..meta.n_cols() - 2].to_vec(),
                    found: names.into_iter().map(String::from).collect(),
                },
            });
        }
        data.append(table)
            .map_err(|source| WriteError::SchemaMismatch { index, source })?;

        let rows = table.n_rows() as i64;
        let mut row: Vec<Value> = record.iter().map(|(_, v)| v.clone()).collect();
        row.push(Value::Int(offset + 1));
        row.push(Value::Int(offset + rows));
        meta.push_row(row)
            .map_err(|source| WriteError::SchemaMismatch { index, source })?;
        offset += rows;
    }

    Ok(MergedBatch { meta, data })
}

/// Storage chosen for one column from the values it holds
#[derive(Debug, Clone, PartialEq)]
enum FitsColumn {
    Int(Vec<i32>),
    Double(Vec<f64>),
    Text { values: Vec<String>, width: usize },
}

fn fits_column(values: &[Value]) -> FitsColumn {
    let any_text = values.iter().any(|v| matches!(v, Value::Text(_)));
    if any_text {
        let values: Vec<String> = values.iter().map(Value::to_string).collect();
        let width = values.iter().map(String::len).max().unwrap_or(0).max(1);
        return FitsColumn::Text { values, width };
    }

    let as_int = |v: &Value| match v {
        Value::Int(i) => i32::try_from(*i).ok(),
        Value::Bool(b) => Some(*b as i32),
        _ => None,
    };
    if let Some(ints) = values.iter().map(as_int).collect::<Option<Vec<i32>>>() {
        return FitsColumn::Int(ints);
    }
    FitsColumn::Double(
        values
            .iter()
            .map(|v| match v {
                Value::Bool(b) => *b as i64 as f64,
                other => other.as_f64().unwrap_or(f64::NAN),
            })
            .collect(),
    )
}

impl FitsColumn {
    fn description(&self, name: &str) -> Result<ConcreteColumnDescription, WriteError> {
        let mut description = ColumnDescription::new(name);
        let description = match self {
            FitsColumn::Int(_) => description.with_type(ColumnDataType::Int).create()?,
            FitsColumn::Double(_) => description.with_type(ColumnDataType::Double).create()?,
            FitsColumn::Text { width, .. } => description
                .with_type(ColumnDataType::String)
                .that_repeats(*width)
                .create()?,
        };
        Ok(description)
    }

    fn write(&self, hdu: &FitsHdu, fptr: &mut FitsFile, name: &str) -> Result<(), WriteError> {
        match self {
            FitsColumn::Int(values) => hdu.write_col(fptr, name, values.as_slice())?,
            FitsColumn::Double(values) => hdu.write_col(fptr, name, values.as_slice())?,
            FitsColumn::Text { values, .. } => hdu.write_col(fptr, name, values.as_slice())?,
        };
        Ok(())
    }
}

fn write_table(fptr: &mut FitsFile, extname: &str, table: &Table) -> Result<(), WriteError> {
    let columns: Vec<(&str, FitsColumn)> = table
        .columns()
        .map(|(name, values)| (name, fits_column(values)))
        .collect();
    let descriptions = columns
        .iter()
        .map(|(name, column)| column.description(name))
        .collect::<Result<Vec<_>, _>>()?;
    let hdu = fptr.create_table(extname.to_string(), &descriptions)?;
    if table.is_empty() {
        return Ok(());
    }
    for (name, column) in &columns {
        column.write(&hdu, fptr, name)?;
    }
    Ok(())
}

fn write_header(fptr: &mut FitsFile, header: &Record) -> Result<(), WriteError> {
    let primary = fptr.primary_hdu()?;
    for (key, value) in header.iter() {
        let key = key.to_uppercase();
        match value {
            Value::Null => continue,
            Value::Bool(b) => primary.write_key(fptr, &key, *b as i64)?,
            Value::Int(i) => primary.write_key(fptr, &key, *i)?,
            Value::Float(x) => primary.write_key(fptr, &key, *x)?,
            Value::Text(s) => primary.write_key(fptr, &key, s.clone())?,
        }
    }
    Ok(())
}

/// Writes the whole batch to a new file at `path`.
pub fn write_fits(
    path: &Path,
    header: &Record,
    metas: &[Record],
    tables: &[Table],
) -> Result<(), WriteError> {
    let batch = merge_batch(metas, tables)?;
    if path.exists() {
        return Err(WriteError::DestinationExists(path.to_path_buf()));
    }

    let mut fptr = FitsFile::create(path).open()?;
    write_header(&mut fptr, header)?;
    write_table(&mut fptr, META_EXTENSION, &batch.meta)?;
    write_table(&mut fptr, DATA_EXTENSION, &batch.data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n_rows: usize) -> Table {
        let mut table = Table::new(["Date", "Flux"]);
        for i in 0..n_rows {
            table
                .push_row(vec![Value::Float(56000.0 + i as f64), Value::Float(1.5)])
                .unwrap();
        }
        table
    }

    fn meta(snid: i64) -> Record {
        Record::new().with("snid", snid).with("ra", 10.0)
    }

    #[test]
    fn test_offsets_are_cumulative() {
        let batch = merge_batch(&[meta(1), meta(2), meta(3)], &[table(3), table(0), table(2)])
            .unwrap();
        assert_eq!(batch.data.n_rows(), 5);
        assert_eq!(batch.meta.n_rows(), 3);
        assert_eq!(
            batch.meta.column(PTROBS_MIN).unwrap(),
            [Value::Int(1), Value::Int(4), Value::Int(4)]
        );
        assert_eq!(
            batch.meta.column(PTROBS_MAX).unwrap(),
            [Value::Int(3), Value::Int(3), Value::Int(5)]
        );
    }

    #[test]
    fn test_inconsistent_batches_are_rejected() {
        assert!(matches!(merge_batch(&[], &[]), Err(WriteError::EmptyBatch)));
        assert!(matches!(
            merge_batch(&[meta(1), meta(2)], &[table(1)]),
            Err(WriteError::LengthMismatch { meta: 2, data: 1 })
        ));
        assert!(matches!(
            merge_batch(&[meta(1), meta(2)], &[table(1), Table::new(["Date"])]),
            Err(WriteError::SchemaMismatch { index: 1, .. })
        ));
        let odd = Record::new().with("snid", 2_i64);
        assert!(matches!(
            merge_batch(&[meta(1), odd], &[table(1), table(1)]),
            Err(WriteError::SchemaMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_column_storage() {
        assert_eq!(
            fits_column(&[Value::Int(3), Value::Bool(true)]),
            FitsColumn::Int(vec![3, 1])
        );
        match fits_column(&[Value::Int(3), Value::Null]) {
            FitsColumn::Double(values) => {
                assert_eq!(values[0], 3.0);
                assert!(values[1].is_nan());
            }
            other => panic!("expected a double column, got {:?}", other),
        }
        assert_eq!(
            fits_column(&[Value::from("desg"), Value::Null]),
            FitsColumn::Text {
                values: vec!["desg".to_string(), String::new()],
                width: 4
            }
        );
        assert!(matches!(
            fits_column(&[Value::Int(i64::from(i32::MAX) + 1)]),
            FitsColumn::Double(_)
        ));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.fits");
        let header = Record::new().with("source", "SNFORCE").with("ncand", 2_i64);
        write_fits(&path, &header, &[meta(11), meta(12)], &[table(2), table(1)]).unwrap();

        let mut fptr = FitsFile::open(&path).unwrap();
        let primary = fptr.primary_hdu().unwrap();
        let source: String = primary.read_key(&mut fptr, "SOURCE").unwrap();
        assert_eq!(source, "SNFORCE");

        let meta_hdu = fptr.hdu(META_EXTENSION).unwrap();
        let snids: Vec<i32> = meta_hdu.read_col(&mut fptr, "snid").unwrap();
        let ends: Vec<i32> = meta_hdu.read_col(&mut fptr, PTROBS_MAX).unwrap();
        assert_eq!(snids, vec![11, 12]);
        assert_eq!(ends, vec![2, 3]);

        let data_hdu = fptr.hdu(DATA_EXTENSION).unwrap();
        let dates: Vec<f64> = data_hdu.read_col(&mut fptr, "Date").unwrap();
        assert_eq!(dates, vec![56000.0, 56001.0, 56000.0]);

        assert!(matches!(
            write_fits(&path, &header, &[meta(11)], &[table(1)]),
            Err(WriteError::DestinationExists(_))
        ));
    }
}
