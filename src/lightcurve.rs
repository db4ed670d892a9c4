use dessn_db::{Record, Value};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TableError {
    #[error("row has {found} values, table has {expected} columns")]
    RowLength { expected: usize, found: usize },
    #[error("column names differ: expected {expected:?}, found {found:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Ordered named columns of equal length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let columns = vec![Vec::new(); names.len()];
        Table { names, columns }
    }

    /// Builds a table from rows that all share the first row's field names.
    pub fn from_records(records: &[Record]) -> Result<Self, TableError> {
        let Some(first) = records.first() else {
            return Ok(Table::default());
        };
        let mut table = Table::new(first.names());
        for record in records {
            let names: Vec<&str> = record.names().collect();
            if names != table.names {
                return Err(TableError::ColumnMismatch {
                    expected: table.names.clone(),
                    found: names.into_iter().map(String::from).collect(),
                });
            }
            table.push_row(record.iter().map(|(_, v)| v.clone()).collect())?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.names.len() {
            return Err(TableError::RowLength {
                expected: self.names.len(),
                found: row.len(),
            });
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        Ok(())
    }

    /// Appends all rows of `other`, which must have identical column names.
    pub fn append(&mut self, other: &Table) -> Result<(), TableError> {
        if self.names.is_empty() && self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if other.names != self.names {
            return Err(TableError::ColumnMismatch {
                expected: self.names.clone(),
                found: other.names.clone(),
            });
        }
        for (column, extra) in self.columns.iter_mut().zip(&other.columns) {
            column.extend(extra.iter().cloned());
        }
        Ok(())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter().map(Vec::as_slice))
    }

    pub fn row(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(move |column| &column[idx])
    }
}

/// The unit handed to a writer: one candidate's metadata and its data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurve {
    pub snid: i64,
    pub meta: Record,
    pub data: Table,
}

impl LightCurve {
    pub fn new(snid: i64, meta: Record, data: Table) -> Self {
        LightCurve { snid, meta, data }
    }
}
