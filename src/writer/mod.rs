//! Serialization of light curves and image tables.
//!
//! Single-file formats implement [`Writer`] and write one candidate per file
//! through a [`FileSink`]. The FITS format is a batch: every candidate goes
//! into one file, written once by [`FitsSink::finish`].
pub mod delimited;
pub mod fits;
pub mod json;
pub mod salt2;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dessn_db::{Record, Value};
use tracing::{debug, info};

use crate::lightcurve::{LightCurve, TableError};

pub use delimited::DelimitedWriter;
pub use json::JsonWriter;
pub use salt2::{Salt2Options, Salt2Writer};

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("could not write output")]
    Io(#[from] std::io::Error),
    #[error("could not serialize JSON")]
    Json(#[from] serde_json::Error),
    #[error("could not write FITS file")]
    Fits(#[from] fitsio::errors::Error),
    #[error("required columns missing: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("FITS batch is empty")]
    EmptyBatch,
    #[error("FITS batch has {meta} metadata entries but {data} data tables")]
    LengthMismatch { meta: usize, data: usize },
    #[error("light curve {index} does not match the batch schema")]
    SchemaMismatch {
        index: usize,
        #[source]
        source: TableError,
    },
    #[error("output file {} already exists", .0.display())]
    DestinationExists(PathBuf),
}

/// A single-file output format.
pub trait Writer: Send + Sync {
    /// File extension, without the dot
    fn extension(&self) -> &'static str;

    fn write(&self, lightcurve: &LightCurve, out: &mut dyn Write) -> Result<(), WriteError>;
}

/// How a format name is turned into output.
pub enum Strategy {
    File(Box<dyn Writer>),
    FitsBatch,
}

/// Format name to output strategy, built once at startup.
pub struct FormatRegistry {
    formats: Vec<(&'static str, Strategy)>,
}

impl FormatRegistry {
    pub fn new(salt2: Salt2Options) -> Self {
        FormatRegistry {
            formats: vec![
                ("ascii", Strategy::File(Box::new(DelimitedWriter::ascii()))),
                ("csv", Strategy::File(Box::new(DelimitedWriter::csv()))),
                ("json", Strategy::File(Box::new(JsonWriter))),
                ("salt2", Strategy::File(Box::new(Salt2Writer::new(salt2)))),
                ("fits", Strategy::FitsBatch),
            ],
        }
    }

    /// Registry without the batch format, for outputs that are one table
    pub fn single_file(salt2: Salt2Options) -> Self {
        let mut registry = FormatRegistry::new(salt2);
        registry
            .formats
            .retain(|(_, strategy)| matches!(strategy, Strategy::File(_)));
        registry
    }

    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.formats
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, strategy)| strategy)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.formats.iter().map(|(n, _)| *n).collect()
    }
}

/// Rendering of a value in the text formats
pub fn render_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Text(s) if s.is_empty() => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// What happened to one light curve handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Written(PathBuf),
    SkippedExisting(PathBuf),
    Batched,
}

pub trait Sink {
    fn accept(&mut self, lightcurve: LightCurve) -> Result<Disposition, WriteError>;

    /// Flushes anything held back; returns the path of a batch file
    fn finish(&mut self) -> Result<Option<PathBuf>, WriteError>;
}

/// `<outdir>/<snid zero-padded to 8>.<ext>`
pub fn output_path(outdir: &Path, snid: i64, extension: &str) -> PathBuf {
    outdir.join(format!("{:08}.{}", snid, extension))
}

/// Writes one file per light curve.
pub struct FileSink<'a> {
    writer: &'a dyn Writer,
    outdir: PathBuf,
    overwrite: bool,
}

impl<'a> FileSink<'a> {
    pub fn new(writer: &'a dyn Writer, outdir: impl Into<PathBuf>, overwrite: bool) -> Self {
        FileSink {
            writer,
            outdir: outdir.into(),
            overwrite,
        }
    }
}

impl Sink for FileSink<'_> {
    fn accept(&mut self, lightcurve: LightCurve) -> Result<Disposition, WriteError> {
        let path = output_path(&self.outdir, lightcurve.snid, self.writer.extension());
        if path.exists() && !self.overwrite {
            info!(path = %path.display(), "output exists, skipping");
            return Ok(Disposition::SkippedExisting(path));
        }
        // rendered in memory first so a rejected light curve leaves no file
        let mut rendered = Vec::new();
        self.writer.write(&lightcurve, &mut rendered)?;
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(&rendered)?;
        out.flush()?;
        debug!(path = %path.display(), rows = lightcurve.data.n_rows(), "wrote");
        Ok(Disposition::Written(path))
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, WriteError> {
        Ok(None)
    }
}

/// Collects every light curve and writes them as one FITS file at the end.
pub struct FitsSink {
    path: PathBuf,
    header: Record,
    batch: Vec<LightCurve>,
}

impl FitsSink {
    /// Refuses an existing destination up front, before any query runs
    pub fn new(path: impl Into<PathBuf>, header: Record) -> Result<Self, WriteError> {
        let path = path.into();
        if path.exists() {
            return Err(WriteError::DestinationExists(path));
        }
        Ok(FitsSink {
            path,
            header,
            batch: Vec::new(),
        })
    }
}

impl Sink for FitsSink {
    fn accept(&mut self, lightcurve: LightCurve) -> Result<Disposition, WriteError> {
        self.batch.push(lightcurve);
        Ok(Disposition::Batched)
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, WriteError> {
        let batch = std::mem::take(&mut self.batch);
        let (metas, tables): (Vec<_>, Vec<_>) =
            batch.into_iter().map(|lc| (lc.meta, lc.data)).unzip();
        fits::write_fits(&self.path, &self.header, &metas, &tables)?;
        info!(path = %self.path.display(), candidates = metas.len(), "wrote FITS batch");
        Ok(Some(self.path.clone()))
    }
}
