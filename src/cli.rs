//! Command-line arguments shared by the export programs, and their
//! validation. Everything here runs before the first query: a run with a bad
//! argument never touches the database.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::Args;
use dessn_config::DesConfigError;
use dessn_db::Record;

use crate::query::{CandidateSelection, MjdRange};
use crate::transform::{BandMap, BandMapError};
use crate::utils::enums::FakePolicy;
use crate::writer::{
    FileSink, FitsSink, FormatRegistry, Salt2Options, Sink, Strategy, WriteError, Writer,
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("unknown output format {name}, expected one of: {known}")]
    UnknownFormat { name: String, known: String },
    #[error("output directory {} does not exist", .0.display())]
    MissingOutdir(PathBuf),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("the fits format writes a single file, use --output")]
    OutputRequired,
    #[error("output file {} already exists", .0.display())]
    OutputExists(PathBuf),
    #[error("invalid --bandnames")]
    BandNames(#[from] BandMapError),
    #[error("invalid date {value}, expected YYYY-MM-DD")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("empty MJD range: {min} > {max}")]
    MjdRange { min: f64, max: f64 },
    #[error("box size must be positive, got {0}")]
    BoxSize(f64),
    #[error("no candidates selected: give ids, names, --file or a selection filter")]
    NoSelection,
    #[error("could not read candidate list {}", .path.display())]
    CandidateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("--raw and --pedantic cannot be combined")]
    RawPedantic,
    #[error("could not load configuration")]
    Config(#[from] DesConfigError),
}

/// Options every program takes
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Path to the configuration file
    #[arg(long, value_name = "FILE", env = "DESSN_CONFIG")]
    pub config: Option<String>,

    /// More logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Which candidates to process
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Candidate ids (SNID) or transient names
    #[arg(value_name = "CANDIDATE")]
    pub identifiers: Vec<String>,

    /// File with one candidate id or name per line; `#` starts a comment
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Only candidates of this classification type
    #[arg(long)]
    pub cand_type: Option<i64>,

    /// Only candidates with at least this many epochs
    #[arg(long)]
    pub min_epochs: Option<i64>,

    /// Only candidates entered on or after this date
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub since: Option<String>,

    /// Only candidates entered on or before this date
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub until: Option<String>,

    /// How to treat candidates carrying an injected fake supernova
    #[arg(long, value_enum, default_value_t)]
    pub fakes: FakePolicy,
}

impl SelectionArgs {
    pub fn selection(&self) -> Result<CandidateSelection, ConfigurationError> {
        let mut selection = CandidateSelection {
            cand_type: self.cand_type,
            min_epochs: self.min_epochs,
            since: self.since.as_deref().map(parse_date).transpose()?,
            until: self.until.as_deref().map(parse_date).transpose()?,
            fakes: self.fakes,
            ..Default::default()
        };
        for identifier in &self.identifiers {
            selection.push_identifier(identifier);
        }
        if let Some(path) = &self.file {
            for identifier in read_identifiers(path)? {
                selection.push_identifier(&identifier);
            }
        }
        Ok(selection)
    }

    /// Selection for the per-candidate programs, which refuse to run over
    /// the whole candidate table by accident
    pub fn restricted_selection(&self) -> Result<CandidateSelection, ConfigurationError> {
        let selection = self.selection()?;
        if selection.is_unrestricted() {
            return Err(ConfigurationError::NoSelection);
        }
        Ok(selection)
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, ConfigurationError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|source| {
        ConfigurationError::InvalidDate {
            value: value.to_string(),
            source,
        }
    })
}

/// Candidate identifiers from a list file
pub fn read_identifiers(path: &Path) -> Result<Vec<String>, ConfigurationError> {
    let content =
        fs::read_to_string(path).map_err(|source| ConfigurationError::CandidateFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

#[derive(Args, Debug, Clone, Default)]
pub struct MjdArgs {
    /// Earliest MJD to export
    #[arg(long)]
    pub mjd_min: Option<f64>,

    /// Latest MJD to export
    #[arg(long)]
    pub mjd_max: Option<f64>,
}

impl MjdArgs {
    pub fn range(&self) -> Result<MjdRange, ConfigurationError> {
        if let (Some(min), Some(max)) = (self.mjd_min, self.mjd_max) {
            if min > max {
                return Err(ConfigurationError::MjdRange { min, max });
            }
        }
        Ok(MjdRange {
            min: self.mjd_min,
            max: self.mjd_max,
        })
    }
}

pub fn parse_bands(bandnames: Option<&str>) -> Result<BandMap, ConfigurationError> {
    match bandnames {
        None => Ok(BandMap::default()),
        Some(names) => Ok(names.parse()?),
    }
}

/// SALT2 writer options. Pedantic output checks for the SALT2 column names,
/// which raw output never uses, so the pair is refused.
pub fn salt2_options(raw: bool, pedantic: bool) -> Result<Salt2Options, ConfigurationError> {
    if raw && pedantic {
        return Err(ConfigurationError::RawPedantic);
    }
    Ok(Salt2Options { raw, pedantic })
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output format: ascii, csv, json, salt2 or fits
    #[arg(long, default_value = "ascii")]
    pub format: String,

    /// Directory for one-file-per-candidate formats
    #[arg(long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,

    /// Output file of the fits format
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Replace existing per-candidate files instead of skipping them
    #[arg(long)]
    pub overwrite: bool,
}

fn unknown_format(registry: &FormatRegistry, name: &str) -> ConfigurationError {
    ConfigurationError::UnknownFormat {
        name: name.to_string(),
        known: registry.names().join(", "),
    }
}

/// Writer of a one-table output, which cannot be the fits batch
pub fn single_writer<'a>(
    registry: &'a FormatRegistry,
    name: &str,
) -> Result<&'a dyn Writer, ConfigurationError> {
    match registry.get(name) {
        Some(Strategy::File(writer)) => Ok(writer.as_ref()),
        _ => Err(unknown_format(registry, name)),
    }
}

/// Where a validated run writes to
pub enum OutputTarget<'a> {
    Files {
        writer: &'a dyn Writer,
        outdir: PathBuf,
    },
    FitsBatch(PathBuf),
}

impl OutputArgs {
    pub fn target<'a>(
        &self,
        registry: &'a FormatRegistry,
    ) -> Result<OutputTarget<'a>, ConfigurationError> {
        let strategy = registry
            .get(&self.format)
            .ok_or_else(|| unknown_format(registry, &self.format))?;

        match strategy {
            Strategy::File(writer) => {
                let outdir = self.outdir.clone().unwrap_or_else(|| PathBuf::from("."));
                if !outdir.exists() {
                    return Err(ConfigurationError::MissingOutdir(outdir));
                }
                if !outdir.is_dir() {
                    return Err(ConfigurationError::NotADirectory(outdir));
                }
                Ok(OutputTarget::Files {
                    writer: writer.as_ref(),
                    outdir,
                })
            }
            Strategy::FitsBatch => {
                let output = self.output.clone().ok_or(ConfigurationError::OutputRequired)?;
                if output.exists() {
                    return Err(ConfigurationError::OutputExists(output));
                }
                Ok(OutputTarget::FitsBatch(output))
            }
        }
    }
}

impl<'a> OutputTarget<'a> {
    pub fn into_sink(
        self,
        overwrite: bool,
        header: Record,
    ) -> Result<Box<dyn Sink + 'a>, WriteError> {
        Ok(match self {
            OutputTarget::Files { writer, outdir } => {
                Box::new(FileSink::new(writer, outdir, overwrite))
            }
            OutputTarget::FitsBatch(path) => Box::new(FitsSink::new(path, header)?),
        })
    }
}
