//! Per-record post-processing between the reducer and the writers.
//!
//! Photometry rows become rows of the canonical light-curve table
//! ([`ColumnId::PHOTOMETRY`]); candidate, host-galaxy and average-flux rows
//! become the metadata of the light curve.
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use dessn_db::{Record, Value};
use tracing::debug;

use crate::lightcurve::{Table, TableError};
use crate::model::{AverageFlux, Candidate, HostGalaxy, ImageRecord, PhotometryRecord};
use crate::utils::enums::PhotometryTable;
use crate::utils::lightcurves::{zero_point_from_mag, Band, UnknownBand, MAG_SYS, SNFORCE_ZP};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TransformError {
    #[error("band code not in the band map")]
    UnknownBand(#[from] UnknownBand),
    #[error("candidate {snid} has {count} host galaxies, expected at most one")]
    MultipleHosts { snid: i64, count: usize },
    #[error("could not build table")]
    Table(#[from] TableError),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum BandMapError {
    #[error("expected 4 comma-separated band names (g,r,i,z), got {0}")]
    WrongCount(usize),
    #[error("band name {0} is empty")]
    EmptyName(usize),
}

/// Output names for the four DES bands, in g, r, i, z order.
#[derive(Debug, Clone, PartialEq)]
pub struct BandMap {
    names: [String; 4],
}

impl Default for BandMap {
    fn default() -> Self {
        BandMap {
            names: ["desg", "desr", "desi", "desz"].map(String::from),
        }
    }
}

impl BandMap {
    pub fn new(names: [String; 4]) -> Self {
        BandMap { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Output name for a raw band code from the database
    pub fn lookup(&self, code: &str) -> Result<&str, TransformError> {
        let band: Band = code.parse()?;
        Ok(&self.names[band.index()])
    }
}

impl FromStr for BandMap {
    type Err = BandMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let names: [String; 4] = match parts.as_slice() {
            [g, r, i, z] => [g, r, i, z].map(|name| name.to_string()),
            _ => return Err(BandMapError::WrongCount(parts.len())),
        };
        if let Some(idx) = names.iter().position(String::is_empty) {
            return Err(BandMapError::EmptyName(idx));
        }
        Ok(BandMap { names })
    }
}

/// Canonical light-curve and image-table columns.
///
/// The canonical label is what the text and JSON writers emit; SALT2 output
/// rewrites it to the fitter's vocabulary through [`ColumnId::salt2_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnId {
    Date,
    Field,
    Band,
    Flux,
    FluxErr,
    Zp,
    ZpSys,
    Status,
    Expnum,
    CcdNum,
    PhotProb,
    PsfNea,
    Run,
    Filename,
}

impl ColumnId {
    pub const PHOTOMETRY: [ColumnId; 12] = [
        ColumnId::Date,
        ColumnId::Field,
        ColumnId::Band,
        ColumnId::Flux,
        ColumnId::FluxErr,
        ColumnId::Zp,
        ColumnId::ZpSys,
        ColumnId::Status,
        ColumnId::Expnum,
        ColumnId::CcdNum,
        ColumnId::PhotProb,
        ColumnId::PsfNea,
    ];

    pub const IMAGES: [ColumnId; 7] = [
        ColumnId::Expnum,
        ColumnId::CcdNum,
        ColumnId::Band,
        ColumnId::Date,
        ColumnId::Zp,
        ColumnId::Run,
        ColumnId::Filename,
    ];

    const ALL: [ColumnId; 14] = [
        ColumnId::Date,
        ColumnId::Field,
        ColumnId::Band,
        ColumnId::Flux,
        ColumnId::FluxErr,
        ColumnId::Zp,
        ColumnId::ZpSys,
        ColumnId::Status,
        ColumnId::Expnum,
        ColumnId::CcdNum,
        ColumnId::PhotProb,
        ColumnId::PsfNea,
        ColumnId::Run,
        ColumnId::Filename,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ColumnId::Date => "Date",
            ColumnId::Field => "Field",
            ColumnId::Band => "Band",
            ColumnId::Flux => "Flux",
            ColumnId::FluxErr => "Fluxerr",
            ColumnId::Zp => "ZP",
            ColumnId::ZpSys => "ZPsys",
            ColumnId::Status => "Status",
            ColumnId::Expnum => "Expnum",
            ColumnId::CcdNum => "CCDnum",
            ColumnId::PhotProb => "Photprob",
            ColumnId::PsfNea => "PSF_NEA",
            ColumnId::Run => "Run",
            ColumnId::Filename => "Filename",
        }
    }

    pub fn salt2_label(&self) -> &'static str {
        match self {
            ColumnId::Band => "Filter",
            ColumnId::Flux => "FluxPsf",
            ColumnId::FluxErr => "FluxPsferr",
            ColumnId::ZpSys => "MagSys",
            ColumnId::Status => "Flag",
            ColumnId::CcdNum => "CCD",
            other => other.label(),
        }
    }

    pub fn from_label(label: &str) -> Option<ColumnId> {
        ColumnId::ALL.into_iter().find(|id| id.label() == label)
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// SALT2 name for a column; names outside [`ColumnId`] are kept as they are.
pub fn salt2_column_name(name: &str) -> Cow<'_, str> {
    match ColumnId::from_label(name) {
        Some(id) => Cow::Borrowed(id.salt2_label()),
        None => Cow::Borrowed(name),
    }
}

/// Metadata keys that have a dedicated SALT2 spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKey {
    Snid,
    Ra,
    Dec,
    HostSpecz,
    CandType,
}

impl MetaKey {
    const ALL: [MetaKey; 5] = [
        MetaKey::Snid,
        MetaKey::Ra,
        MetaKey::Dec,
        MetaKey::HostSpecz,
        MetaKey::CandType,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            MetaKey::Snid => "snid",
            MetaKey::Ra => "ra",
            MetaKey::Dec => "dec",
            MetaKey::HostSpecz => "host_specz",
            MetaKey::CandType => "cand_type",
        }
    }

    pub fn salt2_key(&self) -> &'static str {
        match self {
            MetaKey::Snid => "SN",
            MetaKey::Ra => "RA",
            MetaKey::Dec => "DEC",
            MetaKey::HostSpecz => "Z_HELIO",
            MetaKey::CandType => "TYPE",
        }
    }
}

/// SALT2 name for a metadata key; other keys are kept as they are.
pub fn salt2_meta_key(key: &str) -> Cow<'_, str> {
    match MetaKey::ALL.into_iter().find(|k| k.key() == key) {
        Some(k) => Cow::Borrowed(k.salt2_key()),
        None => Cow::Borrowed(key),
    }
}

/// A count field: a missing value means none were observed.
pub fn count_value(count: Option<i64>) -> Value {
    Value::Int(count.unwrap_or(0))
}

/// Zero point of one photometry row, by source table
pub fn zero_point(source: PhotometryTable, record: &PhotometryRecord) -> Option<f64> {
    match source {
        PhotometryTable::Snforce => Some(SNFORCE_ZP),
        PhotometryTable::Snobs => match (record.mag, record.flux) {
            (Some(mag), Some(flux)) => zero_point_from_mag(mag, flux),
            _ => None,
        },
    }
}

/// Turns reduced photometry records into the canonical light-curve table.
pub struct PhotometryTransformer<'a> {
    source: PhotometryTable,
    bands: &'a BandMap,
}

impl<'a> PhotometryTransformer<'a> {
    pub fn new(source: PhotometryTable, bands: &'a BandMap) -> Self {
        PhotometryTransformer { source, bands }
    }

    /// One output row, in [`ColumnId::PHOTOMETRY`] order
    pub fn row(&self, record: &PhotometryRecord) -> Result<Vec<Value>, TransformError> {
        let band = self.bands.lookup(&record.band)?;
        Ok(ColumnId::PHOTOMETRY
            .iter()
            .map(|column| match column {
                ColumnId::Date => Value::Float(record.mjd),
                ColumnId::Field => record.field.clone().into(),
                ColumnId::Band => Value::from(band),
                ColumnId::Flux => record.flux.into(),
                ColumnId::FluxErr => record.flux_err.into(),
                ColumnId::Zp => zero_point(self.source, record).into(),
                ColumnId::ZpSys => Value::from(MAG_SYS),
                ColumnId::Status => record.status.into(),
                ColumnId::Expnum => Value::Int(record.expnum),
                ColumnId::CcdNum => record.ccdnum.into(),
                ColumnId::PhotProb => record.photprob.into(),
                ColumnId::PsfNea => record.psf_nea.into(),
                ColumnId::Run | ColumnId::Filename => Value::Null,
            })
            .collect())
    }

    pub fn table(&self, records: &[PhotometryRecord]) -> Result<Table, TransformError> {
        let mut table = Table::new(ColumnId::PHOTOMETRY.map(|c| c.label()));
        for record in records {
            table.push_row(self.row(record)?)?;
        }
        Ok(table)
    }
}

/// Image metadata table in [`ColumnId::IMAGES`] order. Band codes are kept
/// as stored.
pub fn image_table(records: &[ImageRecord]) -> Result<Table, TransformError> {
    let mut table = Table::new(ColumnId::IMAGES.map(|c| c.label()));
    for record in records {
        let row = ColumnId::IMAGES
            .iter()
            .map(|column| match column {
                ColumnId::Expnum => Value::Int(record.expnum),
                ColumnId::CcdNum => Value::Int(record.ccdnum),
                ColumnId::Band => Value::from(record.band.as_str()),
                ColumnId::Date => Value::Float(record.mjd_obs),
                ColumnId::Zp => record.zeropoint.into(),
                ColumnId::Run => record.run.clone().into(),
                ColumnId::Filename => record.filename.clone().into(),
                _ => Value::Null,
            })
            .collect();
        table.push_row(row)?;
    }
    Ok(table)
}

/// Candidate metadata. Host-galaxy keys are always present (null until
/// [`merge_host`] fills them) so every light curve of a run has the same keys.
pub fn candidate_metadata(candidate: &Candidate, source: PhotometryTable) -> Record {
    Record::new()
        .with("snid", candidate.snid)
        .with("transient_name", candidate.transient_name.clone())
        .with("ra", candidate.ra)
        .with("dec", candidate.dec)
        .with("cand_type", candidate.cand_type)
        .with("numepochs", count_value(candidate.num_epochs))
        .with("numepochs_ml", count_value(candidate.num_epochs_ml))
        .with("entry_date", candidate.entry_date.clone())
        .with("fake", candidate.is_fake())
        .with("snfake_id", candidate.fake_id)
        .with("source", source.as_str())
        .with("host_galid", Value::Null)
        .with("host_specz", Value::Null)
        .with("host_photoz", Value::Null)
        .with("host_dlr", Value::Null)
        .with("host_sep", Value::Null)
}

/// Candidate list as a table, one row per candidate
pub fn candidate_table(candidates: &[Candidate]) -> Result<Table, TransformError> {
    let mut table = Table::new([
        "snid",
        "transient_name",
        "ra",
        "dec",
        "cand_type",
        "numepochs",
        "numepochs_ml",
        "entry_date",
        "snfake_id",
    ]);
    for candidate in candidates {
        table.push_row(vec![
            Value::Int(candidate.snid),
            candidate.transient_name.clone().into(),
            Value::Float(candidate.ra),
            Value::Float(candidate.dec),
            candidate.cand_type.into(),
            count_value(candidate.num_epochs),
            count_value(candidate.num_epochs_ml),
            candidate.entry_date.clone().into(),
            candidate.fake_id.into(),
        ])?;
    }
    Ok(table)
}

/// Merges the host galaxy into the metadata. More than one host row means
/// the host association upstream is broken and is fatal.
pub fn merge_host(
    meta: &mut Record,
    snid: i64,
    galaxies: &[HostGalaxy],
) -> Result<(), TransformError> {
    let hosts: Vec<&HostGalaxy> = galaxies.iter().filter(|g| g.is_host).collect();
    let host = match hosts.as_slice() {
        [] => {
            debug!(snid, "no host galaxy");
            return Ok(());
        }
        [host] => *host,
        _ => {
            return Err(TransformError::MultipleHosts {
                snid,
                count: hosts.len(),
            })
        }
    };

    meta.set("host_galid", host.galaxy_id);
    meta.set("host_specz", host.specz);
    meta.set("host_photoz", host.photoz);
    meta.set("host_dlr", host.dlr);
    meta.set("host_sep", host.separation);
    Ok(())
}

/// Adds `avg_flux_<band>` and `n_obs_<band>` for all four bands, in band
/// map order, plus the number of bands that returned a row. Bands without
/// rows stay null (count 0), so every candidate of a run has the same keys.
pub fn merge_average_flux(
    meta: &mut Record,
    rows: &[AverageFlux],
    bands: &BandMap,
) -> Result<(), TransformError> {
    for name in bands.names() {
        meta.set(&format!("avg_flux_{}", name), Value::Null);
        meta.set(&format!("n_obs_{}", name), count_value(None));
    }
    for row in rows {
        let band = bands.lookup(&row.band)?;
        meta.set(&format!("avg_flux_{}", band), row.avg_flux);
        meta.set(&format!("n_obs_{}", band), count_value(row.n_obs));
    }
    meta.set("n_avg_bands", count_value(Some(rows.len() as i64)));
    Ok(())
}
