//! Typed views of the rows returned by the candidate, photometry, image and
//! host-galaxy queries.
//!
//! Conversion from a gateway [`Record`] only checks that the fields the
//! programs actually use are present and of a usable type; any extra columns
//! are ignored.
use dessn_db::{Record, Value};

use crate::utils::enums::Grouping;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FieldError {
    #[error("missing field {0}")]
    Missing(String),
    #[error("field {field} has type {found}, expected {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

fn wrong_type(field: &str, expected: &'static str, value: &Value) -> FieldError {
    FieldError::WrongType {
        field: field.to_string(),
        expected,
        found: value.kind(),
    }
}

fn optional_i64(record: &Record, field: &str) -> Result<Option<i64>, FieldError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| wrong_type(field, "int", value)),
    }
}

fn required_i64(record: &Record, field: &str) -> Result<i64, FieldError> {
    optional_i64(record, field)?.ok_or_else(|| FieldError::Missing(field.to_string()))
}

fn optional_f64(record: &Record, field: &str) -> Result<Option<f64>, FieldError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| wrong_type(field, "float", value)),
    }
}

fn required_f64(record: &Record, field: &str) -> Result<f64, FieldError> {
    optional_f64(record, field)?.ok_or_else(|| FieldError::Missing(field.to_string()))
}

/// Text field; numbers are rendered, since some run and name columns are
/// numeric in one table and character in another.
fn optional_text(record: &Record, field: &str) -> Result<Option<String>, FieldError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(s)) => Ok(Some(s.trim().to_string())),
        Some(value @ (Value::Int(_) | Value::Float(_))) => Ok(Some(value.to_string())),
        Some(value) => Err(wrong_type(field, "text", value)),
    }
}

fn required_text(record: &Record, field: &str) -> Result<String, FieldError> {
    optional_text(record, field)?.ok_or_else(|| FieldError::Missing(field.to_string()))
}

/// A supernova candidate, as returned by the candidate list query
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub snid: i64,
    pub transient_name: Option<String>,
    pub ra: f64,
    pub dec: f64,
    pub cand_type: Option<i64>,
    pub num_epochs: Option<i64>,
    pub num_epochs_ml: Option<i64>,
    pub entry_date: Option<String>,
    pub fake_id: Option<i64>,
}

impl Candidate {
    pub fn is_fake(&self) -> bool {
        self.fake_id.is_some_and(|id| id > 0)
    }
}

impl TryFrom<&Record> for Candidate {
    type Error = FieldError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Candidate {
            snid: required_i64(record, "snid")?,
            transient_name: optional_text(record, "transient_name")?,
            ra: required_f64(record, "ra")?,
            dec: required_f64(record, "dec")?,
            cand_type: optional_i64(record, "cand_type")?,
            num_epochs: optional_i64(record, "numepochs")?,
            num_epochs_ml: optional_i64(record, "numepochs_ml")?,
            entry_date: optional_text(record, "entry_date")?,
            fake_id: optional_i64(record, "snfake_id")?,
        })
    }
}

/// One flux measurement from SNOBS or SNFORCE
#[derive(Debug, Clone, PartialEq)]
pub struct PhotometryRecord {
    pub mjd: f64,
    pub field: Option<String>,
    pub band: String,
    pub flux: Option<f64>,
    pub flux_err: Option<f64>,
    pub mag: Option<f64>,
    pub status: Option<i64>,
    pub expnum: i64,
    pub ccdnum: Option<i64>,
    pub photprob: Option<f64>,
    pub psf_nea: Option<f64>,
    pub run: Option<String>,
}

impl PhotometryRecord {
    pub fn group_key(&self, grouping: Grouping) -> (i64, Option<i64>) {
        match grouping {
            Grouping::Exposure => (self.expnum, None),
            Grouping::ExposureCcd => (self.expnum, self.ccdnum),
        }
    }
}

impl TryFrom<&Record> for PhotometryRecord {
    type Error = FieldError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(PhotometryRecord {
            mjd: required_f64(record, "mjd")?,
            field: optional_text(record, "field")?,
            band: required_text(record, "band")?,
            flux: optional_f64(record, "flux")?,
            flux_err: optional_f64(record, "flux_err")?,
            mag: optional_f64(record, "mag")?,
            status: optional_i64(record, "status")?,
            expnum: required_i64(record, "expnum")?,
            ccdnum: optional_i64(record, "ccdnum")?,
            photprob: optional_f64(record, "photprob")?,
            psf_nea: optional_f64(record, "psf_nea")?,
            run: optional_text(record, "run")?,
        })
    }
}

/// One processed CCD image overlapping a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub expnum: i64,
    pub ccdnum: i64,
    pub band: String,
    pub mjd_obs: f64,
    pub run: Option<String>,
    pub filename: Option<String>,
    pub zeropoint: Option<f64>,
}

impl ImageRecord {
    pub fn group_key(&self) -> (i64, Option<i64>) {
        (self.expnum, Some(self.ccdnum))
    }
}

impl TryFrom<&Record> for ImageRecord {
    type Error = FieldError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(ImageRecord {
            expnum: required_i64(record, "expnum")?,
            ccdnum: required_i64(record, "ccdnum")?,
            band: required_text(record, "band")?,
            mjd_obs: required_f64(record, "mjd_obs")?,
            run: optional_text(record, "run")?,
            filename: optional_text(record, "filename")?,
            zeropoint: optional_f64(record, "zeropoint")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostGalaxy {
    pub galaxy_id: Option<i64>,
    pub is_host: bool,
    pub specz: Option<f64>,
    pub photoz: Option<f64>,
    pub dlr: Option<f64>,
    pub separation: Option<f64>,
}

impl TryFrom<&Record> for HostGalaxy {
    type Error = FieldError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(HostGalaxy {
            galaxy_id: optional_i64(record, "sngalid")?,
            is_host: optional_i64(record, "ishost")?.unwrap_or(0) == 1,
            specz: optional_f64(record, "specz")?,
            photoz: optional_f64(record, "photoz")?,
            dlr: optional_f64(record, "dlr")?,
            separation: optional_f64(record, "separation")?,
        })
    }
}

/// Per-band mean flux of a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct AverageFlux {
    pub band: String,
    pub avg_flux: Option<f64>,
    pub n_obs: Option<i64>,
}

impl TryFrom<&Record> for AverageFlux {
    type Error = FieldError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(AverageFlux {
            band: required_text(record, "band")?,
            avg_flux: optional_f64(record, "avg_flux")?,
            n_obs: optional_i64(record, "n_obs")?,
        })
    }
}

/// Converts every record of a result set, stopping at the first bad row
pub fn parse_all<'a, T>(records: &'a [Record]) -> Result<Vec<T>, FieldError>
where
    T: TryFrom<&'a Record, Error = FieldError>,
{
    records.iter().map(T::try_from).collect()
}
