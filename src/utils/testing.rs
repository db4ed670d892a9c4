// Utility for unit and integration tests
use std::sync::Mutex;

use async_trait::async_trait;
use dessn_db::{Gateway, GatewayError, Record, Value};

pub const TEST_CONFIG_FILE: &str = "tests/config.test.yaml";

/// In-memory gateway answering queries from scripted result sets.
///
/// A query is answered by the first scripted fragment it contains; a query
/// no fragment matches is a `GatewayError::Unscripted`. Every query is
/// recorded, matched or not.
#[derive(Default)]
pub struct ScriptedGateway {
    responses: Vec<(String, Vec<Record>)>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        ScriptedGateway::default()
    }

    pub fn respond(mut self, fragment: &str, rows: Vec<Record>) -> Self {
        self.responses.push((fragment.to_string(), rows));
        self
    }

    /// Queries received so far, in order
    pub fn queries(&self) -> Vec<String> {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn query(&self, sql: &str) -> Result<Vec<Record>, GatewayError> {
        match self.seen.lock() {
            Ok(mut seen) => seen.push(sql.to_string()),
            Err(poisoned) => poisoned.into_inner().push(sql.to_string()),
        }
        self.responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .ok_or_else(|| GatewayError::Unscripted(sql.to_string()))
    }
}

/// Candidate row as the candidate list query returns it
pub fn candidate_row(snid: i64, ra: f64, dec: f64) -> Record {
    Record::new()
        .with("snid", snid)
        .with("transient_name", format!("DES13C{}", snid))
        .with("ra", ra)
        .with("dec", dec)
        .with("cand_type", 0_i64)
        .with("numepochs", 4_i64)
        .with("numepochs_ml", Value::Null)
        .with("entry_date", "2013-09-12")
        .with("snfake_id", 0_i64)
}

/// Photometry row in the layout of the photometry query
pub fn photometry_row(expnum: i64, ccdnum: i64, band: &str, flux: f64, run: &str) -> Record {
    Record::new()
        .with("mjd", 56500.0 + expnum as f64 / 100.0)
        .with("field", "C3")
        .with("band", band)
        .with("flux", flux)
        .with("flux_err", 2.5)
        .with("mag", 25.0)
        .with("status", 0_i64)
        .with("expnum", expnum)
        .with("ccdnum", ccdnum)
        .with("photprob", 0.9)
        .with("psf_nea", 15.0)
        .with("run", run)
}

pub fn host_row(galaxy_id: i64, specz: f64) -> Record {
    Record::new()
        .with("sngalid", galaxy_id)
        .with("ishost", 1_i64)
        .with("specz", specz)
        .with("photoz", Value::Null)
        .with("dlr", 1.1)
        .with("separation", 0.7)
}

pub fn image_row(expnum: i64, ccdnum: i64, band: &str, run: &str) -> Record {
    Record::new()
        .with("expnum", expnum)
        .with("ccdnum", ccdnum)
        .with("band", band)
        .with("mjd_obs", 56500.5)
        .with("run", run)
        .with("filename", format!("D{:08}_{}_c{:02}.fits", expnum, band, ccdnum))
        .with("zeropoint", 31.2)
}
