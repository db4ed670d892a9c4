//! SQL text for the candidate, photometry, host-galaxy, average-flux and
//! image queries.
//!
//! Every function here only assembles text; execution goes through a
//! [`Gateway`](crate::db::Gateway). Queries whose results are reduced with
//! [`latest_per_group`](crate::reduce::latest_per_group) order by the
//! grouping keys and then by processing run.
use chrono::NaiveDate;
use dessn_config::TablesConfig;

use crate::utils::enums::{FakePolicy, Grouping, PhotometryTable};

const CANDIDATE_COLUMNS: &str =
    "snid, transient_name, ra, dec, cand_type, numepochs, numepochs_ml, entry_date, snfake_id";
const SNOBS_COLUMNS: &str =
    "mjd, field, band, flux, flux_err, mag, status, expnum, ccdnum, photprob, psf_nea, run";
const SNFORCE_COLUMNS: &str = "mjd, field, band, flux, flux_err, \
     CAST(NULL AS DOUBLE PRECISION) AS mag, status, expnum, ccdnum, \
     CAST(NULL AS DOUBLE PRECISION) AS photprob, psf_nea, run";
const HOST_COLUMNS: &str = "sngalid, ishost, specz, photoz, dlr, separation";
const IMAGE_COLUMNS: &str = "expnum, ccdnum, band, mjd_obs, run, filename, zeropoint";

/// SQL string literal, with embedded single quotes doubled
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn in_list<T: ToString>(column: &str, values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("{} IN ({})", column, items.join(", "))
}

/// Which candidates a run processes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSelection {
    pub ids: Vec<i64>,
    pub names: Vec<String>,
    pub cand_type: Option<i64>,
    pub min_epochs: Option<i64>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub fakes: FakePolicy,
}

impl CandidateSelection {
    /// Splits command-line identifiers into numeric ids and transient names
    pub fn push_identifier(&mut self, identifier: &str) {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return;
        }
        match identifier.parse::<i64>() {
            Ok(id) => self.ids.push(id),
            Err(_) => self.names.push(identifier.to_string()),
        }
    }

    /// True when nothing narrows the selection beyond the fake policy
    pub fn is_unrestricted(&self) -> bool {
        self.ids.is_empty()
            && self.names.is_empty()
            && self.cand_type.is_none()
            && self.min_epochs.is_none()
            && self.since.is_none()
            && self.until.is_none()
    }

    fn conditions(&self) -> Vec<String> {
        let mut conditions = Vec::new();

        let mut identity = Vec::new();
        if !self.ids.is_empty() {
            identity.push(in_list("snid", &self.ids));
        }
        if !self.names.is_empty() {
            let quoted: Vec<String> = self.names.iter().map(|n| quote_literal(n)).collect();
            identity.push(in_list("transient_name", &quoted));
        }
        match identity.len() {
            0 => {}
            1 => conditions.append(&mut identity),
            _ => conditions.push(format!("({})", identity.join(" OR "))),
        }

        if let Some(cand_type) = self.cand_type {
            conditions.push(format!("cand_type = {}", cand_type));
        }
        if let Some(min_epochs) = self.min_epochs {
            conditions.push(format!("numepochs >= {}", min_epochs));
        }
        if let Some(since) = self.since {
            conditions.push(format!("entry_date >= DATE '{}'", since.format("%Y-%m-%d")));
        }
        if let Some(until) = self.until {
            conditions.push(format!("entry_date <= DATE '{}'", until.format("%Y-%m-%d")));
        }
        match self.fakes {
            FakePolicy::Exclude => {
                conditions.push("(snfake_id IS NULL OR snfake_id = 0)".to_string())
            }
            FakePolicy::Only => conditions.push("snfake_id > 0".to_string()),
            FakePolicy::Include => {}
        }
        conditions
    }
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

/// Inclusive MJD window; either end may be open
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MjdRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MjdRange {
    fn conditions(&self, column: &str) -> Vec<String> {
        let mut conditions = Vec::new();
        if let Some(min) = self.min {
            conditions.push(format!("{} >= {}", column, min));
        }
        if let Some(max) = self.max {
            conditions.push(format!("{} <= {}", column, max));
        }
        conditions
    }
}

pub fn candidate_list(tables: &TablesConfig, selection: &CandidateSelection) -> String {
    format!(
        "SELECT {} FROM {}{} ORDER BY snid",
        CANDIDATE_COLUMNS,
        tables.candidates,
        where_clause(&selection.conditions())
    )
}

fn order_by(grouping: Grouping) -> &'static str {
    match grouping {
        Grouping::Exposure => "ORDER BY expnum, run",
        Grouping::ExposureCcd => "ORDER BY expnum, ccdnum, run",
    }
}

/// Photometry rows of one candidate, in the order the reducer expects
pub fn photometry(
    tables: &TablesConfig,
    source: PhotometryTable,
    snid: i64,
    mjd: &MjdRange,
) -> String {
    let columns = match source {
        PhotometryTable::Snobs => SNOBS_COLUMNS,
        PhotometryTable::Snforce => SNFORCE_COLUMNS,
    };
    let mut conditions = vec![format!("snid = {}", snid)];
    conditions.extend(mjd.conditions("mjd"));
    format!(
        "SELECT {} FROM {}{} {}",
        columns,
        source.table_name(tables),
        where_clause(&conditions),
        order_by(source.grouping())
    )
}

pub fn host_galaxy(tables: &TablesConfig, snid: i64) -> String {
    format!(
        "SELECT {} FROM {} WHERE snid = {} AND ishost = 1",
        HOST_COLUMNS, tables.galaxies, snid
    )
}

/// Mean flux per band over the candidate's photometry
pub fn average_flux(
    tables: &TablesConfig,
    source: PhotometryTable,
    snid: i64,
    mjd: &MjdRange,
) -> String {
    let mut conditions = vec![format!("snid = {}", snid), "flux IS NOT NULL".to_string()];
    conditions.extend(mjd.conditions("mjd"));
    format!(
        "SELECT band, CAST(AVG(flux) AS DOUBLE PRECISION) AS avg_flux, COUNT(*) AS n_obs \
         FROM {}{} GROUP BY band ORDER BY band",
        source.table_name(tables),
        where_clause(&conditions)
    )
}

const ARCSEC_PER_DEG: f64 = 3600.0;

/// Sky box around a position, in degrees. RA is split in two ranges when
/// the box crosses RA = 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxBounds {
    pub dec: (f64, f64),
    pub ra: (f64, f64),
    pub ra_wrapped: Option<(f64, f64)>,
}

impl BoxBounds {
    pub fn around(ra: f64, dec: f64, half_width_arcsec: f64) -> Self {
        let half_width = half_width_arcsec / ARCSEC_PER_DEG;
        let min_dec = f64::max(dec - half_width, -90.0);
        let max_dec = f64::min(dec + half_width, 90.0);
        let cos_dec = f64::min(min_dec.to_radians().cos(), max_dec.to_radians().cos());

        let (ra, ra_wrapped) = if cos_dec <= 0. {
            ((0., 360.), None)
        } else {
            let half_width_ra = half_width / cos_dec;
            let min_ra = ra - half_width_ra;
            let max_ra = ra + half_width_ra;

            if min_ra <= 0. && max_ra >= 360. {
                ((0., 360.), None)
            } else if min_ra < 0. {
                ((0., max_ra), Some((min_ra + 360., 360.)))
            } else if max_ra > 360. {
                ((min_ra, 360.), Some((0., max_ra - 360.)))
            } else {
                ((min_ra, max_ra), None)
            }
        };

        BoxBounds {
            dec: (min_dec, max_dec),
            ra,
            ra_wrapped,
        }
    }

    /// Overlap test against the image corner bounds
    fn overlap_condition(&self) -> String {
        let ra_overlap = |(lo, hi): (f64, f64)| format!("(racmax >= {} AND racmin <= {})", lo, hi);
        let ra = match self.ra_wrapped {
            None => ra_overlap(self.ra),
            Some(wrapped) => format!("({} OR {})", ra_overlap(self.ra), ra_overlap(wrapped)),
        };
        format!(
            "deccmax >= {} AND deccmin <= {} AND {}",
            self.dec.0, self.dec.1, ra
        )
    }
}

/// Images whose footprint overlaps the box, in the order the reducer expects
pub fn images(tables: &TablesConfig, bounds: &BoxBounds, mjd: &MjdRange) -> String {
    let mut conditions = vec![bounds.overlap_condition()];
    conditions.extend(mjd.conditions("mjd_obs"));
    format!(
        "SELECT {} FROM {}{} {}",
        IMAGE_COLUMNS,
        tables.images,
        where_clause(&conditions),
        order_by(Grouping::ExposureCcd)
    )
}
