//! Per-candidate control flow shared by the export programs.
//!
//! Candidates are processed one at a time: every query of a candidate is
//! awaited before the next candidate starts, and the first error ends the
//! run. Files already written for earlier candidates are kept.
use chrono::Utc;
use dessn_config::TablesConfig;
use dessn_db::{Gateway, GatewayError, Record};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, instrument, warn};

use crate::lightcurve::LightCurve;
use crate::model::{
    parse_all, AverageFlux, Candidate, FieldError, HostGalaxy, ImageRecord, PhotometryRecord,
};
use crate::query::{self, BoxBounds, CandidateSelection, MjdRange};
use crate::reduce::{latest_per_group, ReduceError};
use crate::transform::{
    candidate_metadata, image_table, merge_average_flux, merge_host, BandMap,
    PhotometryTransformer, TransformError,
};
use crate::utils::enums::PhotometryTable;
use crate::writer::{Disposition, Sink, WriteError};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("database query failed")]
    Gateway(#[from] GatewayError),
    #[error("unexpected query result")]
    Field(#[from] FieldError),
    #[error("query result not ordered by its grouping keys")]
    Reduce(#[from] ReduceError),
    #[error("could not transform records")]
    Transform(#[from] TransformError),
    #[error("could not write output")]
    Write(#[from] WriteError),
}

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub written: usize,
    pub skipped_existing: usize,
    pub batched: usize,
    pub empty: usize,
}

impl RunSummary {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Written(_) => self.written += 1,
            Disposition::SkippedExisting(_) => self.skipped_existing += 1,
            Disposition::Batched => self.batched += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LightCurveOptions {
    pub source: PhotometryTable,
    pub bands: BandMap,
    pub mjd: MjdRange,
    pub average_flux: bool,
}

impl LightCurveOptions {
    pub fn new(source: PhotometryTable) -> Self {
        LightCurveOptions {
            source,
            bands: BandMap::default(),
            mjd: MjdRange::default(),
            average_flux: false,
        }
    }

    /// Global header of a FITS batch
    pub fn fits_header(&self) -> Record {
        Record::new()
            .with("source", self.source.as_str())
            .with("bands", self.bands.names().join(","))
            .with("mjdmin", self.mjd.min)
            .with("mjdmax", self.mjd.max)
            .with("date", Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageOptions {
    /// Half-width of the search box, in arcsec
    pub box_size: f64,
    pub mjd: MjdRange,
}

impl ImageOptions {
    pub fn fits_header(&self) -> Record {
        Record::new()
            .with("boxsize", self.box_size)
            .with("mjdmin", self.mjd.min)
            .with("mjdmax", self.mjd.max)
            .with("date", Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

#[instrument(skip_all, err)]
pub async fn fetch_candidates<G: Gateway + Sync>(
    gateway: &G,
    tables: &TablesConfig,
    selection: &CandidateSelection,
) -> Result<Vec<Candidate>, PipelineError> {
    let rows = gateway
        .query(&query::candidate_list(tables, selection))
        .await?;
    let candidates: Vec<Candidate> = parse_all(&rows)?;
    info!(n_candidates = candidates.len(), "selected candidates");
    Ok(candidates)
}

/// Light curve of one candidate, or `None` when it has no photometry
#[instrument(skip(gateway, tables, options, candidate), fields(snid = candidate.snid), err)]
pub async fn build_lightcurve<G: Gateway + Sync>(
    gateway: &G,
    tables: &TablesConfig,
    options: &LightCurveOptions,
    candidate: &Candidate,
) -> Result<Option<LightCurve>, PipelineError> {
    let snid = candidate.snid;
    let rows = gateway
        .query(&query::photometry(tables, options.source, snid, &options.mjd))
        .await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let records: Vec<PhotometryRecord> = parse_all(&rows)?;
    let grouping = options.source.grouping();
    let records = latest_per_group(records, |r| r.group_key(grouping))?;
    debug!(n_rows = rows.len(), n_reduced = records.len(), "reduced photometry");
    let data = PhotometryTransformer::new(options.source, &options.bands).table(&records)?;

    let mut meta = candidate_metadata(candidate, options.source);
    let hosts: Vec<HostGalaxy> =
        parse_all(&gateway.query(&query::host_galaxy(tables, snid)).await?)?;
    merge_host(&mut meta, snid, &hosts)?;

    if options.average_flux {
        let sql = query::average_flux(tables, options.source, snid, &options.mjd);
        let averages: Vec<AverageFlux> = parse_all(&gateway.query(&sql).await?)?;
        merge_average_flux(&mut meta, &averages, &options.bands)?;
    }

    Ok(Some(LightCurve::new(snid, meta, data)))
}

/// Image metadata of one candidate, or `None` when no image overlaps it
#[instrument(skip(gateway, tables, options, candidate), fields(snid = candidate.snid), err)]
pub async fn build_image_table<G: Gateway + Sync>(
    gateway: &G,
    tables: &TablesConfig,
    options: &ImageOptions,
    candidate: &Candidate,
) -> Result<Option<LightCurve>, PipelineError> {
    let bounds = BoxBounds::around(candidate.ra, candidate.dec, options.box_size);
    let rows = gateway
        .query(&query::images(tables, &bounds, &options.mjd))
        .await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let records: Vec<ImageRecord> = parse_all(&rows)?;
    let records = latest_per_group(records, ImageRecord::group_key)?;
    let data = image_table(&records)?;
    let meta = Record::new()
        .with("snid", candidate.snid)
        .with("transient_name", candidate.transient_name.clone())
        .with("ra", candidate.ra)
        .with("dec", candidate.dec)
        .with("box_size", options.box_size)
        .with("n_images", data.n_rows() as i64);
    Ok(Some(LightCurve::new(candidate.snid, meta, data)))
}

/// Progress bar plus counters for one run
struct RunProgress {
    bar: ProgressBar,
    summary: RunSummary,
}

impl RunProgress {
    fn new(n_candidates: usize, message: &'static str) -> Self {
        let bar = ProgressBar::new(n_candidates as u64).with_message(message);
        let template = "{spinner:.green} {msg} {wide_bar} {pos}/{len} ({eta})";
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(style);
        }
        RunProgress {
            bar,
            summary: RunSummary::default(),
        }
    }

    fn handle(
        &mut self,
        snid: i64,
        output: Option<LightCurve>,
        sink: &mut dyn Sink,
    ) -> Result<(), PipelineError> {
        match output {
            None => {
                info!(snid, "no rows, nothing to write");
                self.summary.empty += 1;
            }
            Some(lightcurve) => {
                let disposition = sink.accept(lightcurve)?;
                self.summary.record(&disposition);
            }
        }
        self.bar.inc(1);
        Ok(())
    }

    fn finish(self, sink: &mut dyn Sink) -> Result<RunSummary, PipelineError> {
        self.bar.finish_and_clear();
        let summary = self.summary;
        if summary.batched > 0 {
            sink.finish()?;
        } else if summary.written == 0 && summary.skipped_existing == 0 {
            warn!("no candidate produced any output");
        }
        info!(
            written = summary.written,
            skipped_existing = summary.skipped_existing,
            batched = summary.batched,
            empty = summary.empty,
            "run complete"
        );
        Ok(summary)
    }
}

pub async fn run_lightcurves<G: Gateway + Sync>(
    gateway: &G,
    tables: &TablesConfig,
    options: &LightCurveOptions,
    candidates: &[Candidate],
    sink: &mut dyn Sink,
) -> Result<RunSummary, PipelineError> {
    let mut progress = RunProgress::new(candidates.len(), "light curves");
    for candidate in candidates {
        let output = build_lightcurve(gateway, tables, options, candidate).await?;
        progress.handle(candidate.snid, output, sink)?;
    }
    progress.finish(sink)
}

pub async fn run_images<G: Gateway + Sync>(
    gateway: &G,
    tables: &TablesConfig,
    options: &ImageOptions,
    candidates: &[Candidate],
    sink: &mut dyn Sink,
) -> Result<RunSummary, PipelineError> {
    let mut progress = RunProgress::new(candidates.len(), "images");
    for candidate in candidates {
        let output = build_image_table(gateway, tables, options, candidate).await?;
        progress.handle(candidate.snid, output, sink)?;
    }
    progress.finish(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{candidate_row, host_row, photometry_row, ScriptedGateway};
    use dessn_db::Value;

    fn candidate(snid: i64) -> Candidate {
        Candidate::try_from(&candidate_row(snid, 52.1, -27.5)).unwrap()
    }

    #[tokio::test]
    async fn test_build_lightcurve_reduces_and_merges() {
        let gateway = ScriptedGateway::new()
            .respond(
                "FROM snObs WHERE snid = 5 ORDER BY",
                vec![
                    photometry_row(100, 1, "g", 10.0, "r1"),
                    photometry_row(100, 1, "g", 11.0, "r2"),
                    photometry_row(200, 1, "z", 12.0, "r1"),
                ],
            )
            .respond("FROM snGals WHERE snid = 5", vec![host_row(77, 0.2)]);
        let options = LightCurveOptions::new(PhotometryTable::Snobs);

        let lc = build_lightcurve(&gateway, &TablesConfig::default(), &options, &candidate(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lc.data.n_rows(), 2);
        assert_eq!(
            lc.data.column("Flux").unwrap(),
            [Value::Float(11.0), Value::Float(12.0)]
        );
        assert_eq!(
            lc.data.column("Band").unwrap(),
            [Value::from("desg"), Value::from("desz")]
        );
        assert_eq!(lc.meta.get("host_specz"), Some(&Value::Float(0.2)));
        assert_eq!(lc.meta.get("numepochs_ml"), Some(&Value::Int(0)));
        assert_eq!(gateway.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_unordered_photometry_is_rejected() {
        let gateway = ScriptedGateway::new().respond(
            "FROM snObs",
            vec![
                photometry_row(100, 1, "g", 10.0, "r1"),
                photometry_row(200, 1, "g", 11.0, "r1"),
                photometry_row(100, 1, "g", 12.0, "r2"),
            ],
        );
        let options = LightCurveOptions::new(PhotometryTable::Snobs);
        let result =
            build_lightcurve(&gateway, &TablesConfig::default(), &options, &candidate(5)).await;
        assert!(matches!(
            result,
            Err(PipelineError::Reduce(ReduceError::NonContiguousGroup { index: 2 }))
        ));
    }

    #[tokio::test]
    async fn test_snforce_keeps_ccds_apart() {
        let gateway = ScriptedGateway::new()
            .respond(
                "FROM snForce",
                vec![
                    photometry_row(100, 1, "r", 10.0, "r1"),
                    photometry_row(100, 2, "r", 11.0, "r1"),
                    photometry_row(100, 2, "r", 13.0, "r2"),
                ],
            )
            .respond("FROM snGals", vec![]);
        let options = LightCurveOptions::new(PhotometryTable::Snforce);
        let lc = build_lightcurve(&gateway, &TablesConfig::default(), &options, &candidate(8))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            lc.data.column("Flux").unwrap(),
            [Value::Float(10.0), Value::Float(13.0)]
        );
        assert_eq!(lc.data.column("ZP").unwrap()[0], Value::Float(31.4));
    }

    #[tokio::test]
    async fn test_average_flux_query_is_optional() {
        let gateway = ScriptedGateway::new()
            .respond(
                "flux IS NOT NULL GROUP BY band",
                vec![Record::new()
                    .with("band", "i")
                    .with("avg_flux", 20.5)
                    .with("n_obs", 3_i64)],
            )
            .respond("FROM snObs", vec![photometry_row(1, 1, "i", 20.0, "r1")])
            .respond("FROM snGals", vec![]);
        let mut options = LightCurveOptions::new(PhotometryTable::Snobs);
        options.average_flux = true;

        let lc = build_lightcurve(&gateway, &TablesConfig::default(), &options, &candidate(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lc.meta.get("avg_flux_desi"), Some(&Value::Float(20.5)));
        assert_eq!(lc.meta.get("n_avg_bands"), Some(&Value::Int(1)));
        assert_eq!(gateway.queries().len(), 3);
    }

    #[test]
    fn test_fits_header() {
        let mut options = LightCurveOptions::new(PhotometryTable::Snforce);
        options.mjd.min = Some(56000.0);
        let header = options.fits_header();
        assert_eq!(header.get("source"), Some(&Value::from("SNFORCE")));
        assert_eq!(header.get("bands"), Some(&Value::from("desg,desr,desi,desz")));
        assert_eq!(header.get("mjdmin"), Some(&Value::Float(56000.0)));
        assert_eq!(header.get("mjdmax"), Some(&Value::Null));
    }
}
