use std::fs;

use dessn::{
    conf::TablesConfig,
    db::{Gateway, Record},
    model::Candidate,
    pipeline::{
        fetch_candidates, run_images, run_lightcurves, ImageOptions, LightCurveOptions,
        PipelineError, RunSummary,
    },
    query::CandidateSelection,
    transform::TransformError,
    utils::{
        enums::PhotometryTable,
        testing::{candidate_row, host_row, image_row, photometry_row, ScriptedGateway},
    },
    writer::{
        fits::{DATA_EXTENSION, META_EXTENSION, PTROBS_MAX, PTROBS_MIN},
        FileSink, FitsSink, FormatRegistry, Salt2Options, Strategy, WriteError,
    },
};

fn two_candidates() -> ScriptedGateway {
    ScriptedGateway::new()
        .respond(
            "FROM snCand",
            vec![candidate_row(1, 52.1, -27.5), candidate_row(2, 53.0, -28.1)],
        )
        .respond(
            "FROM snObs WHERE snid = 1 ",
            vec![
                photometry_row(100, 1, "g", 10.0, "r1"),
                photometry_row(100, 1, "g", 11.0, "r2"),
                photometry_row(200, 1, "r", 12.0, "r1"),
            ],
        )
        .respond("FROM snObs WHERE snid = 2 ", vec![])
        .respond("FROM snGals WHERE snid = 1 ", vec![host_row(77, 0.3)])
}

async fn candidates<G: Gateway + Sync>(gateway: &G) -> Vec<Candidate> {
    fetch_candidates(gateway, &TablesConfig::default(), &CandidateSelection::default())
        .await
        .unwrap()
}

fn ascii_registry() -> FormatRegistry {
    FormatRegistry::new(Salt2Options::default())
}

#[tokio::test]
async fn test_lightcurves_one_file_per_candidate() {
    let gateway = two_candidates();
    let candidates = candidates(&gateway).await;
    assert_eq!(candidates.len(), 2);

    let outdir = tempfile::tempdir().unwrap();
    let registry = ascii_registry();
    let Some(Strategy::File(writer)) = registry.get("ascii") else {
        panic!("ascii is a single-file format");
    };
    let mut sink = FileSink::new(writer.as_ref(), outdir.path(), false);
    let options = LightCurveOptions::new(PhotometryTable::Snobs);

    let summary = run_lightcurves(
        &gateway,
        &TablesConfig::default(),
        &options,
        &candidates,
        &mut sink,
    )
    .await
    .unwrap();
    assert_eq!(
        summary,
        RunSummary {
            written: 1,
            empty: 1,
            ..Default::default()
        }
    );

    let written = fs::read_to_string(outdir.path().join("00000001.dat")).unwrap();
    assert!(!outdir.path().join("00000002.dat").exists());
    assert!(written.contains("#snid: 1\n"));
    assert!(written.contains("#host_specz: 0.3\n"));
    let body: Vec<&str> = written.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(body.len(), 3);
    assert!(body[0].starts_with("Date Field Band Flux"));
    assert!(body[1].contains(" desg 11 "));
    assert!(body[2].contains(" desr 12 "));

    // candidate list, two photometry and one host query
    assert_eq!(gateway.queries().len(), 4);
}

#[tokio::test]
async fn test_existing_files_are_skipped_unless_overwrite() {
    let gateway = two_candidates();
    let candidates = candidates(&gateway).await;
    let outdir = tempfile::tempdir().unwrap();
    let existing = outdir.path().join("00000001.dat");
    fs::write(&existing, "keep me\n").unwrap();

    let registry = ascii_registry();
    let Some(Strategy::File(writer)) = registry.get("ascii") else {
        panic!("ascii is a single-file format");
    };
    let options = LightCurveOptions::new(PhotometryTable::Snobs);
    let tables = TablesConfig::default();

    let mut sink = FileSink::new(writer.as_ref(), outdir.path(), false);
    let summary = run_lightcurves(&gateway, &tables, &options, &candidates, &mut sink)
        .await
        .unwrap();
    assert_eq!(summary.skipped_existing, 1);
    assert_eq!(summary.written, 0);
    assert_eq!(fs::read_to_string(&existing).unwrap(), "keep me\n");

    let mut sink = FileSink::new(writer.as_ref(), outdir.path(), true);
    let summary = run_lightcurves(&gateway, &tables, &options, &candidates, &mut sink)
        .await
        .unwrap();
    assert_eq!(summary.written, 1);
    assert!(fs::read_to_string(&existing).unwrap().starts_with("#snid: 1"));
}

#[tokio::test]
async fn test_multiple_hosts_abort_the_run() {
    let gateway = ScriptedGateway::new()
        .respond(
            "FROM snCand",
            vec![candidate_row(4, 10.0, -2.0), candidate_row(5, 11.0, -2.0)],
        )
        .respond("FROM snObs", vec![photometry_row(10, 3, "i", 5.0, "r1")])
        .respond(
            "FROM snGals WHERE snid = 4 ",
            vec![host_row(1, 0.1), host_row(2, 0.2)],
        );
    let candidates = candidates(&gateway).await;
    let outdir = tempfile::tempdir().unwrap();
    let registry = ascii_registry();
    let Some(Strategy::File(writer)) = registry.get("csv") else {
        panic!("csv is a single-file format");
    };
    let mut sink = FileSink::new(writer.as_ref(), outdir.path(), false);

    let result = run_lightcurves(
        &gateway,
        &TablesConfig::default(),
        &LightCurveOptions::new(PhotometryTable::Snobs),
        &candidates,
        &mut sink,
    )
    .await;
    assert!(matches!(
        result,
        Err(PipelineError::Transform(TransformError::MultipleHosts { snid: 4, count: 2 }))
    ));
    // the second candidate was never queried
    assert!(gateway.queries().iter().all(|q| !q.contains("snid = 5 ")));
    assert_eq!(fs::read_dir(outdir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_fits_batch_offsets() {
    let gateway = ScriptedGateway::new()
        .respond(
            "FROM snCand",
            vec![
                candidate_row(1, 52.1, -27.5),
                candidate_row(2, 53.0, -28.1),
                candidate_row(3, 54.0, -29.0),
            ],
        )
        .respond(
            "FROM snObs WHERE snid = 1 ",
            vec![
                photometry_row(100, 1, "g", 10.0, "r1"),
                photometry_row(200, 1, "r", 12.0, "r1"),
            ],
        )
        .respond("FROM snObs WHERE snid = 2 ", vec![])
        .respond(
            "FROM snObs WHERE snid = 3 ",
            vec![photometry_row(300, 5, "z", 7.0, "r1")],
        )
        .respond("FROM snGals", vec![]);
    let candidates = candidates(&gateway).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.fits");
    let options = LightCurveOptions::new(PhotometryTable::Snobs);
    let mut sink = FitsSink::new(&path, options.fits_header()).unwrap();

    let summary = run_lightcurves(
        &gateway,
        &TablesConfig::default(),
        &options,
        &candidates,
        &mut sink,
    )
    .await
    .unwrap();
    assert_eq!(summary.batched, 2);
    assert_eq!(summary.empty, 1);

    let mut fptr = fitsio::FitsFile::open(&path).unwrap();
    let meta_hdu = fptr.hdu(META_EXTENSION).unwrap();
    let snids: Vec<i32> = meta_hdu.read_col(&mut fptr, "snid").unwrap();
    let starts: Vec<i32> = meta_hdu.read_col(&mut fptr, PTROBS_MIN).unwrap();
    let ends: Vec<i32> = meta_hdu.read_col(&mut fptr, PTROBS_MAX).unwrap();
    assert_eq!(snids, [1, 3]);
    assert_eq!(starts, [1, 3]);
    assert_eq!(ends, [2, 3]);

    let data_hdu = fptr.hdu(DATA_EXTENSION).unwrap();
    let fluxes: Vec<f64> = data_hdu.read_col(&mut fptr, "Flux").unwrap();
    assert_eq!(fluxes, [10.0, 12.0, 7.0]);
}

#[tokio::test]
async fn test_fits_batch_refuses_existing_destination() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.fits");
    fs::write(&path, b"").unwrap();
    assert!(FitsSink::new(&path, Record::new()).is_err());
}

#[tokio::test]
async fn test_images_search_box() {
    let gateway = ScriptedGateway::new()
        .respond("FROM snCand", vec![candidate_row(9, 0.001, -43.0)])
        .respond(
            "FROM snImage",
            vec![
                image_row(500, 10, "g", "r1"),
                image_row(500, 10, "g", "r2"),
                image_row(500, 11, "g", "r1"),
            ],
        );
    let candidates = candidates(&gateway).await;
    let outdir = tempfile::tempdir().unwrap();
    let registry = ascii_registry();
    let Some(Strategy::File(writer)) = registry.get("json") else {
        panic!("json is a single-file format");
    };
    let mut sink = FileSink::new(writer.as_ref(), outdir.path(), false);
    let options = ImageOptions {
        box_size: 30.0,
        mjd: Default::default(),
    };

    let summary = run_images(
        &gateway,
        &TablesConfig::default(),
        &options,
        &candidates,
        &mut sink,
    )
    .await
    .unwrap();
    assert_eq!(summary.written, 1);

    let queries = gateway.queries();
    let image_query = &queries[1];
    // a box this close to ra = 0 also covers the top of the ra range
    assert!(image_query.contains(" OR "));
    assert!(image_query.ends_with("ORDER BY expnum, ccdnum, run"));

    let content = fs::read_to_string(outdir.path().join("00000009.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed["meta"]["n_images"], 2);
    assert_eq!(parsed["data"]["Run"], serde_json::json!(["r2", "r1"]));
    assert_eq!(parsed["meta"]["snid"], serde_json::json!(9));
    assert!(parsed["meta"].get("box_size").is_some());
}

fn average_flux_row(band: &str, avg_flux: f64, n_obs: i64) -> Record {
    Record::new()
        .with("band", band)
        .with("avg_flux", avg_flux)
        .with("n_obs", n_obs)
}

#[tokio::test]
async fn test_fits_batch_with_average_flux_over_different_bands() {
    let gateway = ScriptedGateway::new()
        .respond(
            "FROM snCand",
            vec![candidate_row(1, 52.1, -27.5), candidate_row(2, 53.0, -28.1)],
        )
        .respond(
            "WHERE snid = 1 AND flux IS NOT NULL",
            vec![average_flux_row("g", 10.5, 2), average_flux_row("r", 12.0, 1)],
        )
        .respond(
            "WHERE snid = 2 AND flux IS NOT NULL",
            vec![average_flux_row("g", 7.0, 1)],
        )
        .respond(
            "FROM snObs WHERE snid = 1 ",
            vec![
                photometry_row(100, 1, "g", 10.0, "r1"),
                photometry_row(200, 1, "r", 12.0, "r1"),
            ],
        )
        .respond(
            "FROM snObs WHERE snid = 2 ",
            vec![photometry_row(300, 5, "g", 7.0, "r1")],
        )
        .respond("FROM snGals", vec![]);
    let candidates = candidates(&gateway).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.fits");
    let mut options = LightCurveOptions::new(PhotometryTable::Snobs);
    options.average_flux = true;
    let mut sink = FitsSink::new(&path, options.fits_header()).unwrap();

    let summary = run_lightcurves(
        &gateway,
        &TablesConfig::default(),
        &options,
        &candidates,
        &mut sink,
    )
    .await
    .unwrap();
    assert_eq!(summary.batched, 2);

    let mut fptr = fitsio::FitsFile::open(&path).unwrap();
    let meta_hdu = fptr.hdu(META_EXTENSION).unwrap();
    let desg: Vec<f64> = meta_hdu.read_col(&mut fptr, "avg_flux_desg").unwrap();
    let desr: Vec<f64> = meta_hdu.read_col(&mut fptr, "avg_flux_desr").unwrap();
    let n_obs_desr: Vec<i32> = meta_hdu.read_col(&mut fptr, "n_obs_desr").unwrap();
    let n_bands: Vec<i32> = meta_hdu.read_col(&mut fptr, "n_avg_bands").unwrap();
    assert_eq!(desg, [10.5, 7.0]);
    assert_eq!(desr[0], 12.0);
    assert!(desr[1].is_nan());
    assert_eq!(n_obs_desr, [1, 0]);
    assert_eq!(n_bands, [2, 1]);
}

#[tokio::test]
async fn test_rejected_output_leaves_no_file() {
    // image tables have no photometric system column, which pedantic SALT2 requires
    let gateway = ScriptedGateway::new()
        .respond("FROM snCand", vec![candidate_row(9, 52.1, -27.5)])
        .respond("FROM snImage", vec![image_row(500, 10, "g", "r1")]);
    let candidates = candidates(&gateway).await;
    let outdir = tempfile::tempdir().unwrap();
    let registry = FormatRegistry::new(Salt2Options {
        raw: false,
        pedantic: true,
    });
    let Some(Strategy::File(writer)) = registry.get("salt2") else {
        panic!("salt2 is a single-file format");
    };
    let options = ImageOptions {
        box_size: 30.0,
        mjd: Default::default(),
    };

    for _ in 0..2 {
        let mut sink = FileSink::new(writer.as_ref(), outdir.path(), false);
        let result = run_images(
            &gateway,
            &TablesConfig::default(),
            &options,
            &candidates,
            &mut sink,
        )
        .await;
        assert!(matches!(
            result,
            Err(PipelineError::Write(WriteError::MissingColumns(_)))
        ));
        assert_eq!(fs::read_dir(outdir.path()).unwrap().count(), 0);
    }
}
