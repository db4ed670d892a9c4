use dessn::{
    cli::{
        parse_bands, salt2_options, CommonArgs, ConfigurationError, MjdArgs, OutputArgs,
        SelectionArgs,
    },
    conf::{load_dotenv, AppConfig, DEFAULT_CONFIG_PATH},
    db::{build_gateway, GatewayError},
    pipeline::{fetch_candidates, run_lightcurves, LightCurveOptions, PipelineError},
    utils::{
        enums::PhotometryTable,
        o11y::{init_logging, log_error},
    },
    writer::{FormatRegistry, WriteError},
};

use clap::Parser;
use tracing::{info, instrument};

/// Export the light curves of DES supernova candidates, one file per
/// candidate or one FITS file for all of them.
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Photometry table to read
    #[arg(long, value_enum, default_value = "snobs")]
    table: PhotometryTable,

    #[command(flatten)]
    output: OutputArgs,

    #[command(flatten)]
    mjd: MjdArgs,

    /// Output names of the g, r, i and z bands, comma separated
    #[arg(long, value_name = "G,R,I,Z")]
    bandnames: Option<String>,

    /// Add the mean flux of every band to the metadata
    #[arg(long)]
    average_flux: bool,

    /// Keep the canonical column names in SALT2 output
    #[arg(long)]
    raw: bool,

    /// Refuse SALT2 output without Filter and MagSys columns
    #[arg(long)]
    pedantic: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error("invalid arguments")]
    Configuration(#[from] ConfigurationError),
    #[error("could not connect to the database")]
    Gateway(#[from] GatewayError),
    #[error("could not open output")]
    Write(#[from] WriteError),
    #[error("export failed")]
    Pipeline(#[from] PipelineError),
}

#[instrument(skip_all, fields(table = %args.table, format = %args.output.format))]
async fn run(args: Cli) -> Result<(), RunError> {
    let selection = args.selection.restricted_selection()?;
    let options = LightCurveOptions {
        source: args.table,
        bands: parse_bands(args.bandnames.as_deref())?,
        mjd: args.mjd.range()?,
        average_flux: args.average_flux,
    };
    let registry = FormatRegistry::new(salt2_options(args.raw, args.pedantic)?);
    let target = args.output.target(&registry)?;
    let config_path = args.common.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config = AppConfig::from_path(config_path).map_err(ConfigurationError::from)?;
    let mut sink = target.into_sink(args.output.overwrite, options.fits_header())?;

    let gateway = build_gateway(&config).await?;
    let candidates = fetch_candidates(&gateway, &config.tables, &selection).await?;
    let summary = run_lightcurves(
        &gateway,
        &config.tables,
        &options,
        &candidates,
        sink.as_mut(),
    )
    .await?;
    info!(?summary, "light curve export finished");
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file before anything else
    load_dotenv();

    let args = Cli::parse();
    if let Err(e) = init_logging(args.common.verbose) {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        log_error(&e);
        std::process::exit(1);
    }
}
