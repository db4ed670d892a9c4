use dessn::{
    cli::{CommonArgs, ConfigurationError, MjdArgs, OutputArgs, SelectionArgs},
    conf::{load_dotenv, AppConfig, DEFAULT_CONFIG_PATH},
    db::{build_gateway, GatewayError},
    pipeline::{fetch_candidates, run_images, ImageOptions, PipelineError},
    utils::o11y::{init_logging, log_error},
    writer::{FormatRegistry, Salt2Options, WriteError},
};

use clap::Parser;
use tracing::{info, instrument};

/// List the processed CCD images overlapping DES supernova candidates.
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    selection: SelectionArgs,

    #[command(flatten)]
    output: OutputArgs,

    /// Half-width of the search box around each candidate, in arcsec
    #[arg(long, value_name = "ARCSEC", default_value_t = 30.0)]
    box_size: f64,

    #[command(flatten)]
    mjd: MjdArgs,

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

#[instrument(skip_all, fields(format = %args.output.format))]
async fn run(args: Cli) -> Result<(), RunError> {
    let selection = args.selection.restricted_selection()?;
    if !(args.box_size > 0.0) {
        return Err(ConfigurationError::BoxSize(args.box_size).into());
    }
    let options = ImageOptions {
        box_size: args.box_size,
        mjd: args.mjd.range()?,
    };
    let registry = FormatRegistry::new(Salt2Options::default());
    let target = args.output.target(&registry)?;
    let config_path = args.common.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config = AppConfig::from_path(config_path).map_err(ConfigurationError::from)?;
    let mut sink = target.into_sink(args.output.overwrite, options.fits_header())?;

    let gateway = build_gateway(&config).await?;
    let candidates = fetch_candidates(&gateway, &config.tables, &selection).await?;
    let summary = run_images(
        &gateway,
        &config.tables,
        &options,
        &candidates,
        sink.as_mut(),
    )
    .await?;
    info!(?summary, "image export finished");
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
