use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use dessn::{
    cli::{single_writer, CommonArgs, ConfigurationError, SelectionArgs},
    conf::{load_dotenv, AppConfig, DEFAULT_CONFIG_PATH},
    db::{build_gateway, GatewayError, Record},
    lightcurve::LightCurve,
    pipeline::{fetch_candidates, PipelineError},
    transform::{candidate_table, TransformError},
    utils::o11y::{init_logging, log_error},
    writer::{FormatRegistry, Salt2Options, WriteError},
};

use clap::Parser;
use tracing::{info, instrument};

/// Print the DES supernova candidates matching a selection.
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Output format: ascii, csv, json or salt2
    #[arg(long, default_value = "ascii")]
    format: String,

    /// Write to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Replace an existing output file
    #[arg(long)]
    overwrite: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error("invalid arguments")]
    Configuration(#[from] ConfigurationError),
    #[error("could not connect to the database")]
    Gateway(#[from] GatewayError),
    #[error("could not build the candidate table")]
    Transform(#[from] TransformError),
    #[error("could not write the candidate table")]
    Write(#[from] WriteError),
    #[error("could not write the candidate table")]
    Io(#[from] std::io::Error),
    #[error("candidate query failed")]
    Pipeline(#[from] PipelineError),
}

#[instrument(skip_all, fields(format = %args.format))]
async fn run(args: Cli) -> Result<(), RunError> {
    let selection = args.selection.selection()?;
    let registry = FormatRegistry::single_file(Salt2Options {
        raw: true,
        pedantic: false,
    });
    let writer = single_writer(&registry, &args.format)?;
    if let Some(path) = &args.output {
        if path.exists() && !args.overwrite {
            return Err(ConfigurationError::OutputExists(path.clone()).into());
        }
    }
    let config_path = args.common.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config = AppConfig::from_path(config_path).map_err(ConfigurationError::from)?;

    let gateway = build_gateway(&config).await?;
    let candidates = fetch_candidates(&gateway, &config.tables, &selection).await?;
    let meta = Record::new()
        .with("n_candidates", candidates.len() as i64)
        .with("fakes", selection.fakes.as_str());
    let table = LightCurve::new(0, meta, candidate_table(&candidates)?);

    match &args.output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            writer.write(&table, &mut out)?;
            out.flush()?;
            info!(path = %path.display(), n_candidates = candidates.len(), "wrote candidate list");
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            writer.write(&table, &mut out)?;
            out.flush()?;
        }
    }
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
