//! Common observability utilities.
//!
//! The programs log through `tracing`. The subscriber built here writes to
//! stderr so that `list_candidates` can stream its table on stdout.
//!
use tracing::Subscriber;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Layer};

/// The error type returned when building a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BuildSubscriberError {
    #[error("failed to parse filtering directive")]
    Parse(#[from] tracing_subscriber::filter::ParseError),
    #[error("failed to install subscriber")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Default filtering directive for a `-v` count: info, then debug, then trace.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Build a tracing subscriber. `RUST_LOG` takes precedence over the
/// verbosity-derived default.
pub fn build_subscriber(
    verbose: u8,
) -> Result<impl Subscriber + Send + Sync, BuildSubscriberError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_span_events(FmtSpan::NONE);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level_for_verbosity(verbose)))?;
    Ok(tracing_subscriber::registry().with(fmt_layer.with_filter(env_filter)))
}

/// Build the subscriber and install it as the global default.
pub fn init_logging(verbose: u8) -> Result<(), BuildSubscriberError> {
    let subscriber = build_subscriber(verbose)?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// An error followed by each of its sources, separated by `: `.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Log an error together with its sources.
pub fn log_error(err: &dyn std::error::Error) {
    tracing::error!(error = %error_chain(err), "run failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), "info");
        assert_eq!(level_for_verbosity(1), "debug");
        assert_eq!(level_for_verbosity(5), "trace");
    }

    #[test]
    fn test_build_subscriber() {
        assert!(build_subscriber(1).is_ok());
    }

    #[test]
    fn test_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::NotFound, "inner"));
        assert_eq!(error_chain(&err), "outer: inner");
    }
}
