//! Tracing subscriber setup.
//!
//! `RUST_LOG` picks the filter; `WALLETFILE_LOG_JSON=1` switches the output
//! from pretty text to JSON lines. Logs go to stderr so command output on
//! stdout stays machine-readable.

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_JSON: &str = "WALLETFILE_LOG_JSON";

const DEFAULT_FILTER: &str = "walletfile=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var(ENV_LOG_JSON).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1") | Some("true") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

pub fn init_logging() {
    init_logging_with(LogFormat::from_env());
}

pub fn init_logging_with(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    // try_init: a second call (tests, embedding apps) keeps the first subscriber.
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
