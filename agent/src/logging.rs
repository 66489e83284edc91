//! Structured log output: one JSON object per line with an RFC3339 UTC `timestamp`,
//! filtered at the severity named by `LOG_LEVEL`.
//!
//! The subscriber is an ordinary value: `main` installs it globally with [`init`],
//! tests scope one to a thread with `tracing::subscriber::set_default`.

use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

/// Map a severity name to a level filter. Unknown or missing names fall back to `info`
/// without complaint. `fatal` and `panic` have no tracing level of their own and map
/// to `error`.
pub fn parse_level(value: Option<&str>) -> LevelFilter {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("trace") => LevelFilter::TRACE,
        Some("debug") => LevelFilter::DEBUG,
        Some("info") => LevelFilter::INFO,
        Some("warn") | Some("warning") => LevelFilter::WARN,
        Some("error") | Some("fatal") | Some("panic") => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

pub fn level_from_env() -> LevelFilter {
    parse_level(std::env::var(LOG_LEVEL_VAR).ok().as_deref())
}

pub fn subscriber<W>(level: LevelFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let log_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .with_filter(level);

    tracing_subscriber::registry().with(log_layer)
}

/// Install the stdout subscriber for the whole process. Panics if called twice.
pub fn init(level: LevelFilter) {
    subscriber(level, std::io::stdout).init();
}
