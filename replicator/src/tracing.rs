use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to set global tracing subscriber"))]
    SetGlobalTracingSubscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

/// Installs a console [`tracing_subscriber::fmt`] layer filtered by `RUST_LOG` (default `info`).
/// No OTLP exporter: this daemon ships spans to stdout only, the way every other ambient
/// concern here stays local to the process.
pub fn init() -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context(SetGlobalTracingSubscriberSnafu)
}
