use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env::{env_flag, env_opt};

/// Filter used by both binaries when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,actix_web=info";

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. `LOG_SOURCE_LOCATION=1` adds file and
/// line to every event; `NO_COLOR` disables ANSI escapes for log shippers.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let with_location = env_flag("LOG_SOURCE_LOCATION", false);

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(env_opt("NO_COLOR").is_none())
        .with_line_number(with_location)
        .with_file(with_location)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
