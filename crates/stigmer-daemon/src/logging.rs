// Logging setup: env-filter from LOG_LEVEL, pretty output in local mode.

use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

pub fn init(config: &DaemonConfig) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // try_init: tests and embedders may already have a subscriber.
    let result = if config.is_local() {
        builder.pretty().try_init()
    } else {
        builder.compact().try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
