//! Logger bootstrap for host applications.

use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info",
/// "arken=debug,wgpu=warn").
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Filter directives; `RUST_LOG` is consulted when unset.
    pub env_filter: Option<String>,
}

static INIT: Once = Once::new();

/// Initializes the global logger once.
///
/// This function is idempotent; subsequent calls are ignored.
/// Intended usage is early in `main`, before device creation, so that
/// adapter selection and validation output are captured.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.env_filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            // wgpu is chatty at info level; keep the default at warn
            // for dependencies and info for the engine itself.
            builder.filter_level(log::LevelFilter::Warn);
            builder.filter_module("arken", log::LevelFilter::Info);
        }

        builder.init();

        log::debug!("logging initialized");
    });
}
