//! Merge rules: built-in defaults under every other layer.

use crate::config::RuntimeConfig;
use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let runtime = RuntimeConfig::default();
    Config::builder()
        .set_default(
            "runtime.transaction_timeout_ms",
            runtime.transaction_timeout_ms as i64,
        )?
        .set_default("runtime.max_retries", runtime.max_retries as i64)?
        .set_default("runtime.retry_delay_ms", runtime.retry_delay_ms as i64)?
        .set_default("runtime.max_retry_delay_ms", runtime.max_retry_delay_ms as i64)?
        .set_default("runtime.backoff", "linear")?
        .set_default("runtime.max_queue_size", runtime.max_queue_size as i64)?
        .set_default("storage.temporary", false)?
        .set_default("storage.flush_on_commit", false)?
        .set_default("logging.level", "info")
}
