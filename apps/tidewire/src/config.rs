use std::time::Duration;

pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_OUTBOUND_WARN_DEPTH: usize = 256;

const ENV_RENDER_TIMEOUT_MS: &str = "TIDEWIRE_RENDER_TIMEOUT_MS";
const ENV_DETAILED_ERRORS: &str = "TIDEWIRE_DETAILED_ERRORS";
const ENV_OUTBOUND_WARN_DEPTH: &str = "TIDEWIRE_OUTBOUND_WARN_DEPTH";

/// Per-circuit render settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// How long a dispatched batch may stay unacknowledged before it faults.
    pub render_timeout: Duration,
    /// Send fault details to the client instead of a generic message.
    pub detailed_errors: bool,
    /// Outbound queue depth above which sends are logged as backed up.
    pub outbound_warn_depth: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            detailed_errors: false,
            outbound_warn_depth: DEFAULT_OUTBOUND_WARN_DEPTH,
        }
    }
}

impl RenderConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            render_timeout: parse_duration_env(ENV_RENDER_TIMEOUT_MS, DEFAULT_RENDER_TIMEOUT),
            detailed_errors: std::env::var(ENV_DETAILED_ERRORS)
                .map(|value| parse_flag(&value))
                .unwrap_or(false),
            outbound_warn_depth: parse_usize_env(
                ENV_OUTBOUND_WARN_DEPTH,
                DEFAULT_OUTBOUND_WARN_DEPTH,
                1,
            ),
        }
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_detailed_errors(mut self, detailed: bool) -> Self {
        self.detailed_errors = detailed;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_duration_env(var: &str, default: Duration) -> Duration {
    match std::env::var(var) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(0) => {
                tracing::warn!(
                    target = "tidewire::config",
                    var,
                    default_ms = default.as_millis() as u64,
                    "zero duration is not allowed; using default"
                );
                default
            }
            Ok(ms) => Duration::from_millis(ms),
            Err(err) => {
                tracing::warn!(
                    target = "tidewire::config",
                    var,
                    error = %err,
                    default_ms = default.as_millis() as u64,
                    "invalid duration env; using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_usize_env(var: &str, default: usize, min: usize) -> usize {
    match std::env::var(var) {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(parsed) if parsed >= min => parsed,
            Ok(parsed) => {
                tracing::warn!(
                    target = "tidewire::config",
                    var,
                    parsed,
                    min,
                    default,
                    "config value below minimum; using default"
                );
                default
            }
            Err(err) => {
                tracing::warn!(
                    target = "tidewire::config",
                    var,
                    error = %err,
                    default,
                    "failed to parse config from env; using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{LazyLock, Mutex};

    // Environment variables are process-wide; serialize the tests that touch them.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn clear_env() {
        unsafe {
            env::remove_var(ENV_RENDER_TIMEOUT_MS);
            env::remove_var(ENV_DETAILED_ERRORS);
            env::remove_var(ENV_OUTBOUND_WARN_DEPTH);
        }
    }

    #[test_timeout::timeout]
    fn defaults_match_protocol_constants() {
        let config = RenderConfig::default();
        assert_eq!(config.render_timeout, Duration::from_secs(60));
        assert!(!config.detailed_errors);
        assert_eq!(config.outbound_warn_depth, 256);
    }

    #[test_timeout::timeout]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_RENDER_TIMEOUT_MS, "1500");
            env::set_var(ENV_DETAILED_ERRORS, "yes");
            env::set_var(ENV_OUTBOUND_WARN_DEPTH, "8");
        }
        let config = RenderConfig::from_env();
        clear_env();

        assert_eq!(config.render_timeout, Duration::from_millis(1500));
        assert!(config.detailed_errors);
        assert_eq!(config.outbound_warn_depth, 8);
    }

    #[test_timeout::timeout]
    fn from_env_ignores_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_RENDER_TIMEOUT_MS, "soon");
            env::set_var(ENV_DETAILED_ERRORS, "maybe");
            env::set_var(ENV_OUTBOUND_WARN_DEPTH, "0");
        }
        let config = RenderConfig::from_env();
        clear_env();

        assert_eq!(config, RenderConfig::default());
    }
}
