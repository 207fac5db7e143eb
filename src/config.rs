//! Configuration: optional `config/voxpilot.*` file layered under
//! `VOXPILOT_*` environment overrides.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use step_flow::EngineConfig;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VoxConfig {
    /// Commands below this confidence are flagged for caller confirmation.
    pub confidence_threshold: f32,
    /// Attempt ceiling per step, first try included.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_cap_ms: u64,
    pub jitter_ratio: f64,
    pub step_timeout_ms: u64,
    /// Concurrency for read-only steps; 1 keeps everything sequential.
    pub parallel_limit: usize,
    pub context_ttl_secs: u64,
    pub memory_capacity: usize,
    pub memory_top_k: usize,
    pub session_idle_secs: u64,
}

impl Default for VoxConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_attempts: 3,
            backoff_ms: 300,
            backoff_cap_ms: 10_000,
            jitter_ratio: 0.2,
            step_timeout_ms: 30_000,
            parallel_limit: 1,
            context_ttl_secs: 3600,
            memory_capacity: 1024,
            memory_top_k: 5,
            session_idle_secs: 1800,
        }
    }
}

impl VoxConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/voxpilot").required(false))
            .add_source(Environment::with_prefix("VOXPILOT"))
            .build()?
            .try_deserialize()
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            jitter_ratio: self.jitter_ratio,
            step_timeout: Duration::from_millis(self.step_timeout_ms),
            parallel_limit: self.parallel_limit.max(1),
        }
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn session_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_idle_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = VoxConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.engine().parallel_limit, 1);
        assert_eq!(config.context_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn engine_config_clamps_zeroes() {
        let config = VoxConfig {
            max_attempts: 0,
            parallel_limit: 0,
            ..VoxConfig::default()
        };
        let engine = config.engine();
        assert_eq!(engine.max_attempts, 1);
        assert_eq!(engine.parallel_limit, 1);
    }
}
