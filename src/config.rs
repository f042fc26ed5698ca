use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine tuning. Every field is optional in serialized form.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pin the dispatch thread to this core.
    pub core_id: Option<usize>,
    /// Pin the timer thread to this core.
    pub timer_core_id: Option<usize>,
    /// Upper bound of injected inputs moved into schedulers per loop turn.
    pub max_inputs_drain: Option<usize>,
    /// How long the idle dispatch thread parks before re-checking signals.
    pub idle_park_ms: Option<u64>,
    /// Timer clock resynchronisation period.
    pub timer_resync_ms: Option<u64>,
    /// Timer thread sleep ceiling when no timer is pending.
    pub timer_poll_ms: Option<u64>,
    /// Stop the engine on SIGTERM/SIGINT/SIGQUIT.
    pub handle_term_signals: bool,
    /// Dispatch thread name; the timer thread gets a `-timer` suffix.
    pub thread_name: Option<String>,
}

impl EngineConfig {
    pub const DEFAULT_MAX_INPUTS_DRAIN: usize = 1024;
    pub const DEFAULT_IDLE_PARK_MS: u64 = 100;
    pub const DEFAULT_TIMER_RESYNC_MS: u64 = 1000;
    pub const DEFAULT_TIMER_POLL_MS: u64 = 1000;

    /// Loads the config from a file, environment overrides use the
    /// `STACKRT` prefix.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        crate::utils::config_io::load_cfg_merge([path], Some("STACKRT"))
    }

    pub fn max_inputs_drain(&self) -> usize {
        self.max_inputs_drain
            .unwrap_or(Self::DEFAULT_MAX_INPUTS_DRAIN)
            .max(1)
    }

    pub fn idle_park(&self) -> Duration {
        Duration::from_millis(self.idle_park_ms.unwrap_or(Self::DEFAULT_IDLE_PARK_MS).max(1))
    }

    pub fn timer_resync(&self) -> Duration {
        Duration::from_millis(
            self.timer_resync_ms
                .unwrap_or(Self::DEFAULT_TIMER_RESYNC_MS)
                .max(1),
        )
    }

    pub fn timer_poll(&self) -> Duration {
        Duration::from_millis(self.timer_poll_ms.unwrap_or(Self::DEFAULT_TIMER_POLL_MS).max(1))
    }

    pub fn thread_name(&self) -> &str {
        self.thread_name.as_deref().unwrap_or("stackrt-dispatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: EngineConfig = serde_json::from_value(serde_json::json!({
            "timer_resync_ms": 250
        }))
        .unwrap();
        assert_eq!(cfg.timer_resync(), Duration::from_millis(250));
        assert_eq!(cfg.timer_poll(), Duration::from_millis(1000));
        assert_eq!(cfg.max_inputs_drain(), 1024);
        assert!(!cfg.handle_term_signals);
        assert_eq!(cfg.thread_name(), "stackrt-dispatch");
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("stackrt-cfg-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"idle_park_ms": 5, "thread_name": "edge"}"#).unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.idle_park(), Duration::from_millis(5));
        assert_eq!(cfg.thread_name(), "edge");
        assert_eq!(cfg.core_id, None);
    }
}
