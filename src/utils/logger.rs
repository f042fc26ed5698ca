use anyhow::Context;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub rolling: Option<String>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Print thread names; the engine names its dispatch and timer threads.
    #[serde(default = "default_thread_names")]
    pub thread_names: bool,
}

fn default_max_files() -> usize {
    2
}

fn default_thread_names() -> bool {
    true
}

impl LoggerConfig {
    /// Reads `STACKRT_LOG_LEVEL`, `STACKRT_LOG_DIR`, `STACKRT_LOG_PREFIX` and
    /// `STACKRT_LOG_ROLLING`; unset variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: std::env::var("STACKRT_LOG_LEVEL").unwrap_or(defaults.level),
            file_dir: std::env::var("STACKRT_LOG_DIR").ok(),
            file_prefix: std::env::var("STACKRT_LOG_PREFIX").ok(),
            rolling: std::env::var("STACKRT_LOG_ROLLING").ok().or(defaults.rolling),
            ..defaults
        }
    }

    fn rotation(&self) -> Rotation {
        match self.rolling.as_deref() {
            Some("hourly") => Rotation::HOURLY,
            Some("minutely") => Rotation::MINUTELY,
            Some("never") => Rotation::NEVER,
            _ => Rotation::DAILY,
        }
    }

    /// Installs the global subscriber. Returns the writer guard when logging
    /// to files; dropping it flushes and stops the background writer.
    pub fn init(&self) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_thread_names(self.thread_names)
                .try_init();
            tracing::debug!("logging to stdout");
            return Ok(None);
        };

        let prefix = self.file_prefix.as_deref().unwrap_or("stackrt");
        let appender = RollingFileAppender::builder()
            .rotation(self.rotation())
            .max_log_files(self.max_files)
            .filename_prefix(prefix)
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {dir}"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_thread_names(self.thread_names)
            .with_ansi(false)
            .with_writer(writer)
            .try_init();

        tracing::info!(
            "logging to dir: {}, prefix: {}, rotation: {:?}",
            dir,
            prefix,
            self.rolling
        );
        Ok(Some(guard))
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Some("daily".to_string()),
            max_files: default_max_files(),
            thread_names: default_thread_names(),
        }
    }
}

/// Process-wide monotonic origin for [`Throttle`] timestamps.
fn throttle_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Per-callsite rate limiter for log lines.
///
/// Lets one message through per `interval`, counting the ones suppressed in
/// between so the next emitted line can report them.
pub struct Throttle {
    /// Nanoseconds since [`throttle_epoch`] of the last emitted line, plus one
    /// (zero means nothing emitted yet).
    last_emit: AtomicU64,
    suppressed: AtomicU64,
    interval: Duration,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_emit: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            interval,
        }
    }

    /// Returns `Some(suppressed_count)` when the caller may log now.
    #[inline]
    pub fn poll(&self) -> Option<u64> {
        let now = throttle_epoch().elapsed().as_nanos() as u64 + 1;
        let last = self.last_emit.load(Ordering::Relaxed);
        let due = last == 0 || now.saturating_sub(last) >= self.interval.as_nanos() as u64;
        if due
            && self
                .last_emit
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            return Some(self.suppressed.swap(0, Ordering::Relaxed));
        }
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        None
    }
}

/// Logs at `$level` at most once per `$interval` for this callsite.
#[macro_export]
macro_rules! log_throttled {
    ($level:ident, $interval:expr, $($arg:tt)*) => {{
        static THROTTLE: std::sync::OnceLock<$crate::utils::logger::Throttle> =
            std::sync::OnceLock::new();
        let throttle = THROTTLE.get_or_init(|| $crate::utils::logger::Throttle::new($interval));
        if let Some(suppressed) = throttle.poll() {
            if suppressed > 0 {
                tracing::$level!(suppressed, $($arg)*);
            } else {
                tracing::$level!($($arg)*);
            }
        }
    }};
}

#[macro_export]
macro_rules! error_throttled { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(error, $interval, $($arg)*) } }
#[macro_export]
macro_rules! warn_throttled  { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(warn,  $interval, $($arg)*) } }
#[macro_export]
macro_rules! debug_throttled { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(debug, $interval, $($arg)*) } }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_counts_suppressed_lines() {
        let t = Throttle::new(Duration::from_secs(60));
        assert_eq!(t.poll(), Some(0));
        assert_eq!(t.poll(), None);
        assert_eq!(t.poll(), None);
        assert_eq!(t.suppressed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn throttled_macros_work_as_match_arms() {
        for value in [Ok(1u8), Err("bad")] {
            match value {
                Ok(v) => crate::debug_throttled!(Duration::from_secs(1), "value {}", v),
                Err(e) => crate::warn_throttled!(Duration::from_secs(1), "failed: {}", e),
            }
        }
        crate::error_throttled!(Duration::from_secs(1), "done");
    }

    #[test]
    fn zero_interval_never_suppresses() {
        let t = Throttle::new(Duration::ZERO);
        assert!(t.poll().is_some());
        assert!(t.poll().is_some());
    }
}
