//! Small shared helpers: UTC timestamp formatting, home expansion and the
//! per-second rate limiter used by both the control server and the LLM
//! admission gate.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Wire format for all persisted and transmitted timestamps.
const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp as an RFC-3339 UTC string (`YYYY-MM-DDTHH:MM:SSZ`).
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format(UTC_FORMAT).to_string()
}

/// Parse an RFC-3339 UTC string produced by [`format_utc`].
///
/// The construction goes through a naive datetime reinterpreted as UTC, so
/// the host's local-time offset is never applied.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, UTC_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Expand a leading `~` against the caller's home directory.
///
/// Paths without a `~` prefix (and paths of users without a resolvable home
/// directory) are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Windowed per-second rate limiter.
///
/// Counts admissions inside a wall-clock window; the window restarts once at
/// least 1000 ms have elapsed since it began. Used with one instance per
/// admission point (socket requests, LLM inferences).
#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: u32,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_second,
            window: Mutex::new(Window {
                count: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Try to admit one request. Returns `false` when the current window is
    /// already at the configured maximum.
    pub fn allow(&self) -> bool {
        let mut window = self.window.lock().expect("rate limiter lock poisoned");

        if window.started.elapsed().as_millis() >= 1000 {
            window.count = 0;
            window.started = Instant::now();
        }

        if window.count >= self.max_per_second {
            return false;
        }

        window.count += 1;
        true
    }

    /// Reset the window, forgetting all admissions.
    pub fn reset(&self) {
        let mut window = self.window.lock().expect("rate limiter lock poisoned");
        window.count = 0;
        window.started = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_roundtrip_is_lossless_at_second_precision() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let formatted = format_utc(ts);
        assert_eq!(formatted, "2025-03-14T15:09:26Z");
        assert_eq!(parse_utc(&formatted), Some(ts));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_utc("not a timestamp"), None);
        assert_eq!(parse_utc("2025-03-14 15:09:26"), None);
        assert_eq!(parse_utc(""), None);
    }

    #[test]
    fn expand_home_leaves_absolute_paths_alone() {
        assert_eq!(expand_home("/var/lib/x"), PathBuf::from("/var/lib/x"));
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn expand_home_rewrites_tilde_prefix() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x/y"), home.join("x/y"));
            assert_eq!(expand_home("~"), home);
        }
    }

    #[test]
    fn rate_limiter_caps_within_window() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn rate_limiter_reset_opens_window() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow());
        assert!(!limiter.allow());
        limiter.reset();
        assert!(limiter.allow());
    }
}
