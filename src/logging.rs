//! Tracing subscriber setup with a runtime-reloadable level filter.
//!
//! The daemon re-applies the configured log level after every successful
//! configuration reload, so the global filter sits behind a
//! `tracing_subscriber::reload` layer and the handle is passed to whoever
//! needs to adjust it (the kernel and the `config.reload` handler).

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry};

/// Numeric log levels as they appear in the configuration file.
///
/// 0=DEBUG, 1=INFO, 2=WARN, 3=ERROR, 4=CRITICAL. Tracing has no level above
/// ERROR, so CRITICAL shares the ERROR ceiling.
pub fn level_filter_for(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::DEBUG,
        1 => LevelFilter::INFO,
        2 => LevelFilter::WARN,
        3 | 4 => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Handle for adjusting the global log level at runtime.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    /// Swap the active level filter. Errors only occur if the subscriber has
    /// been dropped, which cannot happen for the process-global one.
    pub fn set_level(&self, level: u8) {
        let filter = level_filter_for(level);
        if let Err(e) = self.handle.reload(filter) {
            tracing::warn!("failed to update log level: {e}");
        }
    }
}

/// Install the process-global subscriber and return the reload handle.
///
/// Foreground mode uses the pretty human-readable format; otherwise output
/// is compact single-line, suitable for journald capture. `verbose` forces
/// DEBUG regardless of the configured level.
pub fn init(foreground: bool, verbose: bool) -> LogHandle {
    let initial = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let (filter, handle) = reload::Layer::new(initial);
    let registry = tracing_subscriber::registry().with(filter);

    if foreground {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }

    LogHandle { handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_levels_map_to_filters() {
        assert_eq!(level_filter_for(0), LevelFilter::DEBUG);
        assert_eq!(level_filter_for(1), LevelFilter::INFO);
        assert_eq!(level_filter_for(2), LevelFilter::WARN);
        assert_eq!(level_filter_for(3), LevelFilter::ERROR);
        assert_eq!(level_filter_for(4), LevelFilter::ERROR);
        // Out-of-range values fall back to INFO rather than silencing logs.
        assert_eq!(level_filter_for(99), LevelFilter::INFO);
    }
}
