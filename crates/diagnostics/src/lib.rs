//! Logging facade shared by the airquality crates.
//!
//! Output goes to stderr through `emit_term`. The level is read once from
//! the `AIRQUALITY_LOG` environment variable:
//! - `off` (default) - no logs
//! - `error`, `warn`, `info`, `debug` - minimum level shown

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable that selects the log level
pub const LOG_ENV: &str = "AIRQUALITY_LOG";

static INIT: Once = Once::new();

/// Parse a level name. `None` means logging is disabled.
///
/// Unknown names fall back to `Info`.
pub fn parse_level(value: &str) -> Option<emit::Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "" => None,
        "debug" => Some(emit::Level::Debug),
        "info" => Some(emit::Level::Info),
        "warn" => Some(emit::Level::Warn),
        "error" => Some(emit::Level::Error),
        _ => Some(emit::Level::Info),
    }
}

/// Initialize diagnostics from `AIRQUALITY_LOG`.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let value = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
        if let Some(level) = parse_level(&value) {
            init_with_level(level);
        }
    });
}

/// Like [`init_diagnostics`] but with an explicit minimum level, used by
/// the CLI's `--verbose` flag.
pub fn init_with_minimum(level: emit::Level) {
    INIT.call_once(|| init_with_level(level));
}

fn init_with_level(level: emit::Level) {
    let rt = emit::setup()
        .emit_to(emit_term::stderr())
        .emit_when(emit::level::min_filter(level))
        .init();
    // The runtime must outlive every emitter call for the process lifetime.
    std::mem::forget(rt);
}

/// Log basic operations (queries issued, rows received, tables combined)
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (page tokens, schema details, SQL text)
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable conditions (empty results, retries, fallbacks)
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that stop the current operation
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_diagnostics();
        init_with_minimum(emit::Level::Debug);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("off"), None);
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level("DEBUG"), Some(emit::Level::Debug));
        assert_eq!(parse_level("warn"), Some(emit::Level::Warn));
        assert_eq!(parse_level("error"), Some(emit::Level::Error));
        assert_eq!(parse_level("chatty"), Some(emit::Level::Info));
    }

    #[test]
    fn test_macros_compile() {
        info!("Test message");
        debug!("Debug message with {value}", value: 42);
        warn!("Warning message");
        error!("Error message");
    }
}
