//! Diagnostic logging.
//!
//! Library code logs through `tracing`. The CLI installs a formatter on
//! stderr, filtered by the `BKA_LOG` environment variable (same syntax as
//! `RUST_LOG`, e.g. `BKA_LOG=book_analyzer=debug`). Defaults to `warn`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "BKA_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

fn filter_from(raw: Option<String>) -> EnvFilter {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init() {
    let filter = filter_from(std::env::var(LOG_ENV).ok());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_invalid_falls_back_to_warn() {
        assert_eq!(filter_from(None).to_string(), "warn");
        assert_eq!(filter_from(Some("  ".into())).to_string(), "warn");
        assert_eq!(filter_from(Some("debug".into())).to_string(), "debug");
    }
}
