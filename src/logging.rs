//! Logging setup for the transcription pipeline.
//!
//! Every stage (acquisition, isolation, transcription, publish) emits
//! structured `tracing` events keyed by stage name; this module wires the
//! subscriber they land in. `RUST_LOG` overrides the filter (default
//! `tubescribe=info`), and `RUST_LOG_FORMAT=json` switches to line-JSON for
//! log shippers. Output goes to stderr so run outcomes on stdout stay
//! machine-readable.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "tubescribe=info";

fn json_requested() -> bool {
    std::env::var("RUST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Idempotent: later calls lose the
/// `try_init` race and are ignored.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json_requested() {
        let _ = builder.json().with_current_span(false).try_init();
    } else {
        let _ = builder.compact().try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
    }

    #[test]
    fn default_filter_scopes_to_this_crate() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        assert!(format!("{filter:?}").contains("tubescribe"));
    }
}
