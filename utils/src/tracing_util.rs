//! Helpers related to tracing, used by main entrypoints

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Build the event filter from `RUST_LOG`-style directives, showing warnings
/// and errors when none are given.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directives.unwrap_or_default())
}

/// Initialize tracing with the default configuration.
///
/// Verbose archive output (the list of written paths) does not go through
/// here; it is written directly to stderr by the archive driver.
pub fn initialize_tracing() {
    // Don't include timestamps and such because they're not really useful and
    // too verbose for a tool whose main output is a byte stream.
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    // Log to stderr by default; stdout may be carrying the archive.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(directives.as_deref()))
        .event_format(format)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter() {
        assert_eq!(env_filter(None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(env_filter(Some("")).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(
            env_filter(Some("debug")).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            env_filter(Some("gitarchive_lib=trace")).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
    }
}
