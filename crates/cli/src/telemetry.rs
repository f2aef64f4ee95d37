// Logging setup
//
// Configure via environment variables:
// - RUST_LOG: full filter directive, wins when set
// - LOG_LEVEL: level for the stampede crates (default: info)

use tracing_subscriber::EnvFilter;

/// Filter directive from `RUST_LOG`, falling back to `LOG_LEVEL` for our crates
pub fn log_filter(rust_log: Option<String>, log_level: Option<String>) -> String {
    if let Some(filter) = rust_log.filter(|f| !f.trim().is_empty()) {
        return filter;
    }
    let level = log_level
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    format!("stampede_bench={level},stampede_cli={level}")
}

/// Install the global fmt subscriber
pub fn init() {
    let directive = log_filter(
        std::env::var("RUST_LOG").ok(),
        std::env::var("LOG_LEVEL").ok(),
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_wins() {
        assert_eq!(
            log_filter(Some("debug".into()), Some("warn".into())),
            "debug"
        );
    }

    #[test]
    fn test_log_level_applies_to_own_crates() {
        assert_eq!(
            log_filter(None, Some("trace".into())),
            "stampede_bench=trace,stampede_cli=trace"
        );
        assert_eq!(
            log_filter(Some("  ".into()), None),
            "stampede_bench=info,stampede_cli=info"
        );
    }
}
