//! Diagnostic logging setup
//!
//! Everything goes to stderr; stdout belongs to the app being launched.

use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

/// Filter used when RUST_LOG is not set
pub fn filter_directive(verbose: bool, cli_level: Option<&str>, default_level: Option<&str>) -> String {
    if verbose {
        return "debug".to_string();
    }
    cli_level
        .or(default_level)
        .unwrap_or(DEFAULT_LEVEL)
        .to_string()
}

pub fn init(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_wins() {
        assert_eq!(filter_directive(true, Some("warn"), Some("error")), "debug");
    }

    #[test]
    fn cli_over_defaults_over_builtin() {
        assert_eq!(filter_directive(false, Some("warn"), Some("error")), "warn");
        assert_eq!(filter_directive(false, None, Some("error")), "error");
        assert_eq!(filter_directive(false, None, None), "info");
    }
}
