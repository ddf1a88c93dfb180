//! Tracing setup
//!
//! Logs go to stderr; stdout carries the MCP protocol. `RUST_LOG` replaces the
//! default filter and `LOG_FORMAT=json` switches to structured output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "progress_mcp=info,progress_core=info";

/// `RUST_LOG` when set and parseable, otherwise the crate defaults
fn build_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init_tracing() -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(rust_log.as_deref());

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let filter = build_filter(None).to_string().to_lowercase();
        assert!(filter.contains("progress_mcp=info"));
        assert!(filter.contains("progress_core=info"));

        let blank = build_filter(Some("  ")).to_string().to_lowercase();
        assert!(blank.contains("progress_core=info"));
    }

    #[test]
    fn test_rust_log_is_not_overridden() {
        let filter = build_filter(Some("progress_core=debug"))
            .to_string()
            .to_lowercase();
        assert!(filter.contains("progress_core=debug"));
        assert!(!filter.contains("progress_core=info"));
    }
}
