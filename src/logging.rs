//! Logging setup
//!
//! Dependencies log at `warn`; this crate logs at `info` unless `RUST_LOG`
//! names it explicitly.

use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = "tubedesk";

/// Filter directive for a given `RUST_LOG` value
fn filter_directive(env: Option<&str>) -> String {
    let env = env.map(str::trim).unwrap_or_default();
    if env.is_empty() {
        format!("warn,{CRATE_TARGET}=info")
    } else if env.contains(CRATE_TARGET) {
        env.to_string()
    } else {
        format!("{env},{CRATE_TARGET}=info")
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init() {
    let env = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::new(filter_directive(env.as_deref()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(None), "warn,tubedesk=info");
        assert_eq!(filter_directive(Some("  ")), "warn,tubedesk=info");
        assert_eq!(filter_directive(Some("debug")), "debug,tubedesk=info");
        assert_eq!(
            filter_directive(Some("info,tubedesk=trace")),
            "info,tubedesk=trace"
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init();
        tracing::info!("logging initialised");
    }
}
