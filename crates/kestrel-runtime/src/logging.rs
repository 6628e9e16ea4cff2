//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Output format for [`init_logging`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global fmt subscriber. The filter comes from `RUST_LOG`, or
/// `default_filter` when unset. Returns false if a subscriber was already
/// installed; calling twice is harmless.
pub fn init_logging(default_filter: &str, format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging("kestrel=debug", LogFormat::Pretty);
        assert!(!init_logging("kestrel=debug", LogFormat::Json));
    }
}
