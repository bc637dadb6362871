//! Tracing initialisation for runners and tests

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install a console `tracing` subscriber filtered at `log_level`.
///
/// Falls back to `RUST_LOG`, then to `info`. Safe to call more than once.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        assert!(init_tracing("debug").is_ok());
        assert!(init_tracing("info").is_ok());
    }
}
