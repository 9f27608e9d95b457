use anyhow::{Context, Result};
use stack::StackConfig;
use std::path::Path;
use tracing::debug;

/// Resolve the stack configuration
///
/// An explicit file wins over `STACK_CONFIG`; `STACK_*` variables (and a
/// `.env` file) override either. The result is validated.
pub fn load_config(path: Option<&Path>) -> Result<StackConfig> {
    let config = match path {
        Some(path) => {
            debug!("Loading stack configuration from {}", path.display());
            let mut config = StackConfig::from_file(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => StackConfig::from_env()?,
    };
    config
        .validate()
        .context("Stack configuration is invalid")?;
    Ok(config)
}
