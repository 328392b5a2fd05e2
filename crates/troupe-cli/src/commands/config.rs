use anyhow::{Context, Result};
use std::path::Path;
use troupe_core::config::TroupeConfig;

/// Parses `path` and renders the effective configuration, defaults filled in.
pub fn check(path: &Path) -> Result<String> {
    let config = TroupeConfig::load(path)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    tracing::debug!(target: "troupe::system", path = %path.display(), "Config is valid");
    Ok(config.to_toml_string()?)
}
