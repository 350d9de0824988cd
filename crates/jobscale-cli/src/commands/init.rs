//! `jobscale init` — write a starter jobscale.toml.

use std::path::Path;

use anyhow::{Result, bail};
use tracing::info;

use crate::config::JobscaleConfig;

pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, JobscaleConfig::scaffold().to_toml_string()?)?;
    info!(path = %path.display(), "wrote starter configuration");
    println!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobscale.toml");

        init(&path, false).unwrap();
        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();

        let config = JobscaleConfig::from_file(&path).unwrap();
        assert_eq!(config.workers.len(), 1);
    }
}
