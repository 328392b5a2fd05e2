//! Directory-backed ResultRepository implementation

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use troupe_core::analysis::ScenarioResult;
use troupe_core::error::{Result, TroupeError};
use troupe_core::repository::ResultRepository;
use troupe_core::scenario::ScenarioInstance;

/// Stores instances and results as pretty-printed JSON files.
///
/// Directory structure:
/// ```text
/// base_dir/
/// ├── instances/
/// │   └── <instance-id>.json
/// └── results/
///     └── <instance-id>.json
/// ```
pub struct JsonDirResultRepository {
    base_dir: PathBuf,
}

impl JsonDirResultRepository {
    /// Creates a repository at the default location (~/.local/share/troupe).
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined or created.
    pub async fn default_location() -> anyhow::Result<Self> {
        let base_dir = dirs::data_dir()
            .map(|dir| dir.join("troupe"))
            .ok_or_else(|| anyhow::anyhow!("Failed to get data directory"))?;
        Self::new(base_dir).await
    }

    /// Creates a new repository rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory structure cannot be created.
    pub async fn new(base_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();

        for sub in ["instances", "results"] {
            fs::create_dir_all(base_dir.join(sub))
                .await
                .with_context(|| format!("Failed to create {sub} directory"))?;
        }

        Ok(Self { base_dir })
    }

    pub fn results_dir(&self) -> PathBuf {
        self.base_dir.join("results")
    }

    fn file_path(&self, kind: &str, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(TroupeError::internal(format!("invalid {kind} id '{id}'")));
        }
        Ok(self.base_dir.join(kind).join(format!("{id}.json")))
    }

    /// Writes via a temporary file and rename so readers never see a partial file.
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let content = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultRepository for JsonDirResultRepository {
    async fn create_scenario_instance(&self, instance: &ScenarioInstance) -> Result<()> {
        let path = self.file_path("instances", &instance.id)?;
        self.write_json(&path, instance).await?;
        tracing::debug!(target: "troupe::system", scenario_id = %instance.id, "Stored scenario instance");
        Ok(())
    }

    async fn create_scenario_result(&self, result: &ScenarioResult) -> Result<()> {
        let path = self.file_path("results", &result.instance.id)?;
        if fs::try_exists(&path).await? {
            return Err(TroupeError::internal(format!(
                "result for scenario '{}' already exists",
                result.instance.id
            )));
        }
        self.write_json(&path, result).await?;
        tracing::info!(target: "troupe::system", scenario_id = %result.instance.id, "Stored scenario result");
        Ok(())
    }

    async fn find_result(&self, instance_id: &str) -> Result<Option<ScenarioResult>> {
        let path = self.file_path("results", instance_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
