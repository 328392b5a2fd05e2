//! TOML-based TemplateRepository implementation

use crate::dto::TemplateCatalog;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use troupe_core::error::{Result, TroupeError};
use troupe_core::repository::TemplateRepository;
use troupe_core::scenario::ScenarioConfig;
use troupe_core::template::{ActorTemplate, ScenarioTemplate};

/// A template catalog read once from a TOML file and cached in memory.
///
/// Lookups never touch the file system after construction.
#[derive(Debug, Default)]
pub struct TomlTemplateRepository {
    actors: Vec<ActorTemplate>,
    scenarios: Vec<ScenarioTemplate>,
    actor_index: HashMap<String, usize>,
    scenario_index: HashMap<String, usize>,
    configs: HashMap<String, ScenarioConfig>,
}

impl TomlTemplateRepository {
    /// Loads the catalog at the default path (~/.config/troupe/templates.toml).
    ///
    /// A missing file yields an empty catalog.
    pub fn default_location() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            tracing::warn!(target: "troupe::system", path = %path.display(), "Template catalog not found, using empty catalog");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("troupe").join("templates.toml"))
            .ok_or_else(|| TroupeError::config("Cannot find config directory"))
    }

    /// Loads a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if it
    /// contains duplicate ids.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let repository = Self::from_toml_str(&content)?;
        tracing::debug!(
            target: "troupe::system",
            path = %path.display(),
            actors = repository.actors.len(),
            scenarios = repository.scenarios.len(),
            "Loaded template catalog"
        );
        Ok(repository)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let catalog: TemplateCatalog = toml::from_str(content)?;
        Self::from_catalog(catalog)
    }

    pub fn from_catalog(catalog: TemplateCatalog) -> Result<Self> {
        let actor_index = index_by_id("actor", catalog.actors.iter().map(|a| a.id.as_str()))?;
        let scenario_index =
            index_by_id("scenario", catalog.scenarios.iter().map(|s| s.id.as_str()))?;

        let mut configs = HashMap::new();
        for stored in catalog.configs {
            if configs.insert(stored.id.clone(), stored.config).is_some() {
                return Err(TroupeError::config(format!(
                    "duplicate config id '{}'",
                    stored.id
                )));
            }
        }

        Ok(Self {
            actors: catalog.actors,
            scenarios: catalog.scenarios,
            actor_index,
            scenario_index,
            configs,
        })
    }
}

fn index_by_id<'a>(
    kind: &str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::new();
    for (position, id) in ids.enumerate() {
        if index.insert(id.to_string(), position).is_some() {
            return Err(TroupeError::config(format!("duplicate {kind} id '{id}'")));
        }
    }
    Ok(index)
}

impl TemplateRepository for TomlTemplateRepository {
    fn get_actor_template(&self, id: &str) -> Result<ActorTemplate> {
        self.actor_index
            .get(id)
            .map(|&i| self.actors[i].clone())
            .ok_or_else(|| TroupeError::not_found("actor template", id))
    }

    fn get_scenario_template(&self, id: &str) -> Result<ScenarioTemplate> {
        self.scenario_index
            .get(id)
            .map(|&i| self.scenarios[i].clone())
            .ok_or_else(|| TroupeError::not_found("scenario template", id))
    }

    fn get_scenario_config(&self, id: &str) -> Result<ScenarioConfig> {
        self.configs
            .get(id)
            .cloned()
            .ok_or_else(|| TroupeError::not_found("scenario config", id))
    }

    fn list_actor_templates(&self) -> Vec<ActorTemplate> {
        self.actors.clone()
    }

    fn list_scenario_templates(&self) -> Vec<ScenarioTemplate> {
        self.scenarios.clone()
    }
}
