//! On-disk shapes of the template catalog.

use serde::{Deserialize, Serialize};
use troupe_core::scenario::ScenarioConfig;
use troupe_core::template::{ActorTemplate, ScenarioTemplate};

/// A saved scenario configuration with its catalog id.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StoredScenarioConfig {
    pub id: String,
    #[serde(flatten)]
    pub config: ScenarioConfig,
}

/// Root of a `templates.toml` file.
///
/// ```toml
/// [[actor]]
/// id = "alex"
/// name = "Alex"
///
/// [[scenario]]
/// id = "debate"
/// name = "Debate"
///
/// [[config]]
/// id = "friday-debate"
/// scenario_id = "debate"
/// actor_ids = ["alex"]
/// ```
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TemplateCatalog {
    #[serde(rename = "actor", default)]
    pub actors: Vec<ActorTemplate>,
    #[serde(rename = "scenario", default)]
    pub scenarios: Vec<ScenarioTemplate>,
    #[serde(rename = "config", default)]
    pub configs: Vec<StoredScenarioConfig>,
}
