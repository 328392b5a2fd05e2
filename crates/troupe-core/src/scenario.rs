//! Scenario instance records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScenarioDuration {
    Short,
    #[default]
    Medium,
    Long,
}

/// The user running a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl AccountData {
    pub fn new(id: impl Into<String>, first_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            first_name: first_name.into(),
            last_name: None,
        }
    }
}

/// What the user selected when requesting a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScenarioConfig {
    /// Scenario type id (e.g. `"debate"`), resolved through the scenario registry.
    pub scenario_id: String,
    /// Primary actors, in speaking order.
    pub actor_ids: Vec<String>,
    /// Actors with a distinct role such as a moderator.
    #[serde(default)]
    pub special_actor_ids: Vec<String>,
    #[serde(default)]
    pub advisor_id: Option<String>,
    /// Free-form field values filled in by the user.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Extra per-actor information keyed by actor id.
    #[serde(default)]
    pub additional_actor_info: BTreeMap<String, String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub duration: ScenarioDuration,
    /// Per-scenario settings overrides, merged over the configured defaults.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

impl ScenarioConfig {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Identifies one running scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInstance {
    pub id: String,
    pub account: AccountData,
    pub config: ScenarioConfig,
    pub created_at: DateTime<Utc>,
}

impl ScenarioInstance {
    pub fn new(account: AccountData, config: ScenarioConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account,
            config,
            created_at: Utc::now(),
        }
    }
}
