//! Actor and scenario templates supplied by the template catalog.

use serde::{Deserialize, Serialize};

/// A character an agent plays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorTemplate {
    pub id: String,
    pub name: String,
    /// Verbose character profile.
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub traits: Vec<String>,
    /// Role and behavior instructions for this character.
    #[serde(default)]
    pub role: String,
}

/// Static description of a scenario type as authored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    pub id: String,
    pub name: String,
    /// Registered scenario type driving this template. Defaults to `id`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Scenario-specific instructions for every character.
    #[serde(default)]
    pub instructions: String,
    /// Scenario-level context shared with every character.
    #[serde(default)]
    pub additional_context: String,
    /// What the user is expected to do.
    #[serde(default)]
    pub user_role: String,
    /// Skill names scored by the scenario-specific analysis.
    #[serde(default)]
    pub skills: Vec<String>,
}

impl ScenarioTemplate {
    /// The registry key of the scenario type this template runs as.
    pub fn scenario_type(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.id)
    }
}
