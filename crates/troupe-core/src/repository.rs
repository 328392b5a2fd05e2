//! Template lookup and result persistence traits.

use crate::analysis::ScenarioResult;
use crate::error::Result;
use crate::scenario::{ScenarioConfig, ScenarioInstance};
use crate::template::{ActorTemplate, ScenarioTemplate};
use async_trait::async_trait;

/// Read-only catalog of actor and scenario templates.
///
/// Lookups are synchronous and side-effect free from the engine's point of
/// view. Implementations are expected to cache.
pub trait TemplateRepository: Send + Sync {
    /// Finds an actor template by id.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` if no template has this id.
    fn get_actor_template(&self, id: &str) -> Result<ActorTemplate>;

    /// Finds a scenario template by id.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` if no template has this id.
    fn get_scenario_template(&self, id: &str) -> Result<ScenarioTemplate>;

    /// Finds a saved scenario configuration by id.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` if no configuration has this id.
    fn get_scenario_config(&self, id: &str) -> Result<ScenarioConfig>;

    /// Lists every actor template.
    fn list_actor_templates(&self) -> Vec<ActorTemplate>;

    /// Lists every scenario template.
    fn list_scenario_templates(&self) -> Vec<ScenarioTemplate>;
}

/// Persistence for scenario instances and results.
///
/// Writes are assumed eventually consistent. Callers do not retry.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Stores a newly created scenario instance.
    ///
    /// # Arguments
    ///
    /// * `instance` - The instance to store
    async fn create_scenario_instance(&self, instance: &ScenarioInstance) -> Result<()>;

    /// Stores the terminal result of a completed scenario.
    ///
    /// # Arguments
    ///
    /// * `result` - The result to store
    async fn create_scenario_result(&self, result: &ScenarioResult) -> Result<()>;

    /// Finds a stored result by scenario instance id.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ScenarioResult))`: Result found
    /// - `Ok(None)`: No result for this instance
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_result(&self, instance_id: &str) -> Result<Option<ScenarioResult>>;
}
