//! In-memory ResultRepository implementation

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use troupe_core::analysis::ScenarioResult;
use troupe_core::error::Result;
use troupe_core::repository::ResultRepository;
use troupe_core::scenario::ScenarioInstance;

/// Keeps instances and results in process memory.
#[derive(Default)]
pub struct InMemoryResultRepository {
    instances: RwLock<HashMap<String, ScenarioInstance>>,
    results: RwLock<HashMap<String, ScenarioResult>>,
}

impl InMemoryResultRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn result_count(&self) -> usize {
        self.results.read().await.len()
    }
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn create_scenario_instance(&self, instance: &ScenarioInstance) -> Result<()> {
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn create_scenario_result(&self, result: &ScenarioResult) -> Result<()> {
        self.results
            .write()
            .await
            .insert(result.instance.id.clone(), result.clone());
        Ok(())
    }

    async fn find_result(&self, instance_id: &str) -> Result<Option<ScenarioResult>> {
        Ok(self.results.read().await.get(instance_id).cloned())
    }
}
