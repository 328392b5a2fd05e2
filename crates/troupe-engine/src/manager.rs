//! Scenario registry and the process-wide scenario manager.
//!
//! [`ScenarioRegistry`] maps scenario types to blueprint factories.
//! [`ScenarioManager`] creates scenarios from it, keeps the live ones by id,
//! fires the lifecycle hooks and serves client connections through
//! [`ScenarioManager::run_connection`]. A scenario outlives its connections
//! until it is ended or destroyed.

use crate::scenario::{Scenario, ScenarioBlueprint, ScenarioServices};
use crate::scenarios;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use strum::Display;
use tokio::sync::RwLock;
use tokio::time::timeout;
use troupe_core::analysis::ScenarioResult;
use troupe_core::config::TroupeConfig;
use troupe_core::error::{Result, TroupeError};
use troupe_core::scenario::{AccountData, ScenarioConfig, ScenarioInstance};
use troupe_core::template::ScenarioTemplate;
use troupe_core::transport::{ClientEvent, ConnectionError, ConnectionStage, ScenarioTransport};

/// Builds the blueprint of one scenario type.
pub type ScenarioFactory = fn(&ScenarioInstance, &ScenarioTemplate) -> Result<ScenarioBlueprint>;

/// Maps scenario type ids to their factories. Read-only once the manager is
/// built.
#[derive(Clone, Default)]
pub struct ScenarioRegistry {
    factories: HashMap<String, ScenarioFactory>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scenario types shipped with the engine.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(scenarios::interview::SCENARIO_TYPE, scenarios::interview::blueprint);
        registry.register(scenarios::debate::SCENARIO_TYPE, scenarios::debate::blueprint);
        registry.register(scenarios::speed_dating::SCENARIO_TYPE, scenarios::speed_dating::blueprint);
        registry.register(scenarios::pitch::SCENARIO_TYPE, scenarios::pitch::blueprint);
        registry
    }

    pub fn register(&mut self, scenario_type: impl Into<String>, factory: ScenarioFactory) {
        self.factories.insert(scenario_type.into(), factory);
    }

    pub fn get(&self, scenario_type: &str) -> Option<ScenarioFactory> {
        self.factories.get(scenario_type).copied()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Manager-level lifecycle points that hooks can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HookKind {
    Create,
    Start,
    /// Ended without analysis.
    End,
    /// Ended with a stored result.
    Complete,
    Destroy,
}

/// Observer of manager lifecycle points. `Complete` hooks receive the result.
pub type Hook = Arc<dyn Fn(&Arc<Scenario>, Option<&ScenarioResult>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Owns every live scenario of the process.
///
/// `ScenarioManager` is responsible for:
/// - Creating scenarios from registered scenario types
/// - Attaching client connections
/// - Ending scenarios, with or without analysis
/// - Tearing scenarios down
pub struct ScenarioManager {
    registry: ScenarioRegistry,
    services: ScenarioServices,
    config: TroupeConfig,
    scenarios: RwLock<HashMap<String, Arc<Scenario>>>,
    hooks: StdRwLock<HashMap<HookKind, Vec<(HookId, Hook)>>>,
    next_hook_id: AtomicU64,
}

impl ScenarioManager {
    /// Creates a manager with the built-in scenario types.
    ///
    /// # Arguments
    ///
    /// * `services` - External collaborators shared by every scenario
    /// * `config` - Engine configuration
    pub fn new(services: ScenarioServices, config: TroupeConfig) -> Self {
        Self::with_registry(ScenarioRegistry::builtin(), services, config)
    }

    pub fn with_registry(registry: ScenarioRegistry, services: ScenarioServices, config: TroupeConfig) -> Self {
        Self {
            registry,
            services,
            config,
            scenarios: RwLock::new(HashMap::new()),
            hooks: StdRwLock::new(HashMap::new()),
            next_hook_id: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    pub fn config(&self) -> &TroupeConfig {
        &self.config
    }

    /// Registers a hook.
    pub fn on(&self, kind: HookKind, hook: Hook) -> HookId {
        let id = HookId(self.next_hook_id.fetch_add(1, Ordering::Relaxed));
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, hook));
        id
    }

    /// Removes a hook. Returns `false` if it was not registered.
    pub fn off(&self, kind: HookKind, id: HookId) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = hooks.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn trigger(&self, kind: HookKind, scenario: &Arc<Scenario>, result: Option<&ScenarioResult>) {
        let hooks: Vec<Hook> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, hook)| hook.clone()).collect())
            .unwrap_or_default();

        tracing::debug!(target: "troupe::system", hook = %kind, count = hooks.len(), scenario_id = %scenario.id(), "Triggering hooks");
        for hook in hooks {
            hook(scenario, result);
        }
    }

    /// Creates and registers a scenario.
    ///
    /// Settings are layered: engine defaults, then the scenario type's
    /// defaults, then the per-request overrides in `config.settings`.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` for an unknown scenario template,
    /// scenario type or actor, and any persistence failure.
    pub async fn create_scenario(&self, account: AccountData, config: ScenarioConfig) -> Result<Arc<Scenario>> {
        let template = self.services.templates.get_scenario_template(&config.scenario_id)?;
        let factory = self
            .registry
            .get(template.scenario_type())
            .ok_or_else(|| TroupeError::not_found("scenario type", template.scenario_type()))?;

        let instance = ScenarioInstance::new(account, config);
        let blueprint = factory(&instance, &template)?;
        let settings = self
            .config
            .scenario
            .merged(blueprint.settings.as_ref())?
            .merged(instance.config.settings.as_ref())?;

        let scenario = Scenario::build(instance, template, blueprint, self.services.clone(), settings)?;
        self.services
            .results
            .create_scenario_instance(scenario.instance())
            .await?;

        self.scenarios
            .write()
            .await
            .insert(scenario.id().to_string(), scenario.clone());
        tracing::info!(
            target: "troupe::system",
            scenario_id = %scenario.id(),
            scenario_type = scenario.template().scenario_type(),
            "Scenario created"
        );
        self.trigger(HookKind::Create, &scenario, None);
        Ok(scenario)
    }

    /// Creates a scenario from a saved configuration.
    pub async fn create_scenario_from_config(&self, account: AccountData, config_id: &str) -> Result<Arc<Scenario>> {
        let config = self.services.templates.get_scenario_config(config_id)?;
        self.create_scenario(account, config).await
    }

    pub async fn get_scenario(&self, id: &str) -> Option<Arc<Scenario>> {
        self.scenarios.read().await.get(id).cloned()
    }

    pub async fn scenario_ids(&self) -> Vec<String> {
        self.scenarios.read().await.keys().cloned().collect()
    }

    /// Serves one client connection for a scenario until the client leaves.
    ///
    /// A client may reconnect to a registered scenario. The scenario is
    /// awoken and started by the first connection only; later ones get
    /// `Ready` and resume where the conversation stands.
    ///
    /// On failure the client receives a generic reason and a close code. The
    /// detailed error is logged and returned. The scenario stays registered
    /// either way.
    pub async fn run_connection(
        &self,
        scenario_id: &str,
        transport: Arc<dyn ScenarioTransport>,
    ) -> std::result::Result<(), ConnectionError> {
        let outcome = self.serve(scenario_id, transport.clone()).await;

        if let Err(err) = &outcome {
            tracing::error!(
                target: "troupe::transport",
                scenario_id,
                stage = %err.stage(),
                code = err.close_code(),
                error = %err,
                "Connection failed"
            );
            let reason = err.client_reason();
            if let Err(e) = transport
                .send(ClientEvent::ConnectionClosed {
                    reason: reason.to_string(),
                })
                .await
            {
                tracing::debug!(target: "troupe::transport", error = %e, "Could not send close reason");
            }
            if let Err(e) = transport.close(err.close_code(), reason).await {
                tracing::warn!(target: "troupe::transport", error = %e, "Failed to close connection");
            }
        }
        outcome
    }

    async fn serve(
        &self,
        scenario_id: &str,
        transport: Arc<dyn ScenarioTransport>,
    ) -> std::result::Result<(), ConnectionError> {
        let scenario = self
            .get_scenario(scenario_id)
            .await
            .ok_or_else(|| ConnectionError::ScenarioNotFound(scenario_id.to_string()))?;
        let settings = &self.config.connection;

        timeout(Duration::from_secs(settings.accept_timeout_secs), transport.accept())
            .await
            .map_err(|_| ConnectionError::Timeout {
                stage: ConnectionStage::Accept,
            })?
            .map_err(|e| ConnectionError::failed(ConnectionStage::Accept, e))?;

        timeout(
            Duration::from_secs(settings.ready_event_timeout_secs),
            transport.wait_for_ready(),
        )
        .await
        .map_err(|_| ConnectionError::Timeout {
            stage: ConnectionStage::WaitForReady,
        })?
        .map_err(|e| ConnectionError::failed(ConnectionStage::WaitForReady, e))?;
        tracing::debug!(target: "troupe::transport", scenario_id, "Client ready");

        scenario
            .lifecycle()
            .initialize(&scenario, transport.clone())
            .await
            .map_err(|e| ConnectionError::failed(ConnectionStage::InitializeScenario, e))?;

        transport
            .send(ClientEvent::Ready)
            .await
            .map_err(|e| ConnectionError::failed(ConnectionStage::SendReady, e))?;

        let started = scenario
            .lifecycle()
            .start_scenario(&scenario)
            .await
            .map_err(|e| ConnectionError::failed(ConnectionStage::InitializeScenario, e))?;
        if started {
            self.trigger(HookKind::Start, &scenario, None);
        }

        transport
            .listen()
            .await
            .map_err(|e| ConnectionError::failed(ConnectionStage::Receive, e))?;
        tracing::info!(target: "troupe::transport", scenario_id, "Client disconnected");
        Ok(())
    }

    /// Ends a scenario and destroys it.
    ///
    /// A completed scenario is analyzed and its result stored and returned.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` for an unknown id and any analysis or
    /// persistence failure. On failure the scenario stays registered so the
    /// caller can retry or destroy it.
    pub async fn end_scenario(&self, scenario_id: &str, completed: bool) -> Result<Option<ScenarioResult>> {
        let scenario = self
            .get_scenario(scenario_id)
            .await
            .ok_or_else(|| TroupeError::not_found("scenario", scenario_id))?;

        let result = if completed {
            let result = scenario.lifecycle().end_scenario(&scenario).await?;
            self.trigger(HookKind::Complete, &scenario, Some(&result));
            Some(result)
        } else {
            self.trigger(HookKind::End, &scenario, None);
            None
        };

        self.destroy_scenario(scenario_id).await;
        Ok(result)
    }

    /// Unregisters a scenario, cancels its tasks and releases its resources.
    ///
    /// Returns `false` if no scenario has this id.
    pub async fn destroy_scenario(&self, scenario_id: &str) -> bool {
        let Some(scenario) = self.scenarios.write().await.remove(scenario_id) else {
            return false;
        };

        self.trigger(HookKind::Destroy, &scenario, None);
        scenario.lifecycle().force_close().await;
        scenario.tasks().cancel_all().await;
        scenario.cleanup().await;
        tracing::info!(
            target: "troupe::system",
            scenario_id,
            errors = scenario.error_count(),
            "Scenario destroyed"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, SKILLS_JSON, SOCIAL_JSON, agent_message, config, user_message};
    use serde_json::json;
    use std::sync::Mutex;
    use troupe_core::transport::{CLOSE_SCENARIO_NOT_FOUND, CLOSE_TIMEOUT};
    use troupe_infrastructure::{CloseStatus, channel_transport};

    fn account() -> AccountData {
        AccountData::new("acc-1", "Sam")
    }

    async fn pitch_with_dialogue(manager: &ScenarioManager) -> Arc<Scenario> {
        let scenario = manager
            .create_scenario(account(), config("pitch_to_investors", &["alex", "blair", "casey"]))
            .await
            .unwrap();
        for agent in scenario.agents() {
            agent.add_message(user_message(&scenario, "Here is my pitch")).await;
            agent
                .add_message(agent_message(&scenario, agent.id(), "Tell me more"))
                .await;
        }
        scenario
    }

    fn record(kinds: &Arc<Mutex<Vec<HookKind>>>, kind: HookKind) -> Hook {
        let kinds = kinds.clone();
        Arc::new(move |_: &Arc<Scenario>, _: Option<&ScenarioResult>| {
            kinds.lock().unwrap().push(kind);
        })
    }

    #[test]
    fn test_builtin_registry() {
        assert_eq!(
            ScenarioRegistry::builtin().ids(),
            vec!["debate", "interview", "pitch_to_investors", "speed_dating"]
        );
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_template_and_type() {
        let harness = Harness::new();
        let err = harness
            .manager()
            .create_scenario(account(), config("karaoke", &["alex"]))
            .await
            .err()
            .unwrap();
        assert!(err.is_not_found());

        let bare = ScenarioManager::with_registry(ScenarioRegistry::new(), harness.services.clone(), TroupeConfig::default());
        let err = bare
            .create_scenario(account(), config("debate", &["alex"]))
            .await
            .err()
            .unwrap();
        assert!(err.is_not_found());
        assert!(bare.scenario_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_settings_layering() {
        let harness = Harness::new();
        let manager = harness.manager();

        let dating = manager
            .create_scenario(account(), config("speed_dating", &["alex", "blair"]))
            .await
            .unwrap();
        assert!(dating.settings().separate_agent_conversations);

        let mut shared = config("speed_dating", &["alex", "blair"]);
        shared.settings = Some(json!({ "separate_agent_conversations": false }));
        let shared = manager.create_scenario(account(), shared).await.unwrap();
        assert!(!shared.settings().separate_agent_conversations);
        assert_eq!(harness.results.instance_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_feedback_fails_whole_analysis() {
        let harness = Harness::new();
        harness
            .generator
            .on("Evaluate the social skills", SOCIAL_JSON)
            .on("Evaluate how well", SKILLS_JSON)
            .fail_on("You are Casey. Based on", "backend unavailable");
        let manager = harness.manager();
        let scenario = pitch_with_dialogue(&manager).await;

        let err = manager.end_scenario(scenario.id(), true).await.err().unwrap();
        assert!(matches!(err, TroupeError::Generation(_)));
        assert_eq!(harness.results.result_count().await, 0);
        assert!(manager.get_scenario(scenario.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_completed_scenario_is_stored_and_destroyed() {
        let harness = Harness::new();
        harness
            .generator
            .on("Evaluate the social skills", SOCIAL_JSON)
            .on("Evaluate how well", SKILLS_JSON);
        let manager = harness.manager();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        for kind in [HookKind::Complete, HookKind::End, HookKind::Destroy] {
            manager.on(kind, record(&kinds, kind));
        }

        let scenario = pitch_with_dialogue(&manager).await;
        let result = manager.end_scenario(scenario.id(), true).await.unwrap().unwrap();

        assert_eq!(result.analysis.feedback.len(), 3);
        assert_eq!(result.conversations.len(), 3);
        assert!(result.conversations.iter().all(|c| !c.has_system_message()));
        assert_eq!(harness.results.result_count().await, 1);
        assert!(manager.get_scenario(scenario.id()).await.is_none());
        assert_eq!(*kinds.lock().unwrap(), vec![HookKind::Complete, HookKind::Destroy]);
        assert!(!manager.destroy_scenario(scenario.id()).await);
    }

    #[tokio::test]
    async fn test_hooks_can_be_removed() {
        let harness = Harness::new();
        let manager = harness.manager();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let id = manager.on(HookKind::Create, record(&kinds, HookKind::Create));
        manager.on(HookKind::End, record(&kinds, HookKind::End));

        let scenario = manager
            .create_scenario(account(), config("pitch_to_investors", &["alex"]))
            .await
            .unwrap();
        assert!(manager.off(HookKind::Create, id));
        assert!(!manager.off(HookKind::Create, id));
        manager
            .create_scenario(account(), config("pitch_to_investors", &["alex"]))
            .await
            .unwrap();

        assert!(manager.end_scenario(scenario.id(), false).await.unwrap().is_none());
        assert_eq!(*kinds.lock().unwrap(), vec![HookKind::Create, HookKind::End]);
        assert_eq!(harness.results.result_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_scenario_closes_with_not_found_code() {
        let harness = Harness::new();
        let manager = harness.manager();
        let (transport, mut client) = channel_transport();

        let err = manager
            .run_connection("missing", Arc::new(transport))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::ScenarioNotFound(_)));
        assert_eq!(
            client.drain(),
            vec![ClientEvent::ConnectionClosed {
                reason: err.client_reason().to_string(),
            }]
        );
        assert_eq!(
            client.close_status(),
            Some(CloseStatus::Closed {
                code: CLOSE_SCENARIO_NOT_FOUND,
                reason: err.client_reason().to_string(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_times_out() {
        let harness = Harness::new();
        let manager = harness.manager();
        let scenario = manager
            .create_scenario(account(), config("pitch_to_investors", &["alex"]))
            .await
            .unwrap();
        let (transport, mut client) = channel_transport();

        let err = manager
            .run_connection(scenario.id(), Arc::new(transport))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Timeout {
                stage: ConnectionStage::Accept
            }
        ));
        assert_eq!(err.close_code(), CLOSE_TIMEOUT);
        assert!(matches!(
            client.drain().as_slice(),
            [ClientEvent::ConnectionClosed { .. }]
        ));
        assert!(manager.get_scenario(scenario.id()).await.is_some());
    }
}
