//! Per-scenario orchestration: connection wiring, message ingress, the update
//! loop and scenario end.

use crate::component_manager::ComponentManager;
use crate::scenario::Scenario;
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use troupe_core::analysis::ScenarioResult;
use troupe_core::error::Result;
use troupe_core::message::{Message, MessageRole};
use troupe_core::transport::{ClientEvent, InboundEvent, ScenarioTransport};

/// Reason shown to a client whose message violated the content policy.
pub const MODERATION_REASON: &str = "Your message violated the content policy.";

#[derive(Default)]
pub struct LifecycleManager {
    transport: RwLock<Option<Arc<dyn ScenarioTransport>>>,
    /// Outcome of the one `awake` pass. Reconnects reuse it.
    awoken: OnceCell<Result<()>>,
    started: OnceCell<Result<()>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn transport(&self) -> Option<Arc<dyn ScenarioTransport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport().is_some()
    }

    /// Stores the connection, routes its inbound events and runs `awake`.
    ///
    /// `awake` runs once per scenario. A reconnecting client only replaces
    /// the transport and gets the outcome of the first pass.
    ///
    /// # Errors
    ///
    /// Returns the collected `awake` failures.
    pub async fn initialize(&self, scenario: &Arc<Scenario>, transport: Arc<dyn ScenarioTransport>) -> Result<()> {
        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = Some(transport.clone());

        let weak = Arc::downgrade(scenario);
        transport.subscribe(Arc::new(move |event: InboundEvent| {
            let Some(scenario) = weak.upgrade() else {
                return;
            };
            match event {
                InboundEvent::UserMessage(message) => {
                    scenario.lifecycle().on_user_message(&scenario, message);
                }
                InboundEvent::AdvanceStage => {
                    let task_scenario = scenario.clone();
                    scenario.spawn("advance_stage", async move {
                        task_scenario
                            .components()
                            .stages()
                            .advance_stage(&task_scenario)
                            .await
                            .map(|_| ())
                    });
                }
            }
        }));

        if self.awoken.initialized() {
            tracing::info!(target: "troupe::system", scenario_id = %scenario.id(), "Client reattached");
        }
        self.awoken
            .get_or_init(|| async move {
                scenario.components().awake(scenario).await?;
                tracing::info!(target: "troupe::system", scenario_id = %scenario.id(), "Scenario initialized");
                Ok(())
            })
            .await
            .clone()
    }

    /// Runs `start` and spawns the update loop, once per scenario.
    ///
    /// Returns `true` only for the call that actually started the scenario.
    pub async fn start_scenario(&self, scenario: &Arc<Scenario>) -> Result<bool> {
        let mut fresh = false;
        let started_here = &mut fresh;
        self.started
            .get_or_init(|| async move {
                *started_here = true;
                scenario.components().start(scenario).await?;

                let period = Duration::from_secs_f64(scenario.settings().frame_rate_secs.max(0.0).min(3600.0));
                scenario.tasks().spawn(
                    "update_loop",
                    ComponentManager::run_update_loop(Arc::downgrade(scenario), period),
                );
                tracing::info!(target: "troupe::system", scenario_id = %scenario.id(), "Scenario ready");
                Ok(())
            })
            .await
            .clone()?;
        Ok(fresh)
    }

    /// Accepts a message from the client.
    ///
    /// Returns immediately. Moderation and the step round run as separate
    /// tasks, so a slow check never delays orchestration.
    pub fn on_user_message(&self, scenario: &Arc<Scenario>, mut message: Message) {
        let account = &scenario.instance().account;
        message.role = MessageRole::User;
        message.author_id = account.id.clone();
        message.author_name = account.first_name.clone();
        message.scenario_instance_id = scenario.id().to_string();
        message.created_at = Utc::now();

        tracing::debug!(target: "troupe::transport", scenario_id = %scenario.id(), to_mentor = message.is_to_mentor(), "User message received");

        if scenario.settings().validate_user_messages {
            let task_scenario = scenario.clone();
            let content = message.content.clone();
            scenario.spawn("moderation", async move {
                task_scenario.lifecycle().validate(&task_scenario, &content).await
            });
        }

        let mentor_step = message.is_to_mentor();
        self.spawn_step(scenario, message, mentor_step);
    }

    pub fn on_agent_message(&self, scenario: &Arc<Scenario>, message: Message) {
        self.spawn_step(scenario, message, false);
    }

    pub fn on_advisor_message(&self, scenario: &Arc<Scenario>, message: Message) {
        self.spawn_step(scenario, message, true);
    }

    fn spawn_step(&self, scenario: &Arc<Scenario>, message: Message, mentor_step: bool) {
        let task_scenario = scenario.clone();
        scenario.spawn("step", async move {
            task_scenario
                .components()
                .step(&task_scenario, &message, mentor_step)
                .await;
            Ok(())
        });
    }

    /// Force-closes the connection if `content` violates the content policy.
    async fn validate(&self, scenario: &Scenario, content: &str) -> Result<()> {
        if !scenario.services().moderation.is_flagged(content).await? {
            return Ok(());
        }

        tracing::warn!(target: "troupe::transport", scenario_id = %scenario.id(), "User message flagged by moderation");
        if let Err(e) = self
            .send(ClientEvent::Terminated {
                reason: MODERATION_REASON.to_string(),
            })
            .await
        {
            tracing::debug!(target: "troupe::transport", error = %e, "Could not notify client before closing");
        }
        self.force_close().await;
        Ok(())
    }

    /// Sends an event to the client. Events raised before a client connects
    /// are dropped.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        match self.transport() {
            Some(transport) => transport.send(event).await,
            None => {
                tracing::trace!(target: "troupe::transport", "No connection, dropping event");
                Ok(())
            }
        }
    }

    pub async fn force_close(&self) {
        if let Some(transport) = self.transport() {
            transport.force_close().await;
        }
    }

    /// Analyzes the scenario and persists the result.
    ///
    /// # Errors
    ///
    /// Returns the analysis or persistence failure. Nothing is persisted when
    /// analysis fails.
    pub async fn end_scenario(&self, scenario: &Arc<Scenario>) -> Result<ScenarioResult> {
        let conversations: Vec<_> = scenario
            .components()
            .controller()
            .conversations(scenario)
            .await
            .iter()
            .map(|c| c.pruned())
            .collect();

        let analysis = scenario
            .components()
            .analysis()
            .analyze_all(scenario, &conversations)
            .await?;
        let result = ScenarioResult::new(scenario.instance().clone(), conversations, analysis);
        scenario.services().results.create_scenario_result(&result).await?;

        tracing::info!(target: "troupe::system", scenario_id = %scenario.id(), "Scenario result stored");
        Ok(result)
    }

    /// Drops the connection handle.
    pub fn cleanup(&self) {
        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
