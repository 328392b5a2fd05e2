//! The scenario aggregate root.

use crate::agent::{AgentRoster, ScenarioAgent};
use crate::agent_builder::{AgentBuilder, AgentPromptPolicy, DefaultAgentPrompts};
use crate::analysis::{AnalysisEngine, AnalysisPolicy, DefaultAnalysis};
use crate::component::ScenarioComponent;
use crate::component_manager::ComponentManager;
use crate::conversation::{ConversationController, FirstSpeakerMode, TurnPolicy};
use crate::event_manager::EventManager;
use crate::lifecycle::LifecycleManager;
use crate::stage::{StageManager, StagePolicy};
use crate::task_scope::TaskScope;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use troupe_core::config::ScenarioSettings;
use troupe_core::error::{Result, TroupeError};
use troupe_core::generation::{ModerationService, TextGenerator};
use troupe_core::message::speaker_prefix;
use troupe_core::repository::{ResultRepository, TemplateRepository};
use troupe_core::scenario::ScenarioInstance;
use troupe_core::template::ScenarioTemplate;
use troupe_core::transport::ClientEvent;
use troupe_interaction::PromptLibrary;

/// External collaborators shared by every scenario of a manager.
#[derive(Clone)]
pub struct ScenarioServices {
    pub generator: Arc<dyn TextGenerator>,
    pub templates: Arc<dyn TemplateRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub moderation: Arc<dyn ModerationService>,
}

/// Everything a scenario type contributes to a new scenario.
///
/// Produced by the factory registered for the scenario type.
pub struct ScenarioBlueprint {
    pub first_speaker: FirstSpeakerMode,
    pub turn_policy: Box<dyn TurnPolicy>,
    pub stage_policy: Box<dyn StagePolicy>,
    pub agent_prompts: Box<dyn AgentPromptPolicy>,
    pub analysis: Box<dyn AnalysisPolicy>,
    pub extra_components: Vec<Arc<dyn ScenarioComponent>>,
    /// Prompt templates added on top of the built-in set.
    pub prompts: Vec<(&'static str, &'static str)>,
    /// Settings overrides applied before the per-request overrides.
    pub settings: Option<Value>,
}

impl ScenarioBlueprint {
    pub fn new(turn_policy: impl TurnPolicy + 'static, stage_policy: impl StagePolicy + 'static) -> Self {
        Self {
            first_speaker: FirstSpeakerMode::User,
            turn_policy: Box::new(turn_policy),
            stage_policy: Box::new(stage_policy),
            agent_prompts: Box::new(DefaultAgentPrompts),
            analysis: Box::new(DefaultAnalysis),
            extra_components: Vec::new(),
            prompts: Vec::new(),
            settings: None,
        }
    }

    pub fn with_first_speaker(mut self, mode: FirstSpeakerMode) -> Self {
        self.first_speaker = mode;
        self
    }

    pub fn with_agent_prompts(mut self, policy: impl AgentPromptPolicy + 'static) -> Self {
        self.agent_prompts = Box::new(policy);
        self
    }

    pub fn with_analysis(mut self, policy: impl AnalysisPolicy + 'static) -> Self {
        self.analysis = Box::new(policy);
        self
    }

    pub fn with_component(mut self, component: Arc<dyn ScenarioComponent>) -> Self {
        self.extra_components.push(component);
        self
    }

    pub fn with_prompt(mut self, name: &'static str, source: &'static str) -> Self {
        self.prompts.push((name, source));
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// One running scenario.
///
/// Owns its agents, its components and every task it spawns. Anything that
/// runs in the background refers back to the scenario through a `Weak` or a
/// short-lived `Arc` held by a task of [`Scenario::tasks`], so dropping the
/// registry entry and cancelling the task scope frees the whole graph.
pub struct Scenario {
    instance: ScenarioInstance,
    template: ScenarioTemplate,
    settings: ScenarioSettings,
    services: ScenarioServices,
    prompts: PromptLibrary,
    roster: AgentRoster,
    components: ComponentManager,
    events: EventManager,
    lifecycle: LifecycleManager,
    tasks: TaskScope,
    error_count: AtomicU64,
}

impl Scenario {
    /// Assembles a scenario from a blueprint.
    ///
    /// Agents are built here from their templates. Their system messages are
    /// materialized later, during `awake`.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` if an actor template is missing and
    /// `TroupeError::Config` if a blueprint prompt fails to compile.
    pub fn build(
        instance: ScenarioInstance,
        template: ScenarioTemplate,
        blueprint: ScenarioBlueprint,
        services: ScenarioServices,
        settings: ScenarioSettings,
    ) -> Result<Arc<Self>> {
        let roster = AgentBuilder::build_roster(&instance, services.templates.as_ref())?;
        if roster.agents.is_empty() {
            return Err(TroupeError::config(format!(
                "scenario '{}' has no actors",
                instance.config.scenario_id
            )));
        }

        let mut prompts = PromptLibrary::new()?;
        for (name, source) in blueprint.prompts {
            prompts.add(name, source)?;
        }

        let components = ComponentManager::new(
            ConversationController::new(blueprint.first_speaker, blueprint.turn_policy),
            StageManager::new(blueprint.stage_policy),
            AgentBuilder::new(blueprint.agent_prompts),
            AnalysisEngine::new(blueprint.analysis),
            blueprint.extra_components,
        );

        Ok(Arc::new(Self {
            instance,
            template,
            settings,
            services,
            prompts,
            roster,
            components,
            events: EventManager::new(),
            lifecycle: LifecycleManager::new(),
            tasks: TaskScope::new(),
            error_count: AtomicU64::new(0),
        }))
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn instance(&self) -> &ScenarioInstance {
        &self.instance
    }

    pub fn template(&self) -> &ScenarioTemplate {
        &self.template
    }

    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    pub fn services(&self) -> &ScenarioServices {
        &self.services
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    /// The primary agents, in configuration order.
    pub fn agents(&self) -> &[Arc<ScenarioAgent>] {
        &self.roster.agents
    }

    pub fn components(&self) -> &ComponentManager {
        &self.components
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn tasks(&self) -> &TaskScope {
        &self.tasks
    }

    pub fn user_name(&self) -> &str {
        &self.instance.account.first_name
    }

    pub fn user_prefix(&self) -> String {
        speaker_prefix(self.user_name())
    }

    /// Sends an event to the connected client.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.lifecycle.send(event).await
    }

    /// Spawns a task into this scenario's scope. A failure is routed to
    /// [`Scenario::handle_error`].
    pub fn spawn<F>(self: &Arc<Self>, name: &'static str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let scenario = Arc::downgrade(self);
        self.tasks.spawn(name, async move {
            if let Err(e) = future.await {
                if let Some(scenario) = scenario.upgrade() {
                    scenario.handle_error(&e);
                }
            }
        });
    }

    /// Scenario-level error channel. Errors reaching it are logged and counted
    /// but never stop the scenario.
    pub fn handle_error(&self, error: &TroupeError) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "troupe::system",
            scenario_id = %self.instance.id,
            phase = ?error.phase(),
            error = %error,
            "Scenario error"
        );
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Releases components, then agent transcripts, then listeners and the
    /// connection.
    pub async fn cleanup(&self) {
        self.components.cleanup();
        for agent in self.roster.all() {
            agent.clear().await;
        }
        self.events.clear();
        self.lifecycle.cleanup();
        tracing::debug!(target: "troupe::system", scenario_id = %self.instance.id, "Scenario cleaned up");
    }
}
