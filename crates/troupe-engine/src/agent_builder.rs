//! Agent construction and system-prompt materialization.

use crate::agent::{AgentRoster, ScenarioAgent};
use crate::component::ScenarioComponent;
use crate::scenario::Scenario;
use async_trait::async_trait;
use futures::future::try_join_all;
use minijinja::context;
use std::sync::Arc;
use troupe_core::agent::AgentType;
use troupe_core::error::{Result, TroupeError};
use troupe_core::generation::{GenerationParams, prompt_messages};
use troupe_core::message::speaker_prefix;
use troupe_core::repository::TemplateRepository;
use troupe_core::scenario::ScenarioInstance;
use troupe_core::template::ActorTemplate;
use troupe_interaction::prompts;

/// Scenario-specific pieces of every character's system prompt.
#[async_trait]
pub trait AgentPromptPolicy: Send + Sync {
    /// Instructions shared by every character of the scenario.
    async fn scenario_instructions(&self, scenario: &Arc<Scenario>) -> Result<String> {
        Ok(scenario.template().instructions.clone())
    }

    /// What this character does in the scenario.
    async fn role_and_behavior(&self, _scenario: &Arc<Scenario>, agent: &ScenarioAgent) -> Result<String> {
        Ok(agent.template().role.clone())
    }

    /// Per-request facts about this character.
    async fn extra_information(&self, scenario: &Arc<Scenario>, agent: &ScenarioAgent) -> Result<Option<String>> {
        Ok(scenario
            .instance()
            .config
            .additional_actor_info
            .get(agent.id())
            .cloned())
    }
}

/// Uses the scenario template and actor templates as they are.
pub struct DefaultAgentPrompts;

impl AgentPromptPolicy for DefaultAgentPrompts {}

/// Builds the agents of a scenario and writes their system prompts.
pub struct AgentBuilder {
    policy: Box<dyn AgentPromptPolicy>,
}

impl AgentBuilder {
    pub fn new(policy: Box<dyn AgentPromptPolicy>) -> Self {
        Self { policy }
    }

    /// Looks up every configured actor and builds the roster.
    ///
    /// Each agent stops before its own prefix, every participant's prefix
    /// and the user's prefix.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` if any actor template is missing.
    pub fn build_roster(
        instance: &ScenarioInstance,
        templates: &dyn TemplateRepository,
    ) -> Result<AgentRoster> {
        let config = &instance.config;
        let lookup = |ids: &[String]| -> Result<Vec<ActorTemplate>> {
            ids.iter().map(|id| templates.get_actor_template(id)).collect()
        };
        let actors = lookup(&config.actor_ids)?;
        let specials = lookup(&config.special_actor_ids)?;
        let mentor = config
            .advisor_id
            .as_deref()
            .map(|id| templates.get_actor_template(id))
            .transpose()?;

        let shared: Vec<String> = actors
            .iter()
            .chain(specials.iter())
            .map(|template| speaker_prefix(&template.name))
            .chain(std::iter::once(speaker_prefix(&instance.account.first_name)))
            .collect();
        let params_for = |template: &ActorTemplate| {
            let mut stop = vec![speaker_prefix(&template.name)];
            for prefix in &shared {
                if !stop.contains(prefix) {
                    stop.push(prefix.clone());
                }
            }
            GenerationParams {
                stop,
                ..GenerationParams::default()
            }
        };
        let build = |template: ActorTemplate, kind: AgentType| {
            let params = params_for(&template);
            Arc::new(ScenarioAgent::new(template, kind, &instance.id, params))
        };

        Ok(AgentRoster {
            agents: actors.into_iter().map(|t| build(t, AgentType::Agent)).collect(),
            special_agents: specials
                .into_iter()
                .map(|t| build(t, AgentType::SpecialAgent))
                .collect(),
            mentor: mentor.map(|t| build(t, AgentType::Mentor)),
        })
    }

    /// Writes the system message of every agent, mentor included.
    pub async fn initialize_agents(&self, scenario: &Arc<Scenario>) -> Result<()> {
        try_join_all(
            scenario
                .roster()
                .all()
                .map(|agent| self.initialize_agent(scenario, agent)),
        )
        .await?;
        Ok(())
    }

    async fn initialize_agent(&self, scenario: &Arc<Scenario>, agent: &Arc<ScenarioAgent>) -> Result<()> {
        let system = match agent.kind() {
            AgentType::Agent => self.character_system_message(scenario, agent).await?,
            AgentType::SpecialAgent => self.special_system_message(scenario, agent).await?,
            AgentType::Mentor => self.mentor_system_message(scenario, agent).await?,
        };
        agent.set_system_message(system).await;
        tracing::debug!(target: "troupe::system", agent = agent.name(), kind = %agent.kind(), "Agent initialized");
        Ok(())
    }

    /// Renders the personality block, summarizing the profile when
    /// configured. A failed summary is an error.
    async fn personality(&self, scenario: &Arc<Scenario>, agent: &ScenarioAgent) -> Result<String> {
        let template = agent.template();
        if !scenario.settings().summarize_actor_personalities {
            return scenario.prompts().render(
                prompts::PERSONALITY,
                context! { profile => &template.profile, traits => &template.traits },
            );
        }

        let prompt = scenario.prompts().render(
            prompts::SUMMARIZE_PERSONALITY,
            context! {
                name => &template.name,
                profile => &template.profile,
                traits => &template.traits,
            },
        )?;
        let summary = scenario
            .services()
            .generator
            .generate(&prompt_messages(prompt, scenario.id()), &GenerationParams::default())
            .await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(TroupeError::generation(format!(
                "empty personality summary for '{}'",
                template.name
            )));
        }
        Ok(summary.to_string())
    }

    async fn character_system_message(&self, scenario: &Arc<Scenario>, agent: &ScenarioAgent) -> Result<String> {
        let personality = self.personality(scenario, agent).await?;
        agent.set_personality(personality.clone());

        let template = scenario.template();
        scenario.prompts().render(
            prompts::CHARACTER_SYSTEM,
            context! {
                name => agent.name(),
                scenario_name => &template.name,
                user_name => scenario.user_name(),
                instructions => self.policy.scenario_instructions(scenario).await?,
                additional_context => &template.additional_context,
                role => self.policy.role_and_behavior(scenario, agent).await?,
                personality => personality,
                user_role => &template.user_role,
                additional_info => self.policy.extra_information(scenario, agent).await?,
            },
        )
    }

    async fn special_system_message(&self, scenario: &Arc<Scenario>, agent: &ScenarioAgent) -> Result<String> {
        scenario.prompts().render(
            prompts::SPECIAL_SYSTEM,
            context! {
                name => agent.name(),
                scenario_name => &scenario.template().name,
                role => self.policy.role_and_behavior(scenario, agent).await?,
            },
        )
    }

    /// The mentor prompt embeds the live transcript, so it is re-rendered
    /// before every mentor reply.
    async fn mentor_system_message(&self, scenario: &Arc<Scenario>, agent: &ScenarioAgent) -> Result<String> {
        let transcript = scenario
            .components()
            .controller()
            .current_conversation(scenario)
            .await
            .transcript();
        scenario.prompts().render(
            prompts::MENTOR_SYSTEM,
            context! {
                name => agent.name(),
                user_name => scenario.user_name(),
                scenario_name => &scenario.template().name,
                role => &agent.template().role,
                transcript => transcript,
            },
        )
    }

    pub async fn refresh_mentor(&self, scenario: &Arc<Scenario>, mentor: &ScenarioAgent) -> Result<()> {
        let system = self.mentor_system_message(scenario, mentor).await?;
        mentor.set_system_message(system).await;
        Ok(())
    }
}

#[async_trait]
impl ScenarioComponent for AgentBuilder {
    fn name(&self) -> &'static str {
        "agent_builder"
    }

    async fn awake(&self, scenario: &Arc<Scenario>) -> Result<()> {
        self.initialize_agents(scenario).await
    }
}
