//! Post-scenario analysis.
//!
//! Social skills, scenario skills and per-agent feedback run as one
//! concurrent batch. Any failure fails the whole analysis.

use crate::component::ScenarioComponent;
use crate::scenario::Scenario;
use async_trait::async_trait;
use futures::future::try_join_all;
use minijinja::context;
use std::sync::Arc;
use troupe_core::analysis::{ActorFeedback, ScenarioAnalysis, ScenarioSkillsAnalysis, SocialAnalysis};
use troupe_core::error::{Result, TroupeError};
use troupe_core::generation::{GenerationParams, prompt_messages};
use troupe_core::message::Conversation;
use troupe_interaction::{parse_structured, prompts};

/// Agents with fewer dialogue messages than this get no feedback.
pub const MIN_FEEDBACK_MESSAGES: usize = 2;

/// Scenario-specific analysis inputs.
pub trait AnalysisPolicy: Send + Sync {
    /// Metric names the scenario-skills analysis must return.
    fn required_skills(&self, scenario: &Scenario) -> Vec<String> {
        scenario.template().skills.clone()
    }

    /// The transcript every analysis call sees.
    fn transcript(&self, scenario: &Scenario, conversations: &[Conversation]) -> String {
        default_transcript(scenario, conversations)
    }
}

pub struct DefaultAnalysis;

impl AnalysisPolicy for DefaultAnalysis {}

/// In shared mode the longest transcript holds the whole conversation. In
/// separate mode each agent's sub-conversation gets its own block.
pub fn default_transcript(scenario: &Scenario, conversations: &[Conversation]) -> String {
    if !scenario.settings().separate_agent_conversations {
        return conversations
            .iter()
            .max_by_key(|c| c.dialogue_len())
            .map(Conversation::transcript)
            .unwrap_or_default();
    }

    conversations
        .iter()
        .filter(|c| c.dialogue_len() > 0)
        .map(|c| {
            let name = scenario
                .roster()
                .find(&c.owner_id)
                .map_or(c.owner_id.as_str(), |agent| agent.name());
            format!(
                "Start {name} Transcript\n{}\nEnd {name} Transcript",
                c.transcript()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct AnalysisEngine {
    policy: Box<dyn AnalysisPolicy>,
}

impl AnalysisEngine {
    pub fn new(policy: Box<dyn AnalysisPolicy>) -> Self {
        Self { policy }
    }

    async fn generate(&self, scenario: &Scenario, prompt: String) -> Result<String> {
        let params = GenerationParams::default().with_temperature(scenario.settings().analysis_temperature);
        scenario
            .services()
            .generator
            .generate(&prompt_messages(prompt, scenario.id()), &params)
            .await
    }

    async fn social(&self, scenario: &Scenario, transcript: &str) -> Result<SocialAnalysis> {
        let prompt = scenario.prompts().render(
            prompts::SOCIAL_ANALYSIS,
            context! { user_name => scenario.user_name(), transcript => transcript },
        )?;
        let text = self.generate(scenario, prompt).await?;
        parse_structured(&text, "SocialAnalysis")
    }

    async fn scenario_skills(&self, scenario: &Scenario, transcript: &str) -> Result<ScenarioSkillsAnalysis> {
        let skills = self.policy.required_skills(scenario);
        let prompt = scenario.prompts().render(
            prompts::SCENARIO_ANALYSIS,
            context! {
                user_name => scenario.user_name(),
                scenario_name => &scenario.template().name,
                instructions => &scenario.template().instructions,
                transcript => transcript,
                skills => &skills,
            },
        )?;
        let text = self.generate(scenario, prompt).await?;
        let analysis: ScenarioSkillsAnalysis = parse_structured(&text, "ScenarioSkillsAnalysis")?;
        analysis.ensure_metrics(&skills)?;
        Ok(analysis)
    }

    async fn feedback(&self, scenario: &Scenario, conversation: &Conversation) -> Result<ActorFeedback> {
        let name = scenario
            .roster()
            .find(&conversation.owner_id)
            .map_or(conversation.owner_id.as_str(), |agent| agent.name());
        let prompt = scenario.prompts().render(
            prompts::ACTOR_FEEDBACK,
            context! {
                name => name,
                user_name => scenario.user_name(),
                transcript => conversation.transcript(),
            },
        )?;
        let text = self.generate(scenario, prompt).await?;
        let feedback = text.trim();
        if feedback.is_empty() {
            return Err(TroupeError::parse(
                "ActorFeedback",
                format!("empty feedback from '{name}'"),
            ));
        }
        Ok(ActorFeedback {
            actor_id: conversation.owner_id.clone(),
            feedback: feedback.to_string(),
        })
    }

    /// Runs every analysis concurrently and joins them.
    ///
    /// Feedback is requested from each primary agent whose transcript has at
    /// least [`MIN_FEEDBACK_MESSAGES`] dialogue messages.
    ///
    /// # Errors
    ///
    /// Returns the first failure of any sub-analysis. No partial analysis is
    /// ever returned.
    pub async fn analyze_all(&self, scenario: &Scenario, conversations: &[Conversation]) -> Result<ScenarioAnalysis> {
        let transcript = self.policy.transcript(scenario, conversations);
        let agent_ids = scenario.roster().agent_ids();
        let feedback_targets: Vec<&Conversation> = conversations
            .iter()
            .filter(|c| agent_ids.contains(&c.owner_id))
            .filter(|c| c.dialogue_len() >= MIN_FEEDBACK_MESSAGES)
            .collect();

        tracing::info!(
            target: "troupe::llm",
            scenario_id = %scenario.id(),
            feedback = feedback_targets.len(),
            "Running scenario analysis"
        );

        let (social, skills, feedback) = tokio::try_join!(
            self.social(scenario, &transcript),
            self.scenario_skills(scenario, &transcript),
            try_join_all(feedback_targets.into_iter().map(|c| self.feedback(scenario, c))),
        )?;

        Ok(ScenarioAnalysis {
            social,
            scenario: skills,
            feedback,
        })
    }
}

#[async_trait]
impl ScenarioComponent for AnalysisEngine {
    fn name(&self) -> &'static str {
        "analysis_engine"
    }
}
