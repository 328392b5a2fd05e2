//! Moderated debate. One round per generated topic. Debaters bid for the
//! floor after each user turn and rounds only move on a manual advance.

use super::numeric_field;
use crate::conversation::{BidAuction, FirstSpeakerMode, TurnPolicy};
use crate::scenario::{Scenario, ScenarioBlueprint};
use crate::stage::{StageCheck, StagePolicy, StageSnapshot, limit_warnings, rule_based_assessment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minijinja::context;
use std::sync::Arc;
use troupe_core::error::Result;
use troupe_core::generation::{GenerationParams, prompt_messages};
use troupe_core::message::{Conversation, Message};
use troupe_core::scenario::ScenarioInstance;
use troupe_core::stage::{ScenarioAssessment, ScenarioStage, StageData, StageFirstSpeakerMode};
use troupe_core::template::ScenarioTemplate;
use troupe_interaction::parse_numbered_list;

pub const SCENARIO_TYPE: &str = "debate";

const DEFAULT_ROUNDS: u32 = 3;
const DEFAULT_ROUND_MESSAGES: u32 = 6;

const TOPICS_PROMPT: &str = "debate_topics";
const OPENING_PROMPT: &str = "debate_opening";
const NEXT_ROUND_PROMPT: &str = "debate_next_round";

const TOPICS_TEMPLATE: &str = r#"List {{ count }} debate topics for {{ scenario_name }}.
{% if instructions %}{{ instructions }}
{% endif %}{% if subject %}Subject: {{ subject }}
{% endif %}Respond with a numbered list, one topic per line."#;

const OPENING_TEMPLATE: &str = r#"Welcome to {{ scenario_name }}. Today {{ user_name }} debates {{ debaters | join(", ") }}.
{% if topic %}First topic: {{ topic }}{% endif %}"#;

const NEXT_ROUND_TEMPLATE: &str = "{{ stage_name }}. The next topic is: {{ topic }}";

/// Bid-based turns plus moderator announcements.
pub struct DebateTurns;

impl DebateTurns {
    /// The moderator speaks outside the turn order. Its message goes to every
    /// debater without entering a step round.
    async fn moderate(&self, scenario: &Arc<Scenario>, content: String) -> Result<()> {
        let Some(moderator) = scenario.roster().special_agents.first().cloned() else {
            return Ok(());
        };
        let message: Message = moderator.send_pregenerated(scenario, content).await?;
        scenario
            .components()
            .controller()
            .broadcast(scenario, &message)
            .await;
        Ok(())
    }
}

#[async_trait]
impl TurnPolicy for DebateTurns {
    async fn next_speaker(
        &self,
        scenario: &Arc<Scenario>,
        current: Option<&str>,
        message: Option<&Message>,
    ) -> Result<Option<String>> {
        BidAuction.next_speaker(scenario, current, message).await
    }

    async fn on_opening(&self, scenario: &Arc<Scenario>) -> Result<()> {
        let topic = scenario
            .components()
            .stages()
            .current_stage()
            .await
            .and_then(|stage| stage.data.fields.get("topic").cloned());
        let debaters: Vec<String> = scenario.agents().iter().map(|a| a.name().to_string()).collect();
        let text = scenario.prompts().render(
            OPENING_PROMPT,
            context! {
                scenario_name => &scenario.template().name,
                user_name => scenario.user_name(),
                debaters => debaters,
                topic => topic,
            },
        )?;
        self.moderate(scenario, text).await
    }

    async fn on_stage_change(&self, scenario: &Arc<Scenario>, stage: &ScenarioStage) -> Result<()> {
        let text = scenario.prompts().render(
            NEXT_ROUND_PROMPT,
            context! {
                stage_name => stage.name(),
                topic => stage.data.fields.get("topic").unwrap_or(&stage.data.description),
            },
        )?;
        self.moderate(scenario, text).await
    }
}

pub struct DebateStages;

#[async_trait]
impl StagePolicy for DebateStages {
    fn first_speaker_mode(&self) -> StageFirstSpeakerMode {
        StageFirstSpeakerMode::Alternating
    }

    fn auto_advance(&self) -> bool {
        false
    }

    async fn generate_stages(&self, scenario: &Arc<Scenario>) -> Result<Vec<ScenarioStage>> {
        let config = &scenario.instance().config;
        let count = numeric_field(config, "stage_count", DEFAULT_ROUNDS);
        let limit = numeric_field(config, "stage_message_limit", DEFAULT_ROUND_MESSAGES);

        let prompt = scenario.prompts().render(
            TOPICS_PROMPT,
            context! {
                count => count,
                scenario_name => &scenario.template().name,
                instructions => &scenario.template().instructions,
                subject => config.field("subject"),
            },
        )?;
        let text = scenario
            .services()
            .generator
            .generate(&prompt_messages(prompt, scenario.id()), &GenerationParams::default())
            .await?;

        let agent_ids = scenario.roster().agent_ids();
        Ok(parse_numbered_list(&text)
            .into_iter()
            .take(count as usize)
            .enumerate()
            .map(|(index, topic)| {
                let data = StageData::new(format!("Round {}", index + 1), topic.clone())
                    .with_field("topic", topic);
                ScenarioStage::new(index, data, agent_ids.clone()).with_message_limit(limit)
            })
            .collect())
    }

    async fn check_advance(&self, stage: &mut ScenarioStage, now: DateTime<Utc>) -> Result<StageCheck> {
        let warnings = limit_warnings(stage, now, 1, 30);
        Ok(StageCheck {
            advance: stage.is_over_limit(now),
            warnings,
        })
    }

    async fn assess(
        &self,
        _scenario: &Arc<Scenario>,
        snapshot: &StageSnapshot,
        _conversation: &Conversation,
    ) -> Result<Option<ScenarioAssessment>> {
        Ok(Some(rule_based_assessment(snapshot, Utc::now())))
    }
}

pub fn blueprint(_instance: &ScenarioInstance, _template: &ScenarioTemplate) -> Result<ScenarioBlueprint> {
    Ok(ScenarioBlueprint::new(DebateTurns, DebateStages)
        .with_first_speaker(FirstSpeakerMode::User)
        .with_prompt(TOPICS_PROMPT, TOPICS_TEMPLATE)
        .with_prompt(OPENING_PROMPT, OPENING_TEMPLATE)
        .with_prompt(NEXT_ROUND_PROMPT, NEXT_ROUND_TEMPLATE))
}
