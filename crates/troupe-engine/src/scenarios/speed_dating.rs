//! Speed dating: one date per agent, each in its own sub-conversation.

use super::numeric_field;
use crate::conversation::{FirstSpeakerMode, StageParticipant};
use crate::scenario::{Scenario, ScenarioBlueprint};
use crate::stage::{StageCheck, StagePolicy, StageSnapshot, limit_warnings, rule_based_assessment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use troupe_core::error::Result;
use troupe_core::message::Conversation;
use troupe_core::scenario::{ScenarioDuration, ScenarioInstance};
use troupe_core::stage::{ScenarioAssessment, ScenarioStage, StageData, StageFirstSpeakerMode};
use troupe_core::template::ScenarioTemplate;

pub const SCENARIO_TYPE: &str = "speed_dating";

pub fn date_message_limit(duration: ScenarioDuration) -> u32 {
    match duration {
        ScenarioDuration::Short => 6,
        ScenarioDuration::Medium => 8,
        ScenarioDuration::Long => 10,
    }
}

pub struct DatingStages;

#[async_trait]
impl StagePolicy for DatingStages {
    fn first_speaker_mode(&self) -> StageFirstSpeakerMode {
        StageFirstSpeakerMode::Alternating
    }

    fn auto_advance(&self) -> bool {
        false
    }

    async fn generate_stages(&self, scenario: &Arc<Scenario>) -> Result<Vec<ScenarioStage>> {
        let config = &scenario.instance().config;
        let limit = date_message_limit(config.duration);
        let minutes: u64 = numeric_field(config, "date_minutes", 0);

        Ok(scenario
            .agents()
            .iter()
            .enumerate()
            .map(|(index, agent)| {
                let data = StageData::new(
                    format!("Date {} with {}", index + 1, agent.name()),
                    format!("{} meets {}", scenario.user_name(), agent.name()),
                );
                let stage = ScenarioStage::new(index, data, vec![agent.id().to_string()])
                    .with_message_limit(limit);
                if minutes > 0 {
                    stage.with_time_limit(minutes * 60)
                } else {
                    stage
                }
            })
            .collect())
    }

    async fn check_advance(&self, stage: &mut ScenarioStage, now: DateTime<Utc>) -> Result<StageCheck> {
        let warnings = limit_warnings(stage, now, 2, 60);
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
    Ok(ScenarioBlueprint::new(StageParticipant, DatingStages)
        .with_first_speaker(FirstSpeakerMode::User)
        .with_settings(json!({ "separate_agent_conversations": true })))
}
