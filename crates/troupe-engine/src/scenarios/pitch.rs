//! Pitch to investors. The user pitches and the investors answer in turn
//! within a single open-ended stage.

use crate::conversation::{FirstSpeakerMode, RoundRobin};
use crate::scenario::{Scenario, ScenarioBlueprint};
use crate::stage::StagePolicy;
use async_trait::async_trait;
use std::sync::Arc;
use troupe_core::error::Result;
use troupe_core::scenario::ScenarioInstance;
use troupe_core::stage::ScenarioStage;
use troupe_core::template::ScenarioTemplate;

pub const SCENARIO_TYPE: &str = "pitch_to_investors";

pub struct PitchStages;

#[async_trait]
impl StagePolicy for PitchStages {
    async fn generate_stages(&self, _scenario: &Arc<Scenario>) -> Result<Vec<ScenarioStage>> {
        Ok(Vec::new())
    }
}

pub fn blueprint(_instance: &ScenarioInstance, _template: &ScenarioTemplate) -> Result<ScenarioBlueprint> {
    Ok(ScenarioBlueprint::new(RoundRobin, PitchStages).with_first_speaker(FirstSpeakerMode::User))
}
