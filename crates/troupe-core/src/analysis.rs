//! Post-scenario analysis models and the terminal scenario result.
//!
//! Every field is mandatory on deserialization: a model response that omits
//! one must fail to parse rather than produce a zero-valued analysis.

use crate::error::{Result, TroupeError};
use crate::message::Conversation;
use crate::scenario::ScenarioInstance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single scored skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub score: f32,
    pub notes: String,
}

/// General social skills scoring, shared by every scenario type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialAnalysis {
    pub overall_score: f32,
    pub overall_impression: String,
    pub areas_for_improvement: Vec<String>,
    pub areas_of_excellence: Vec<String>,
    pub growth_strategies: Vec<String>,
    pub emotional_intelligence: Metric,
    pub active_listening: Metric,
    pub effective_communication: Metric,
    pub social_awareness: Metric,
    pub confidence: Metric,
    pub conflict_resolution: Metric,
    pub adaptability: Metric,
    pub persuasion_and_influence: Metric,
}

/// Scoring of the skills a particular scenario type exercises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSkillsAnalysis {
    pub summary: String,
    pub metrics: BTreeMap<String, Metric>,
}

impl ScenarioSkillsAnalysis {
    /// Fails if any of `required` has no metric.
    pub fn ensure_metrics(&self, required: &[String]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|name| !self.metrics.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TroupeError::parse(
                "ScenarioSkillsAnalysis",
                format!("missing metrics: {}", missing.join(", ")),
            ))
        }
    }
}

/// One character's feedback to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorFeedback {
    pub actor_id: String,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAnalysis {
    pub social: SocialAnalysis,
    pub scenario: ScenarioSkillsAnalysis,
    pub feedback: Vec<ActorFeedback>,
}

/// The terminal artifact of a completed scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub instance: ScenarioInstance,
    /// Final transcripts with system messages removed.
    pub conversations: Vec<Conversation>,
    pub analysis: ScenarioAnalysis,
    pub created_at: DateTime<Utc>,
}

impl ScenarioResult {
    pub fn new(
        instance: ScenarioInstance,
        conversations: Vec<Conversation>,
        analysis: ScenarioAnalysis,
    ) -> Self {
        Self {
            instance,
            conversations,
            analysis,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_metric_is_rejected() {
        let analysis: ScenarioSkillsAnalysis = serde_json::from_value(json!({
            "summary": "ok",
            "metrics": { "rebuttal": { "score": 7.0, "notes": "sharp" } }
        }))
        .unwrap();

        assert!(analysis.ensure_metrics(&["rebuttal".to_string()]).is_ok());
        let err = analysis
            .ensure_metrics(&["rebuttal".to_string(), "evidence".to_string()])
            .unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_social_analysis_requires_every_field() {
        let partial = json!({ "overall_score": 5.0, "overall_impression": "fine" });
        assert!(serde_json::from_value::<SocialAnalysis>(partial).is_err());
    }
}
