//! One-on-one interview. The interviewer opens and asks one generated
//! question per stage. Stages only move on a manual advance.

use super::numeric_field;
use crate::agent::ScenarioAgent;
use crate::agent_builder::AgentPromptPolicy;
use crate::conversation::{FirstSpeakerMode, FixedSpeaker};
use crate::scenario::{Scenario, ScenarioBlueprint};
use crate::stage::{StageCheck, StagePolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minijinja::context;
use serde::Deserialize;
use std::sync::Arc;
use troupe_core::error::Result;
use troupe_core::generation::{GenerationParams, prompt_messages};
use troupe_core::scenario::{ScenarioDuration, ScenarioInstance};
use troupe_core::stage::{ScenarioStage, StageData, StageFirstSpeakerMode};
use troupe_core::template::ScenarioTemplate;
use troupe_interaction::parsing::parse_structured_list;

pub const SCENARIO_TYPE: &str = "interview";

const QUESTIONS_PROMPT: &str = "interview_questions";

const QUESTIONS_TEMPLATE: &str = r#"Write {{ count }} interview questions {{ interviewer }} would ask {{ user_name }} in the scenario {{ scenario_name }}.
{% if instructions %}{{ instructions }}
{% endif %}{% if position %}The position is: {{ position }}
{% endif %}Difficulty: {{ difficulty }}.

Respond with a JSON array of objects {"name": string, "description": string, "question": string}."#;

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    name: String,
    #[serde(default)]
    description: String,
    question: String,
}

fn default_question_count(duration: ScenarioDuration) -> u32 {
    match duration {
        ScenarioDuration::Short => 3,
        ScenarioDuration::Medium => 5,
        ScenarioDuration::Long => 7,
    }
}

pub struct InterviewStages;

#[async_trait]
impl StagePolicy for InterviewStages {
    fn first_speaker_mode(&self) -> StageFirstSpeakerMode {
        StageFirstSpeakerMode::UserAlwaysFirst
    }

    async fn generate_stages(&self, scenario: &Arc<Scenario>) -> Result<Vec<ScenarioStage>> {
        let config = &scenario.instance().config;
        let count = numeric_field(config, "question_count", default_question_count(config.duration));
        let interviewer = scenario.agents().first().map(|a| a.name().to_string()).unwrap_or_default();

        let prompt = scenario.prompts().render(
            QUESTIONS_PROMPT,
            context! {
                count => count,
                interviewer => interviewer,
                user_name => scenario.user_name(),
                scenario_name => &scenario.template().name,
                instructions => &scenario.template().instructions,
                position => config.field("position"),
                difficulty => config.difficulty.to_string(),
            },
        )?;
        let text = scenario
            .services()
            .generator
            .generate(&prompt_messages(prompt, scenario.id()), &GenerationParams::default())
            .await?;
        let questions: Vec<GeneratedQuestion> = parse_structured_list(&text, "interview questions")?;

        let agent_ids = scenario.roster().agent_ids();
        Ok(questions
            .into_iter()
            .take(count as usize)
            .enumerate()
            .map(|(index, q)| {
                let data = StageData::new(q.name, q.description).with_field("question", q.question);
                ScenarioStage::new(index, data, agent_ids.clone())
            })
            .collect())
    }

    async fn check_advance(&self, _stage: &mut ScenarioStage, _now: DateTime<Utc>) -> Result<StageCheck> {
        Ok(StageCheck::default())
    }
}

/// Gives the interviewer the generated question list.
pub struct InterviewPrompts;

#[async_trait]
impl AgentPromptPolicy for InterviewPrompts {
    async fn role_and_behavior(&self, scenario: &Arc<Scenario>, agent: &ScenarioAgent) -> Result<String> {
        let questions: Vec<String> = scenario
            .components()
            .stages()
            .stages()
            .await
            .iter()
            .filter_map(|stage| stage.data.fields.get("question"))
            .enumerate()
            .map(|(index, question)| format!("{}. {question}", index + 1))
            .collect();

        let mut role = agent.template().role.clone();
        if !questions.is_empty() {
            role.push_str("\nAsk these questions one at a time, in order:\n");
            role.push_str(&questions.join("\n"));
        }
        Ok(role.trim().to_string())
    }
}

pub fn blueprint(_instance: &ScenarioInstance, _template: &ScenarioTemplate) -> Result<ScenarioBlueprint> {
    Ok(ScenarioBlueprint::new(FixedSpeaker { index: 0 }, InterviewStages)
        .with_first_speaker(FirstSpeakerMode::Ai)
        .with_agent_prompts(InterviewPrompts)
        .with_prompt(QUESTIONS_PROMPT, QUESTIONS_TEMPLATE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, config};

    const QUESTIONS: &str = r#"Here you go:
[
  {"name": "Motivation", "description": "Why here", "question": "Why this role?"},
  {"name": "Experience", "question": "Tell me about a hard project."},
  {"name": "Teamwork", "question": "How do you handle disagreement?"},
  {"name": "Closing", "question": "Any questions for me?"}
]"#;

    #[tokio::test]
    async fn test_questions_become_stages_and_reach_interviewer() {
        let harness = Harness::new();
        harness.generator.on("interview questions", QUESTIONS);
        let mut config = config("interview", &["alex"]);
        config.duration = ScenarioDuration::Short;
        let scenario = harness.builtin(config);

        scenario.components().awake(&scenario).await.unwrap();
        let question_calls = harness
            .generator
            .calls()
            .iter()
            .filter(|prompt| prompt.contains("interview questions"))
            .count();
        assert_eq!(question_calls, 1);

        let stages = scenario.components().stages().stages().await;
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].name(), "Motivation");
        assert_eq!(stages[1].data.fields.get("question").map(String::as_str), Some("Tell me about a hard project."));

        let system = scenario.agents()[0].conversation().await.messages[0].clone();
        assert!(system.is_system());
        assert!(system.content.contains("1. Why this role?"));
        assert!(system.content.contains("3. How do you handle disagreement?"));
        assert!(!system.content.contains("Any questions for me?"));
    }

    #[tokio::test]
    async fn test_malformed_questions_fail_awake() {
        let harness = Harness::new();
        harness.generator.on("interview questions", "I would rather not.");
        let scenario = harness.builtin(config("interview", &["alex"]));

        assert!(scenario.components().awake(&scenario).await.is_err());
        assert!(scenario.error_count() >= 1);
    }
}
