//! Jinja prompt templates rendered with minijinja.
//!
//! Scenario types register their own templates on top of the built-in set.

use minijinja::Environment;
use serde::Serialize;
use troupe_core::error::{Result, TroupeError};

pub const CHARACTER_SYSTEM: &str = "character_system";
pub const SPECIAL_SYSTEM: &str = "special_system";
pub const MENTOR_SYSTEM: &str = "mentor_system";
pub const PERSONALITY: &str = "personality";
pub const SUMMARIZE_PERSONALITY: &str = "summarize_personality";
pub const ASSESSMENT: &str = "assessment";
pub const SOCIAL_ANALYSIS: &str = "social_analysis";
pub const SCENARIO_ANALYSIS: &str = "scenario_analysis";
pub const ACTOR_FEEDBACK: &str = "actor_feedback";
pub const BID: &str = "bid";
pub const STAGE_ANNOUNCEMENT: &str = "stage_announcement";

const BUILTIN: &[(&str, &str)] = &[
    (
        CHARACTER_SYSTEM,
        r#"You are {{ name }}, a character in a role-play scenario: {{ scenario_name }}.
Stay in character. Never speak for {{ user_name }} or any other participant.
{% if instructions %}
Scenario instructions:
{{ instructions }}
{% endif %}{% if additional_context %}
Context:
{{ additional_context }}
{% endif %}{% if role %}
Your role:
{{ role }}
{% endif %}
Your personality:
{{ personality }}
{% if user_role %}
{{ user_name }} is playing: {{ user_role }}
{% endif %}{% if additional_info %}
The following is IMPORTANT additional information about {{ name }}: {{ additional_info }}
{% endif %}"#,
    ),
    (
        SPECIAL_SYSTEM,
        r#"You are {{ name }} in the scenario {{ scenario_name }}.
{% if role %}{{ role }}
{% endif %}Keep your messages short and neutral."#,
    ),
    (
        MENTOR_SYSTEM,
        r#"You are {{ name }}, a mentor coaching {{ user_name }} through the scenario {{ scenario_name }}.
{% if role %}{{ role }}
{% endif %}Give brief, actionable advice. Do not role-play the other characters.

The conversation so far:
{% if transcript %}{{ transcript }}{% else %}(nothing yet){% endif %}"#,
    ),
    (
        PERSONALITY,
        r#"{{ profile }}{% if traits %}
Traits: {{ traits | join(", ") }}{% endif %}"#,
    ),
    (
        SUMMARIZE_PERSONALITY,
        r#"Summarize the personality of {{ name }} in a short paragraph written in the second person.

Profile:
{{ profile }}
{% if traits %}Traits: {{ traits | join(", ") }}{% endif %}"#,
    ),
    (
        ASSESSMENT,
        r#"Judge whether the following {{ scenario_name }} conversation has reached its natural conclusion.
Current stage: {{ stage_name }} ({{ stage_index + 1 }} of {{ stage_count }}).

{{ transcript }}

Respond with a JSON object: {"complete": bool, "progress": number between 0 and 1, "confidence": number between 0 and 1, "reasoning": string}"#,
    ),
    (
        SOCIAL_ANALYSIS,
        r#"Evaluate the social skills {{ user_name }} showed in the transcript below.

{{ transcript }}

Respond with a JSON object with the keys overall_score, overall_impression, areas_for_improvement, areas_of_excellence, growth_strategies, and a {"score", "notes"} object for each of: emotional_intelligence, active_listening, effective_communication, social_awareness, confidence, conflict_resolution, adaptability, persuasion_and_influence. Scores range from 0 to 10."#,
    ),
    (
        SCENARIO_ANALYSIS,
        r#"Evaluate how well {{ user_name }} performed in the scenario {{ scenario_name }}.
{% if instructions %}{{ instructions }}
{% endif %}
{{ transcript }}

Respond with a JSON object {"summary": string, "metrics": {...}} where metrics has a {"score", "notes"} object for each of: {{ skills | join(", ") }}. Scores range from 0 to 10."#,
    ),
    (
        ACTOR_FEEDBACK,
        r#"You are {{ name }}. Based on your conversation below, give {{ user_name }} honest, in-character feedback in a few sentences.

{{ transcript }}"#,
    ),
    (
        BID,
        r#"You are {{ name }}. Given the conversation below, how strongly do you want to speak next?
Answer with a single number from 0 to 10.

{{ transcript }}"#,
    ),
    (STAGE_ANNOUNCEMENT, "Begin {{ stage_name }}"),
];

/// A set of named prompt templates.
pub struct PromptLibrary {
    env: Environment<'static>,
}

impl PromptLibrary {
    /// Creates a library with the built-in templates.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::Config` if a built-in template fails to compile.
    pub fn new() -> Result<Self> {
        let mut library = Self {
            env: Environment::new(),
        };
        for &(name, source) in BUILTIN {
            library.add(name, source)?;
        }
        Ok(library)
    }

    /// Adds or replaces a template.
    pub fn add(&mut self, name: &'static str, source: &'static str) -> Result<()> {
        self.env
            .add_template(name, source)
            .map_err(|e| TroupeError::config(format!("invalid prompt template '{name}': {e}")))
    }

    pub fn with(mut self, name: &'static str, source: &'static str) -> Result<Self> {
        self.add(name, source)?;
        Ok(self)
    }

    pub fn has(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    /// Renders a template with the given context.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::NotFound` for an unknown template and
    /// `TroupeError::Internal` if rendering fails.
    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .map_err(|_| TroupeError::not_found("prompt template", name))?;
        template
            .render(context)
            .map(|text| text.trim().to_string())
            .map_err(|e| TroupeError::internal(format!("failed to render '{name}': {e}")))
    }
}
