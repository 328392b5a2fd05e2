//! Stage model: the ordered phases of a scenario and their completion counters.

use crate::message::{Message, MessageRole};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Which side of the conversation speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerType {
    User,
    Ai,
}

impl SpeakerType {
    pub fn flipped(self) -> Self {
        match self {
            Self::User => Self::Ai,
            Self::Ai => Self::User,
        }
    }

    /// Unbiased coin flip.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.gen_bool(0.5) { Self::User } else { Self::Ai }
    }
}

/// Policy deciding who opens each stage after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageFirstSpeakerMode {
    #[default]
    UserAlwaysFirst,
    AiAlwaysFirst,
    Alternating,
    Random,
}

/// Computes the opening speaker of the next stage.
///
/// The agent index only moves forward when the new opener is an AI, and wraps
/// at `agent_count`.
pub fn next_stage_speaker<R: Rng + ?Sized>(
    mode: StageFirstSpeakerMode,
    previous: SpeakerType,
    previous_index: usize,
    agent_count: usize,
    rng: &mut R,
) -> (SpeakerType, usize) {
    let advance = |index: usize| {
        if agent_count == 0 {
            0
        } else {
            (index + 1) % agent_count
        }
    };

    let speaker = match mode {
        StageFirstSpeakerMode::UserAlwaysFirst => return (SpeakerType::User, previous_index),
        StageFirstSpeakerMode::AiAlwaysFirst => return (SpeakerType::Ai, advance(previous_index)),
        StageFirstSpeakerMode::Alternating => previous.flipped(),
        StageFirstSpeakerMode::Random => SpeakerType::random(rng),
    };

    match speaker {
        SpeakerType::Ai => (speaker, advance(previous_index)),
        SpeakerType::User => (speaker, previous_index),
    }
}

/// Stable descriptive data of a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    pub name: String,
    pub description: String,
    /// Generated, scenario-specific fields (e.g. the interview question).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl StageData {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// One phase of a scenario with its own completion criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStage {
    pub index: usize,
    pub data: StageData,
    /// Agents taking part in this stage.
    pub agent_ids: Vec<String>,
    /// `0` means no message limit.
    pub message_limit: u32,
    pub time_limit_secs: Option<u64>,
    pub user_message_count: u32,
    pub agent_message_count: u32,
    pub first_speaker: Option<SpeakerType>,
    pub first_speaker_agent_index: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub message_warning_sent: bool,
    pub time_warning_sent: bool,
}

impl ScenarioStage {
    pub fn new(index: usize, data: StageData, agent_ids: Vec<String>) -> Self {
        Self {
            index,
            data,
            agent_ids,
            message_limit: 0,
            time_limit_secs: None,
            user_message_count: 0,
            agent_message_count: 0,
            first_speaker: None,
            first_speaker_agent_index: 0,
            started_at: None,
            message_warning_sent: false,
            time_warning_sent: false,
        }
    }

    /// The fallback stage used when generation yields nothing.
    pub fn default_stage(agent_ids: Vec<String>) -> Self {
        Self::new(0, StageData::new("Default Stage", "Default Stage"), agent_ids)
    }

    pub fn with_message_limit(mut self, limit: u32) -> Self {
        self.message_limit = limit;
        self
    }

    pub fn with_time_limit(mut self, seconds: u64) -> Self {
        self.time_limit_secs = Some(seconds);
        self
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Marks the stage active with the given opener.
    pub fn initialize(&mut self, first_speaker: SpeakerType, agent_index: usize, now: DateTime<Utc>) {
        self.first_speaker = Some(first_speaker);
        self.first_speaker_agent_index = agent_index;
        self.started_at = Some(now);
    }

    pub fn is_initialized(&self) -> bool {
        self.started_at.is_some()
    }

    /// Counts a user or AI message. Other roles do not affect stage progress.
    pub fn record(&mut self, message: &Message) {
        match message.role {
            MessageRole::User => self.user_message_count += 1,
            MessageRole::Ai => self.agent_message_count += 1,
            _ => {}
        }
    }

    pub fn total_message_count(&self) -> u32 {
        self.user_message_count + self.agent_message_count
    }

    fn max_side_count(&self) -> u32 {
        self.user_message_count.max(self.agent_message_count)
    }

    /// True only once the busier side reached the limit and both sides had an
    /// equal number of turns.
    pub fn is_over_message_limit(&self) -> bool {
        self.message_limit != 0
            && self.max_side_count() >= self.message_limit
            && self.total_message_count() % 2 == 0
    }

    pub fn messages_remaining(&self) -> Option<u32> {
        (self.message_limit != 0).then(|| self.message_limit.saturating_sub(self.max_side_count()))
    }

    /// Fraction of the message limit used, `0.0` when unlimited.
    pub fn message_progress(&self) -> f32 {
        if self.message_limit == 0 {
            return 0.0;
        }
        (self.max_side_count() as f32 / self.message_limit as f32).min(1.0)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        let limit = self.time_limit_secs?;
        Some(started + chrono::Duration::seconds(limit as i64))
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.end_time().map(|end| (end - now).num_seconds().max(0))
    }

    /// Fraction of the time limit elapsed, `0.0` when untimed or not started.
    pub fn time_progress(&self, now: DateTime<Utc>) -> f32 {
        match (self.started_at, self.time_limit_secs) {
            (Some(started), Some(limit)) if limit > 0 => {
                let elapsed = (now - started).num_milliseconds().max(0) as f32 / 1000.0;
                (elapsed / limit as f32).min(1.0)
            }
            _ => 0.0,
        }
    }

    pub fn is_over_time_limit(&self, now: DateTime<Utc>) -> bool {
        self.end_time().is_some_and(|end| now >= end)
    }

    pub fn is_over_limit(&self, now: DateTime<Utc>) -> bool {
        self.is_over_message_limit() || self.is_over_time_limit(now)
    }

    /// `"∞"` when unlimited, otherwise `"{user_count}/{limit}"`.
    pub fn progress_label(&self) -> String {
        if self.message_limit == 0 {
            "∞".to_string()
        } else {
            format!("{}/{}", self.user_message_count, self.message_limit)
        }
    }
}

/// LLM-derived judgment of whether the scenario is done.
///
/// Purely informational for the client. Stage advancement never depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAssessment {
    pub complete: bool,
    /// `0.0..=1.0`
    pub progress: f32,
    /// `0.0..=1.0`
    pub confidence: f32,
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn stage_with_counts(limit: u32, user: u32, ai: u32) -> ScenarioStage {
        let mut stage = ScenarioStage::new(0, StageData::new("s", "d"), vec![]).with_message_limit(limit);
        stage.user_message_count = user;
        stage.agent_message_count = ai;
        stage
    }

    fn msg(role: MessageRole) -> Message {
        Message::new(role, "x", "id", "name", "scn")
    }

    #[test]
    fn test_alternating_index_sequence() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut speaker = SpeakerType::Ai;
        let mut index = 0;
        let mut seen = vec![(speaker, index)];

        for _ in 0..4 {
            (speaker, index) =
                next_stage_speaker(StageFirstSpeakerMode::Alternating, speaker, index, 2, &mut rng);
            seen.push((speaker, index));
        }

        assert_eq!(
            seen,
            vec![
                (SpeakerType::Ai, 0),
                (SpeakerType::User, 0),
                (SpeakerType::Ai, 1),
                (SpeakerType::User, 1),
                (SpeakerType::Ai, 0),
            ]
        );
    }

    #[test]
    fn test_fixed_policies() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            next_stage_speaker(StageFirstSpeakerMode::UserAlwaysFirst, SpeakerType::Ai, 2, 3, &mut rng),
            (SpeakerType::User, 2)
        );
        assert_eq!(
            next_stage_speaker(StageFirstSpeakerMode::AiAlwaysFirst, SpeakerType::Ai, 2, 3, &mut rng),
            (SpeakerType::Ai, 0)
        );
    }

    #[test]
    fn test_random_policy_only_advances_for_ai() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            let (speaker, index) =
                next_stage_speaker(StageFirstSpeakerMode::Random, SpeakerType::User, 1, 3, &mut rng);
            match speaker {
                SpeakerType::Ai => assert_eq!(index, 2),
                SpeakerType::User => assert_eq!(index, 1),
            }
        }
    }

    #[test]
    fn test_message_limit_requires_even_total() {
        let mut stage = stage_with_counts(4, 0, 0);
        stage.record(&msg(MessageRole::User));
        stage.record(&msg(MessageRole::Ai));
        stage.record(&msg(MessageRole::User));
        assert!(!stage.is_over_message_limit());

        stage.record(&msg(MessageRole::Ai));
        assert_eq!((stage.user_message_count, stage.agent_message_count), (2, 2));
        assert!(!stage.is_over_message_limit());
    }

    #[test]
    fn test_message_limit_boundaries() {
        // max reached, even total
        assert!(stage_with_counts(2, 2, 2).is_over_message_limit());
        assert!(stage_with_counts(3, 3, 1).is_over_message_limit());
        // max reached, odd total
        assert!(!stage_with_counts(3, 3, 0).is_over_message_limit());
        assert!(!stage_with_counts(2, 2, 1).is_over_message_limit());
        // even total, max below limit
        assert!(!stage_with_counts(4, 2, 2).is_over_message_limit());
        assert!(!stage_with_counts(4, 3, 1).is_over_message_limit());
        // unlimited
        assert!(!stage_with_counts(0, 10, 10).is_over_message_limit());
    }

    #[test]
    fn test_mentor_and_system_messages_do_not_count() {
        let mut stage = stage_with_counts(2, 0, 0);
        stage.record(&msg(MessageRole::Mentor));
        stage.record(&msg(MessageRole::System));
        assert_eq!(stage.total_message_count(), 0);
    }

    #[test]
    fn test_time_limit() {
        let now = Utc::now();
        let mut stage = ScenarioStage::new(0, StageData::default(), vec![]).with_time_limit(60);
        assert!(!stage.is_over_time_limit(now));

        stage.initialize(SpeakerType::User, 0, now);
        assert!(!stage.is_over_limit(now + chrono::Duration::seconds(59)));
        assert!(stage.is_over_limit(now + chrono::Duration::seconds(60)));
        assert_eq!(stage.seconds_remaining(now + chrono::Duration::seconds(45)), Some(15));
        assert!((stage.time_progress(now + chrono::Duration::seconds(30)) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_progress_label() {
        assert_eq!(stage_with_counts(0, 3, 3).progress_label(), "∞");
        assert_eq!(stage_with_counts(6, 2, 3).progress_label(), "2/6");
    }
}
