//! The message envelope shared by every component and the transport boundary.
//!
//! A [`Message`] is the only shape that flows through a scenario: user input,
//! agent replies, mentor advice, system prompts and stage announcements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::{AsRefStr, Display};

/// Metadata key marking a user message as addressed to the mentor channel.
pub const TO_MENTOR_KEY: &str = "to_mentor";

/// Represents the role of a message in a scenario conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    /// System prompt or engine-generated instruction.
    System,
    /// Message from the human user.
    User,
    /// Message from an AI agent (character or special actor).
    Ai,
    /// Message from the mentor/advisor.
    Mentor,
    /// Condensed summary of earlier turns.
    Summary,
}

/// The canonical message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    pub scenario_instance_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Message {
    /// Creates a message stamped with the current time and empty metadata.
    pub fn new(
        role: MessageRole,
        content: impl Into<String>,
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        scenario_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            author_id: author_id.into(),
            author_name: author_name.into(),
            scenario_instance_id: scenario_instance_id.into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a system message with no author.
    pub fn system(content: impl Into<String>, scenario_instance_id: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content, "", "System", scenario_instance_id)
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_ai(&self) -> bool {
        self.role == MessageRole::Ai
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    /// Whether this message should be stepped through the mentor channel.
    pub fn is_to_mentor(&self) -> bool {
        self.metadata
            .get(TO_MENTOR_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// `"Name: content"`, the line format used in transcripts.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.author_name, self.content)
    }
}

/// The addressing prefix a speaker uses in text-completion transcripts.
pub fn speaker_prefix(name: &str) -> String {
    format!("{name}:")
}

/// An append-only transcript owned by one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Id of the agent that owns this transcript.
    pub owner_id: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns `true` once a system message has been recorded.
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(Message::is_system)
    }

    /// Replaces the leading system message, or inserts one at the front.
    pub fn set_system_message(&mut self, message: Message) {
        match self.messages.first_mut() {
            Some(first) if first.is_system() => *first = message,
            _ => self.messages.insert(0, message),
        }
    }

    /// Number of non-system messages.
    pub fn dialogue_len(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_system()).count()
    }

    /// A copy of this transcript with every system message removed.
    pub fn pruned(&self) -> Conversation {
        Conversation {
            owner_id: self.owner_id.clone(),
            messages: self
                .messages
                .iter()
                .filter(|m| !m.is_system())
                .cloned()
                .collect(),
        }
    }

    /// Joins non-system messages as `"Name: content"` lines.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .filter(|m| !m.is_system())
            .map(Message::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drops every message. Used on scenario teardown.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(role: MessageRole, content: &str) -> Message {
        Message::new(role, content, "a-1", "Alex", "scn-1")
    }

    #[test]
    fn test_mentor_envelope_round_trip() {
        let message = sample(MessageRole::Mentor, "Try asking about their goals.")
            .with_metadata("hint_level", json!(2))
            .with_metadata("tags", json!(["tone", "pacing"]))
            .with_metadata(TO_MENTOR_KEY, json!(false));

        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.role, MessageRole::Mentor);
        assert_eq!(decoded.metadata.len(), 3);
        assert_eq!(decoded.created_at, message.created_at);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_value(MessageRole::Ai).unwrap(), json!("ai"));
        assert_eq!(
            serde_json::to_value(MessageRole::Summary).unwrap(),
            json!("summary")
        );
    }

    #[test]
    fn test_to_mentor_flag() {
        let plain = sample(MessageRole::User, "hi");
        assert!(!plain.is_to_mentor());

        let flagged = plain.with_metadata(TO_MENTOR_KEY, json!(true));
        assert!(flagged.is_to_mentor());
    }

    #[test]
    fn test_pruned_and_transcript_skip_system() {
        let mut conversation = Conversation::new("a-1");
        conversation.push(Message::system("You are Alex.", "scn-1"));
        conversation.push(Message::new(MessageRole::User, "Hello", "u-1", "Sam", "scn-1"));
        conversation.push(sample(MessageRole::Ai, "Hi Sam"));

        assert_eq!(conversation.pruned().len(), 2);
        assert_eq!(conversation.dialogue_len(), 2);
        assert_eq!(conversation.transcript(), "Sam: Hello\nAlex: Hi Sam");
    }

    #[test]
    fn test_set_system_message_replaces_leading() {
        let mut conversation = Conversation::new("a-1");
        conversation.push(sample(MessageRole::Ai, "hey"));
        conversation.set_system_message(Message::system("first", "scn-1"));
        conversation.set_system_message(Message::system("second", "scn-1"));

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages[0].content, "second");
    }
}
