//! Conversational participants of a scenario.

use crate::scenario::Scenario;
use futures::StreamExt;
use minijinja::context;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::RwLock;
use troupe_core::agent::AgentType;
use troupe_core::error::Result;
use troupe_core::generation::{GenerationParams, prompt_messages};
use troupe_core::message::{Conversation, Message, MessageRole, speaker_prefix};
use troupe_core::template::ActorTemplate;
use troupe_core::transport::ClientEvent;
use troupe_interaction::{parse_bid, prompts};

/// One AI participant: a character, a special actor or the mentor.
///
/// An agent only knows the id of its scenario. Every operation that needs
/// the scenario receives it as a parameter.
pub struct ScenarioAgent {
    template: ActorTemplate,
    kind: AgentType,
    scenario_instance_id: String,
    params: GenerationParams,
    conversation: RwLock<Conversation>,
    personality: StdRwLock<String>,
}

impl ScenarioAgent {
    pub fn new(
        template: ActorTemplate,
        kind: AgentType,
        scenario_instance_id: impl Into<String>,
        params: GenerationParams,
    ) -> Self {
        let conversation = Conversation::new(template.id.clone());
        Self {
            template,
            kind,
            scenario_instance_id: scenario_instance_id.into(),
            params,
            conversation: RwLock::new(conversation),
            personality: StdRwLock::new(String::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.template.id
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub fn kind(&self) -> AgentType {
        self.kind
    }

    pub fn template(&self) -> &ActorTemplate {
        &self.template
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// The `"Name:"` prefix this agent speaks under.
    pub fn prefix(&self) -> String {
        speaker_prefix(self.name())
    }

    pub fn personality(&self) -> String {
        self.personality
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_personality(&self, personality: impl Into<String>) {
        *self.personality.write().unwrap_or_else(PoisonError::into_inner) = personality.into();
    }

    pub async fn add_message(&self, message: Message) {
        self.conversation.write().await.push(message);
    }

    pub async fn set_system_message(&self, content: impl Into<String>) {
        let message = Message::system(content, &self.scenario_instance_id);
        self.conversation.write().await.set_system_message(message);
    }

    /// A snapshot of this agent's transcript.
    pub async fn conversation(&self) -> Conversation {
        self.conversation.read().await.clone()
    }

    pub async fn dialogue_len(&self) -> usize {
        self.conversation.read().await.dialogue_len()
    }

    pub async fn clear(&self) {
        self.conversation.write().await.clear();
    }

    fn reply_role(&self) -> MessageRole {
        match self.kind {
            AgentType::Mentor => MessageRole::Mentor,
            AgentType::Agent | AgentType::SpecialAgent => MessageRole::Ai,
        }
    }

    /// Builds a message authored by this agent.
    pub fn message(&self, content: impl Into<String>) -> Message {
        Message::new(
            self.reply_role(),
            content,
            self.id(),
            self.name(),
            &self.scenario_instance_id,
        )
    }

    /// Drops an echoed `"Name:"` prefix some backends emit.
    fn clean_reply(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        trimmed
            .strip_prefix(&self.prefix())
            .unwrap_or(trimmed)
            .trim()
            .to_string()
    }

    /// Generates one reply, records it and sends it as a complete message.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails or the client cannot be reached.
    pub async fn run(&self, scenario: &Arc<Scenario>) -> Result<Message> {
        scenario
            .send(ClientEvent::TypingStart {
                author_id: self.id().to_string(),
            })
            .await?;

        let messages = self.conversation.read().await.messages.clone();
        let raw = scenario
            .services()
            .generator
            .generate(&messages, &self.params)
            .await?;
        tracing::debug!(target: "troupe::llm", agent = self.name(), chars = raw.len(), "Generated reply");

        let message = self.message(self.clean_reply(&raw));
        self.add_message(message.clone()).await;
        scenario.send(ClientEvent::Message(message.clone())).await?;
        Ok(message)
    }

    /// Generates one reply and forwards it to the client chunk by chunk.
    pub async fn run_stream(&self, scenario: &Arc<Scenario>) -> Result<Message> {
        let author_id = self.id().to_string();
        scenario
            .send(ClientEvent::StreamStart {
                author_id: author_id.clone(),
            })
            .await?;

        let messages = self.conversation.read().await.messages.clone();
        let mut chunks = scenario
            .services()
            .generator
            .generate_stream(&messages, &self.params)
            .await?;

        let mut raw = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            raw.push_str(&chunk);
            scenario
                .send(ClientEvent::StreamChunk {
                    author_id: author_id.clone(),
                    chunk,
                })
                .await?;
        }

        let message = self.message(self.clean_reply(&raw));
        self.add_message(message.clone()).await;
        scenario
            .send(ClientEvent::StreamEnd {
                message: message.clone(),
            })
            .await?;
        Ok(message)
    }

    /// Records and sends text that was not generated by the backend.
    pub async fn send_pregenerated(
        &self,
        scenario: &Arc<Scenario>,
        content: impl Into<String>,
    ) -> Result<Message> {
        let message = self.message(content);
        self.add_message(message.clone()).await;
        scenario.send(ClientEvent::Message(message.clone())).await?;
        Ok(message)
    }

    /// How strongly this agent wants to speak next, as judged by the backend.
    pub async fn bid(&self, scenario: &Arc<Scenario>, transcript: &str) -> Result<f32> {
        let prompt = scenario.prompts().render(
            prompts::BID,
            context! { name => self.name(), transcript => transcript },
        )?;
        let text = scenario
            .services()
            .generator
            .generate(
                &prompt_messages(prompt, &self.scenario_instance_id),
                &GenerationParams::default().with_temperature(0.0),
            )
            .await?;
        parse_bid(&text)
    }
}

/// The agents of one scenario, grouped by kind.
#[derive(Default)]
pub struct AgentRoster {
    pub agents: Vec<Arc<ScenarioAgent>>,
    pub special_agents: Vec<Arc<ScenarioAgent>>,
    pub mentor: Option<Arc<ScenarioAgent>>,
}

impl AgentRoster {
    /// Primary agents followed by special agents.
    pub fn participants(&self) -> impl Iterator<Item = &Arc<ScenarioAgent>> {
        self.agents.iter().chain(self.special_agents.iter())
    }

    /// Every agent including the mentor.
    pub fn all(&self) -> impl Iterator<Item = &Arc<ScenarioAgent>> {
        self.participants().chain(self.mentor.iter())
    }

    /// Finds a participant by id. The mentor is never a turn-taking speaker.
    pub fn find(&self, id: &str) -> Option<&Arc<ScenarioAgent>> {
        self.participants().find(|agent| agent.id() == id)
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(kind: AgentType) -> ScenarioAgent {
        ScenarioAgent::new(
            ActorTemplate {
                id: "alex".to_string(),
                name: "Alex".to_string(),
                profile: String::new(),
                traits: Vec::new(),
                role: String::new(),
            },
            kind,
            "scn-1",
            GenerationParams::default(),
        )
    }

    #[test]
    fn test_reply_role_follows_agent_kind() {
        assert_eq!(agent(AgentType::Agent).message("hi").role, MessageRole::Ai);
        assert_eq!(agent(AgentType::SpecialAgent).message("hi").role, MessageRole::Ai);
        assert_eq!(agent(AgentType::Mentor).message("hi").role, MessageRole::Mentor);
    }

    #[test]
    fn test_clean_reply_strips_echoed_prefix() {
        let alex = agent(AgentType::Agent);
        assert_eq!(alex.clean_reply("  Alex: Welcome in.  "), "Welcome in.");
        assert_eq!(alex.clean_reply("Welcome in."), "Welcome in.");
    }

    #[tokio::test]
    async fn test_system_message_stays_first() {
        let alex = agent(AgentType::Agent);
        alex.add_message(alex.message("early")).await;
        alex.set_system_message("You are Alex.").await;

        let conversation = alex.conversation().await;
        assert!(conversation.messages[0].is_system());
        assert_eq!(alex.dialogue_len().await, 1);

        alex.clear().await;
        assert!(alex.conversation().await.is_empty());
    }
}
