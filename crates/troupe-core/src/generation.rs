//! Generation backend and moderation collaborator traits.
//!
//! The engine treats "produce a completion for this input" as an opaque async
//! capability. Implementations live outside this workspace.

use crate::error::Result;
use crate::message::{Message, MessageRole};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Per-call generation parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    /// The backend stops before emitting any of these.
    #[serde(default)]
    pub stop: Vec<String>,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A stream of text chunks from the backend.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Generates a complete response for the given conversation.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::Generation` if the backend call fails.
    async fn generate(&self, messages: &[Message], params: &GenerationParams) -> Result<String>;

    /// Generates a response as a stream of chunks.
    ///
    /// The default yields the one-shot response as a single chunk.
    async fn generate_stream(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream> {
        let text = self.generate(messages, params).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }

    /// Some backends reject a conversation that has no user-authored turn.
    fn requires_leading_user_turn(&self) -> bool {
        false
    }
}

/// Wraps a standalone prompt as a single user turn.
pub fn prompt_messages(prompt: impl Into<String>, scenario_instance_id: &str) -> Vec<Message> {
    vec![Message::new(
        MessageRole::User,
        prompt,
        "",
        "User",
        scenario_instance_id,
    )]
}

/// Content-policy check applied to user input.
#[async_trait]
pub trait ModerationService: Send + Sync {
    /// Returns `true` if the text violates the content policy.
    async fn is_flagged(&self, text: &str) -> Result<bool>;
}

/// Moderation that never flags anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllModeration;

#[async_trait]
impl ModerationService for AllowAllModeration {
    async fn is_flagged(&self, _text: &str) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, messages: &[Message], _params: &GenerationParams) -> Result<String> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_chunk() {
        let chunks: Vec<String> = Echo
            .generate_stream(&prompt_messages("hello", "scn"), &GenerationParams::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks, vec!["hello".to_string()]);
        assert!(!Echo.requires_leading_user_turn());
    }
}
