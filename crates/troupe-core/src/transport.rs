//! Transport boundary: the events exchanged with a connected client and the
//! connection-setup error taxonomy.

use crate::error::{Result, TroupeError};
use crate::message::Message;
use crate::stage::ScenarioAssessment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use thiserror::Error;

/// Notifications rendered by the client as status, not as chat messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// The user is expected to speak next.
    AwaitUserMessage,
    /// The active stage reached its limit and waits for a manual advance.
    StageComplete { stage_index: usize },
    /// The final stage finished.
    ScenarioComplete,
    /// The mentor channel warns that the stage is about to end.
    AdvisorWarning { text: String },
}

/// Events sent from the engine to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Ready,
    Message(Message),
    TypingStart {
        author_id: String,
    },
    StreamStart {
        author_id: String,
    },
    StreamChunk {
        author_id: String,
        chunk: String,
    },
    StreamEnd {
        message: Message,
    },
    Notification(Notification),
    StageProgress {
        stage_index: usize,
        stage_count: usize,
        stage_name: String,
        progress: String,
    },
    Assessment(ScenarioAssessment),
    Terminated {
        reason: String,
    },
    ConnectionClosed {
        reason: String,
    },
}

/// Events received from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    UserMessage(Message),
    /// Manual trigger for scenarios that do not auto-advance.
    AdvanceStage,
}

/// Callback invoked for every inbound event.
pub type InboundHandler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// A live client connection.
///
/// Framing and the underlying socket are owned by the implementation.
#[async_trait]
pub trait ScenarioTransport: Send + Sync {
    /// Accepts the connection.
    async fn accept(&self) -> Result<()>;

    /// Waits until the client reports it is ready to receive events.
    async fn wait_for_ready(&self) -> Result<()>;

    /// Sends one event to the client.
    async fn send(&self, event: ClientEvent) -> Result<()>;

    /// Registers a handler for inbound events.
    fn subscribe(&self, handler: InboundHandler);

    /// Receives events until the client disconnects, dispatching each to the
    /// registered handlers.
    async fn listen(&self) -> Result<()>;

    /// Closes the connection with a close code and a client-visible reason.
    async fn close(&self, code: u16, reason: &str) -> Result<()>;

    /// Terminates the connection immediately.
    async fn force_close(&self);
}

/// The connection-setup stage in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStage {
    GetScenario,
    Accept,
    WaitForReady,
    SendReady,
    InitializeScenario,
    Receive,
}

pub const CLOSE_TIMEOUT: u16 = 1008;
pub const CLOSE_SCENARIO_NOT_FOUND: u16 = 4001;
pub const CLOSE_INITIALIZE_SCENARIO: u16 = 1002;
pub const CLOSE_RECEIVE: u16 = 1003;
pub const CLOSE_INTERNAL: u16 = 1011;

/// Failures while setting up or running a client connection.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Timed out during {stage}")]
    Timeout { stage: ConnectionStage },

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Connection failed during {stage}: {cause}")]
    Failed {
        stage: ConnectionStage,
        cause: TroupeError,
    },
}

impl ConnectionError {
    pub fn failed(stage: ConnectionStage, cause: TroupeError) -> Self {
        Self::Failed { stage, cause }
    }

    pub fn stage(&self) -> ConnectionStage {
        match self {
            Self::Timeout { stage } | Self::Failed { stage, .. } => *stage,
            Self::ScenarioNotFound(_) => ConnectionStage::GetScenario,
        }
    }

    /// The close code reported to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Timeout { .. } => CLOSE_TIMEOUT,
            Self::ScenarioNotFound(_) => CLOSE_SCENARIO_NOT_FOUND,
            Self::Failed { stage, .. } => match stage {
                ConnectionStage::InitializeScenario => CLOSE_INITIALIZE_SCENARIO,
                ConnectionStage::Receive => CLOSE_RECEIVE,
                _ => CLOSE_INTERNAL,
            },
        }
    }

    /// A generic reason safe to show the client. Details stay in the logs.
    pub fn client_reason(&self) -> &'static str {
        match self.close_code() {
            CLOSE_TIMEOUT => "The WebSocket connection timed out.",
            CLOSE_SCENARIO_NOT_FOUND => "The requested scenario was not found.",
            CLOSE_INITIALIZE_SCENARIO => "The requested scenario failed to initialize.",
            CLOSE_RECEIVE => "An error occurred while receiving a message.",
            _ => "An unknown error occurred.",
        }
    }
}
