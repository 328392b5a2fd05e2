//! Engine configuration loaded from TOML.

use crate::error::{Result, TroupeError};
use crate::message::MessageRole;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// How non-mentor agent replies are delivered to the client.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    /// Chunked delivery with typing/stream events.
    #[default]
    Stream,
    /// One complete message per reply.
    Async,
}

/// One replayed message of a debug transcript.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DebugTranscriptEntry {
    pub role: MessageRole,
    pub content: String,
}

/// Per-scenario behavior. Overridable per request.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScenarioSettings {
    pub message_mode: MessageMode,
    /// Seconds between update frames.
    pub frame_rate_secs: f64,
    pub validate_user_messages: bool,
    pub summarize_actor_personalities: bool,
    /// Each agent only sees its own sub-conversation with the user.
    pub separate_agent_conversations: bool,
    pub analysis_temperature: f32,
    pub debug_transcript: Vec<DebugTranscriptEntry>,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            message_mode: MessageMode::Stream,
            frame_rate_secs: 1.0,
            validate_user_messages: true,
            summarize_actor_personalities: false,
            separate_agent_conversations: false,
            analysis_temperature: 0.0,
            debug_transcript: Vec::new(),
        }
    }
}

impl ScenarioSettings {
    /// Returns a copy with `overrides` merged on top.
    ///
    /// Only keys present in `overrides` change. Nested objects merge recursively.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::Config` if the merged value is not valid settings.
    pub fn merged(&self, overrides: Option<&Value>) -> Result<Self> {
        let Some(overrides) = overrides else {
            return Ok(self.clone());
        };

        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, overrides);
        serde_json::from_value(base)
            .map_err(|e| TroupeError::config(format!("invalid scenario settings override: {e}")))
    }
}

fn merge_json(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

fn default_accept_timeout() -> u64 {
    10
}

fn default_ready_timeout() -> u64 {
    30
}

/// Connection handshake time boxes.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_secs: u64,
    #[serde(default = "default_ready_timeout")]
    pub ready_event_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            accept_timeout_secs: default_accept_timeout(),
            ready_event_timeout_secs: default_ready_timeout(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Log levels per concern.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub stage: String,
    #[serde(default = "default_level")]
    pub llm: String,
    #[serde(default = "default_level")]
    pub transport: String,
    #[serde(default = "default_level")]
    pub system: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            stage: default_level(),
            llm: default_level(),
            transport: default_level(),
            system: default_level(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSettings {
    /// Template catalog file. Defaults to `<config dir>/troupe/templates.toml`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl TemplateSettings {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join("troupe").join("templates.toml")))
    }
}

/// Root configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct TroupeConfig {
    #[serde(default)]
    pub scenario: ScenarioSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub templates: TemplateSettings,
}

impl TroupeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TroupeError::config(e.to_string()))
    }

    /// Loads a config file.
    ///
    /// # Errors
    ///
    /// Returns `TroupeError::Io` if the file cannot be read and
    /// `TroupeError::Config` if it is not valid configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
