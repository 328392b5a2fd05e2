//! Tracing setup for TROUPE binaries.
//!
//! [`init_tracing`] installs the global subscriber with per-concern levels
//! taken from `[logging]`. [`ScenarioLogLayer`] lets a collaborator receive
//! the log events of individual scenarios over a channel.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};
use troupe_core::config::LoggingSettings;
use troupe_core::error::{Result, TroupeError};

/// Environment variable that replaces the configured filter entirely.
pub const LOG_ENV: &str = "TROUPE_LOG";

/// Level for targets outside the `troupe::*` family.
const FALLBACK_LEVEL: &str = "warn";

/// Builds the `EnvFilter` directive string for the configured levels.
pub fn filter_directives(settings: &LoggingSettings) -> String {
    format!(
        "{FALLBACK_LEVEL},troupe::stage={},troupe::llm={},troupe::transport={},troupe::system={}",
        settings.stage, settings.llm, settings.transport, settings.system
    )
}

fn env_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    EnvFilter::try_new(filter_directives(settings))
        .map_err(|e| TroupeError::config(format!("invalid log level: {e}")))
}

/// Installs the global tracing subscriber.
///
/// # Arguments
///
/// * `settings` - Per-target levels; `TROUPE_LOG` overrides them when set
/// * `json` - Emit JSON lines instead of the human-readable format
///
/// # Errors
///
/// Returns `TroupeError::Config` for an unparsable level and
/// `TroupeError::Internal` if a global subscriber is already installed.
pub fn init_tracing(settings: &LoggingSettings, json: bool) -> Result<()> {
    install(settings, json, None)
}

/// Like [`init_tracing`], additionally forwarding scenario log events to the
/// returned receiver.
pub fn init_tracing_with_scenario_logs(
    settings: &LoggingSettings,
    json: bool,
) -> Result<mpsc::UnboundedReceiver<ScenarioLogEvent>> {
    let (tx, rx) = mpsc::unbounded_channel();
    install(settings, json, Some(ScenarioLogLayer::new(tx)))?;
    Ok(rx)
}

fn install(settings: &LoggingSettings, json: bool, scenario_logs: Option<ScenarioLogLayer>) -> Result<()> {
    let filter = env_filter(settings)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(scenario_logs)
        .try_init()
        .map_err(|e| TroupeError::internal(format!("Failed to init subscriber: {e}")))?;

    tracing::debug!(target: "troupe::system", json, "Tracing initialized");
    Ok(())
}

/// A log event that belongs to one scenario.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScenarioLogEvent {
    pub scenario_id: String,
    /// Event target, e.g. `troupe::stage`
    pub target: String,
    pub level: String,
    pub message: String,
    /// Remaining structured fields, `scenario_id` and `message` excluded
    pub fields: HashMap<String, Value>,
    pub timestamp: String,
}

/// Forwards every event carrying a `scenario_id` field to a channel.
///
/// Events without one are ignored. A closed receiver drops events silently.
pub struct ScenarioLogLayer {
    sender: mpsc::UnboundedSender<ScenarioLogEvent>,
}

impl ScenarioLogLayer {
    pub fn new(sender: mpsc::UnboundedSender<ScenarioLogEvent>) -> Self {
        Self { sender }
    }
}

impl<S> Layer<S> for ScenarioLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        let scenario_id = match fields.remove("scenario_id") {
            Some(Value::String(id)) => id,
            Some(other) => other.to_string(),
            None => return,
        };
        let message = match fields.remove("message") {
            Some(Value::String(text)) => text,
            _ => String::new(),
        };

        let _ = self.sender.send(ScenarioLogEvent {
            scenario_id,
            target: event.metadata().target().to_string(),
            level: event.metadata().level().to_string(),
            message,
            fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn test_filter_directives_follow_settings() {
        let settings = LoggingSettings {
            stage: "debug".to_string(),
            llm: "trace".to_string(),
            ..LoggingSettings::default()
        };
        assert_eq!(
            filter_directives(&settings),
            "warn,troupe::stage=debug,troupe::llm=trace,troupe::transport=info,troupe::system=info"
        );
        assert!(EnvFilter::try_new(filter_directives(&settings)).is_ok());
    }

    #[test]
    fn test_forwards_only_scenario_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = Registry::default().with(ScenarioLogLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "troupe::system", "Server started");
            tracing::warn!(
                target: "troupe::stage",
                scenario_id = %"scn-1",
                stage = 2u64,
                "Stage time limit reached"
            );
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.scenario_id, "scn-1");
        assert_eq!(event.target, "troupe::stage");
        assert_eq!(event.level, "WARN");
        assert_eq!(event.message, "Stage time limit reached");
        assert_eq!(event.fields.get("stage"), Some(&serde_json::json!(2)));
        assert!(!event.fields.contains_key("scenario_id"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let subscriber = Registry::default().with(ScenarioLogLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(scenario_id = "scn-2", "Nobody is listening");
        });
    }
}
