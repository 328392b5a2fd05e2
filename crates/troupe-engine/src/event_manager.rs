//! Typed publish/subscribe for scenario lifecycle events.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use strum::Display;
use troupe_core::error::Result;
use troupe_core::stage::ScenarioStage;

/// Something that happened inside a scenario.
#[derive(Debug, Clone)]
pub enum ScenarioEvent {
    /// A new stage became active. Carries a snapshot of that stage.
    StageChanged { stage: ScenarioStage },
    /// The final stage finished.
    ScenarioCompleted,
}

impl ScenarioEvent {
    pub fn kind(&self) -> ScenarioEventKind {
        match self {
            Self::StageChanged { .. } => ScenarioEventKind::StageChanged,
            Self::ScenarioCompleted => ScenarioEventKind::ScenarioCompleted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScenarioEventKind {
    StageChanged,
    ScenarioCompleted,
}

/// An async event callback.
pub type EventListener = Arc<dyn Fn(ScenarioEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle returned by [`EventManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventManager {
    listeners: RwLock<HashMap<ScenarioEventKind, Vec<(ListenerId, EventListener)>>>,
    next_id: AtomicU64,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: ScenarioEventKind, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, kind: ScenarioEventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Invokes every listener for the event's kind, in subscription order.
    ///
    /// A failing listener is logged and does not stop the others.
    pub async fn emit(&self, event: ScenarioEvent) {
        let kind = event.kind();
        let listeners: Vec<EventListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in listeners {
            if let Err(e) = listener(event.clone()).await {
                tracing::warn!(target: "troupe::system", event = %kind, error = %e, "Event listener failed");
            }
        }
    }

    pub fn listener_count(&self, kind: ScenarioEventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Drops every listener.
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Mutex;
    use troupe_core::error::TroupeError;

    fn recorder(log: Arc<Mutex<Vec<String>>>, label: &'static str) -> EventListener {
        Arc::new(move |event: ScenarioEvent| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{label}:{}", event.kind()));
                Ok::<(), TroupeError>(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_emit_reaches_listeners_in_order_despite_failures() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        events.subscribe(ScenarioEventKind::ScenarioCompleted, recorder(log.clone(), "a"));
        events.subscribe(
            ScenarioEventKind::ScenarioCompleted,
            Arc::new(|_: ScenarioEvent| {
                async { Err::<(), TroupeError>(TroupeError::internal("listener bug")) }.boxed()
            }),
        );
        events.subscribe(ScenarioEventKind::ScenarioCompleted, recorder(log.clone(), "b"));
        events.subscribe(ScenarioEventKind::StageChanged, recorder(log.clone(), "c"));

        events.emit(ScenarioEvent::ScenarioCompleted).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:scenario_completed", "b:scenario_completed"]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_and_clear() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = events.subscribe(ScenarioEventKind::ScenarioCompleted, recorder(log.clone(), "a"));

        assert!(events.unsubscribe(ScenarioEventKind::ScenarioCompleted, id));
        assert!(!events.unsubscribe(ScenarioEventKind::ScenarioCompleted, id));
        events.emit(ScenarioEvent::ScenarioCompleted).await;
        assert!(log.lock().unwrap().is_empty());

        events.subscribe(ScenarioEventKind::StageChanged, recorder(log, "b"));
        events.clear();
        assert_eq!(events.listener_count(ScenarioEventKind::StageChanged), 0);
    }
}
