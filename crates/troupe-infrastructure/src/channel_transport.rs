//! In-process ScenarioTransport backed by tokio channels.
//!
//! The engine side holds a [`ChannelTransport`]; the client side holds the
//! paired [`ChannelClient`]. Used by the CLI demo and by engine tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use troupe_core::error::{Result, TroupeError};
use troupe_core::message::Message;
use troupe_core::transport::{ClientEvent, InboundEvent, InboundHandler, ScenarioTransport};

/// What the client side can do to the connection.
#[derive(Debug, Clone)]
enum ClientSignal {
    Connect,
    Ready,
    Event(InboundEvent),
    Disconnect,
}

/// How the engine closed the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseStatus {
    Closed { code: u16, reason: String },
    Forced,
}

type SharedClose = Arc<StdMutex<Option<CloseStatus>>>;

/// Engine side of an in-process connection.
pub struct ChannelTransport {
    signals: Mutex<mpsc::UnboundedReceiver<ClientSignal>>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    handlers: StdRwLock<Vec<InboundHandler>>,
    shutdown: CancellationToken,
    close_status: SharedClose,
}

/// Client side of an in-process connection.
pub struct ChannelClient {
    signals: mpsc::UnboundedSender<ClientSignal>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    close_status: SharedClose,
}

/// Creates a connected transport/client pair.
pub fn channel_transport() -> (ChannelTransport, ChannelClient) {
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let close_status: SharedClose = Arc::new(StdMutex::new(None));

    let transport = ChannelTransport {
        signals: Mutex::new(signal_rx),
        outbound: event_tx,
        handlers: StdRwLock::new(Vec::new()),
        shutdown: CancellationToken::new(),
        close_status: close_status.clone(),
    };
    let client = ChannelClient {
        signals: signal_tx,
        events: event_rx,
        close_status,
    };
    (transport, client)
}

impl ChannelTransport {
    async fn next_signal(&self) -> Option<ClientSignal> {
        let mut signals = self.signals.lock().await;
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            signal = signals.recv() => signal,
        }
    }

    /// Waits for the expected handshake signal, rejecting anything else.
    async fn expect(&self, expected: &str, matches: fn(&ClientSignal) -> bool) -> Result<()> {
        match self.next_signal().await {
            Some(signal) if matches(&signal) => Ok(()),
            Some(other) => Err(TroupeError::internal(format!(
                "expected {expected}, received {other:?}"
            ))),
            None => Err(TroupeError::io("client disconnected")),
        }
    }

    fn dispatch(&self, event: InboundEvent) {
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for handler in handlers {
            handler(event.clone());
        }
    }

    fn set_close_status(&self, status: CloseStatus) {
        if let Ok(mut slot) = self.close_status.lock() {
            slot.get_or_insert(status);
        }
        self.shutdown.cancel();
    }
}

#[async_trait]
impl ScenarioTransport for ChannelTransport {
    async fn accept(&self) -> Result<()> {
        self.expect("connect", |s| matches!(s, ClientSignal::Connect))
            .await
    }

    async fn wait_for_ready(&self) -> Result<()> {
        self.expect("ready", |s| matches!(s, ClientSignal::Ready))
            .await
    }

    async fn send(&self, event: ClientEvent) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(TroupeError::io("connection closed"));
        }
        self.outbound
            .send(event)
            .map_err(|_| TroupeError::io("client dropped the connection"))
    }

    fn subscribe(&self, handler: InboundHandler) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }

    async fn listen(&self) -> Result<()> {
        loop {
            match self.next_signal().await {
                Some(ClientSignal::Event(event)) => self.dispatch(event),
                Some(ClientSignal::Disconnect) | None => {
                    tracing::debug!(target: "troupe::transport", "Channel transport stopped listening");
                    return Ok(());
                }
                Some(other) => {
                    tracing::warn!(target: "troupe::transport", signal = ?other, "Ignoring handshake signal while listening");
                }
            }
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        self.set_close_status(CloseStatus::Closed {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn force_close(&self) {
        self.set_close_status(CloseStatus::Forced);
    }
}

impl ChannelClient {
    fn signal(&self, signal: ClientSignal) -> Result<()> {
        self.signals
            .send(signal)
            .map_err(|_| TroupeError::io("transport dropped"))
    }

    pub fn connect(&self) -> Result<()> {
        self.signal(ClientSignal::Connect)
    }

    pub fn ready(&self) -> Result<()> {
        self.signal(ClientSignal::Ready)
    }

    pub fn send(&self, event: InboundEvent) -> Result<()> {
        self.signal(ClientSignal::Event(event))
    }

    pub fn send_message(&self, message: Message) -> Result<()> {
        self.send(InboundEvent::UserMessage(message))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.signal(ClientSignal::Disconnect)
    }

    /// Next event from the engine, or `None` once the transport is dropped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Drains every event already sent.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn close_status(&self) -> Option<CloseStatus> {
        self.close_status.lock().ok().and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troupe_core::message::MessageRole;

    #[tokio::test]
    async fn test_handshake_order_is_enforced() {
        let (transport, client) = channel_transport();
        client.ready().unwrap();
        assert!(transport.accept().await.is_err());
    }

    #[tokio::test]
    async fn test_listen_dispatches_until_disconnect() {
        let (transport, client) = channel_transport();
        let seen = Arc::new(StdMutex::new(Vec::<InboundEvent>::new()));
        let sink = seen.clone();
        transport.subscribe(Arc::new(move |event: InboundEvent| {
            sink.lock().unwrap().push(event)
        }));

        client.connect().unwrap();
        client.ready().unwrap();
        client
            .send_message(Message::new(MessageRole::User, "hi", "u", "Sam", "scn"))
            .unwrap();
        client.send(InboundEvent::AdvanceStage).unwrap();
        client.disconnect().unwrap();

        transport.accept().await.unwrap();
        transport.wait_for_ready().await.unwrap();
        transport.listen().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], InboundEvent::AdvanceStage);
    }

    #[tokio::test]
    async fn test_close_stops_sending() {
        let (transport, mut client) = channel_transport();
        transport.send(ClientEvent::Ready).await.unwrap();
        transport.close(1011, "An unknown error occurred.").await.unwrap();

        assert!(transport.send(ClientEvent::Ready).await.is_err());
        assert_eq!(client.drain(), vec![ClientEvent::Ready]);
        assert_eq!(
            client.close_status(),
            Some(CloseStatus::Closed {
                code: 1011,
                reason: "An unknown error occurred.".to_string()
            })
        );
        transport.listen().await.unwrap();
    }
}
