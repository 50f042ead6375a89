use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::messages::{self, UserJoinMessage, VoiceMessage};
use crate::audio::AudioSegment;
use crate::error::{SessionError, SessionResult};
use crate::events::EventBus;
use crate::session::Participant;

/// Lifecycle pseudo-types published through `on`
pub const OPEN: &str = "open";
pub const CLOSE: &str = "close";
pub const ERROR: &str = "error";

/// How long the connect handshake may take before giving up
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Peer audio received through the relay
#[derive(Debug, Clone, PartialEq)]
pub struct InboundVoice {
    pub user_id: String,
    pub segment: AudioSegment,
}

type Listeners = Arc<Mutex<HashMap<String, EventBus<Value>>>>;

/// Persistent connection to the audio relay.
///
/// Inbound JSON frames are published by their `type` field; peer voice
/// frames are also decoded onto `voice_stream`, minus our own echoes.
pub struct WebSocketService {
    url: String,
    participant: Participant,
    connect_timeout: Duration,
    connected: Arc<AtomicBool>,
    listeners: Listeners,
    voice: EventBus<InboundVoice>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connecting: tokio::sync::Mutex<()>,
}

impl WebSocketService {
    pub fn new(url: impl Into<String>, participant: Participant) -> Self {
        Self {
            url: url.into(),
            participant,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connected: Arc::new(AtomicBool::new(false)),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            voice: EventBus::new(),
            outbound: Mutex::new(None),
            reader: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user_id(&self) -> &str {
        &self.participant.user_id
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to inbound frames of one `type`, or to `open`/`close`/`error`
    pub fn on(&self, message_type: &str) -> broadcast::Receiver<Value> {
        subscribe(&self.listeners, message_type)
    }

    /// Decoded peer voice frames, our own echoes excluded
    pub fn voice_stream(&self) -> broadcast::Receiver<InboundVoice> {
        self.voice.subscribe()
    }

    /// Open the connection and announce ourselves. Returns immediately when
    /// already connected.
    pub async fn connect(&self) -> SessionResult<()> {
        let _guard = self.connecting.lock().await;
        if self.is_connected() {
            debug!("Relay already connected");
            return Ok(());
        }

        info!("Connecting to relay at {}", self.url);

        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await;
        let (stream, _) = match handshake {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                publish(&self.listeners, ERROR, Value::String(e.to_string()));
                return Err(SessionError::Network(format!("failed to connect to {}: {}", self.url, e)));
            }
            Err(_) => {
                let reason = format!("connect to {} timed out after {:?}", self.url, self.connect_timeout);
                publish(&self.listeners, ERROR, Value::String(reason.clone()));
                return Err(SessionError::Network(reason));
            }
        };
        let (mut write, mut read) = stream.split();

        let join = UserJoinMessage::new(&self.participant.user_id, &self.participant.display_name);
        let join = serde_json::to_string(&join).map_err(|e| SessionError::Network(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        // Presence goes out ahead of anything else queued on this connection
        let _ = out_tx.send(Message::Text(join));

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    warn!("Relay write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        self.connected.store(true, Ordering::SeqCst);
        publish(&self.listeners, OPEN, Value::Null);
        info!("Relay connected as {}", self.participant.user_id);

        let connected = Arc::clone(&self.connected);
        let listeners = Arc::clone(&self.listeners);
        let voice = self.voice.clone();
        let user_id = self.participant.user_id.clone();

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(&text, &user_id, &listeners, &voice),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {} // Ping, Pong, Binary - ignore
                    Err(e) => {
                        warn!("Relay read failed: {}", e);
                        publish(&listeners, ERROR, Value::String(e.to_string()));
                        break;
                    }
                }
            }

            if connected.swap(false, Ordering::SeqCst) {
                info!("Relay connection closed");
                publish(&listeners, CLOSE, Value::Null);
            }
        });

        if let Ok(mut slot) = self.outbound.lock() {
            *slot = Some(out_tx);
        }
        if let Ok(mut slot) = self.reader.lock() {
            *slot = Some(reader);
        }

        Ok(())
    }

    /// Relay a recording to the peer. Dropped with a warning when not
    /// connected; returns whether the frame was queued.
    pub fn send_audio(&self, segment: &AudioSegment) -> bool {
        if !self.is_connected() {
            warn!("Relay not connected, dropping {} bytes of audio", segment.len());
            return false;
        }

        let message = VoiceMessage::new(&self.participant.user_id, segment);
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode voice frame: {}", e);
                return false;
            }
        };

        let queued = self
            .outbound
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|tx| tx.send(Message::Text(text)).is_ok()))
            .unwrap_or(false);

        if queued {
            debug!("Voice frame queued ({} bytes, {})", segment.len(), segment.mime_type());
        } else {
            warn!("Relay writer gone, audio dropped");
        }
        queued
    }

    /// Close the connection. Safe to call when not connected.
    pub fn disconnect(&self) {
        // Dropping the sender lets the writer flush and close the socket
        if let Ok(mut slot) = self.outbound.lock() {
            slot.take();
        }
        if let Ok(mut slot) = self.reader.lock() {
            if let Some(reader) = slot.take() {
                reader.abort();
            }
        }

        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Disconnected from relay");
            publish(&self.listeners, CLOSE, Value::Null);
        }
    }
}

impl Drop for WebSocketService {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn subscribe(listeners: &Listeners, message_type: &str) -> broadcast::Receiver<Value> {
    match listeners.lock() {
        Ok(mut map) => map.entry(message_type.to_string()).or_default().subscribe(),
        // A poisoned map never publishes again; hand out a closed receiver
        Err(_) => broadcast::channel(1).1,
    }
}

fn publish(listeners: &Listeners, message_type: &str, value: Value) {
    let bus = listeners
        .lock()
        .ok()
        .and_then(|map| map.get(message_type).cloned());
    if let Some(bus) = bus {
        bus.emit(value);
    }
}

fn dispatch(text: &str, own_id: &str, listeners: &Listeners, voice: &EventBus<InboundVoice>) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring malformed relay frame: {}", e);
            return;
        }
    };

    let Some(message_type) = messages::message_type(&value).map(str::to_string) else {
        debug!("Ignoring relay frame without type");
        return;
    };

    if message_type == messages::VOICE {
        match serde_json::from_value::<VoiceMessage>(value.clone()) {
            Ok(msg) if msg.user_id == own_id => debug!("Skipping own voice echo"),
            Ok(msg) => match msg.to_segment() {
                Ok(segment) => {
                    debug!("Voice from {} ({} bytes)", msg.user_id, segment.len());
                    voice.emit(InboundVoice {
                        user_id: msg.user_id,
                        segment,
                    });
                }
                Err(e) => warn!("Dropping undecodable voice frame from {}: {}", msg.user_id, e),
            },
            Err(e) => warn!("Malformed voice frame: {}", e),
        }
    }

    publish(listeners, &message_type, value);
}
