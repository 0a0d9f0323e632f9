//! WebSocket relay client: one task per configured relay, shared
//! subscription registry, exponential backoff on reconnect. Inbound events
//! funnel into a single channel; the daemon's replay log deduplicates
//! anything re-delivered after a reconnect.

use crate::relay::envelope::RelayEvent;
use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{event, Level};

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

#[async_trait]
pub trait RelayPublisher: Send + Sync {
    async fn publish(&self, event: RelayEvent) -> Result<()>;
}

#[derive(Clone, Debug)]
enum RelayCommand {
    Publish(RelayEvent),
    Subscribe { sub_id: String, filter: Value },
}

pub struct RelayClient {
    command_tx: broadcast::Sender<RelayCommand>,
    subscriptions: Arc<Mutex<BTreeMap<String, Value>>>,
}

pub struct RelayInbound {
    pub rx: mpsc::Receiver<RelayEvent>,
    /// Keeps the channel open when no relays are configured (local
    /// drop-in-only deployments).
    _keepalive: mpsc::Sender<RelayEvent>,
}

impl RelayClient {
    /// Spawns one connection task per relay url. Returns the client handle
    /// and the merged inbound stream.
    pub fn spawn(urls: Vec<String>) -> (Arc<Self>, RelayInbound) {
        let (command_tx, _) = broadcast::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let subscriptions = Arc::new(Mutex::new(BTreeMap::new()));

        let client = Arc::new(Self {
            command_tx: command_tx.clone(),
            subscriptions: subscriptions.clone(),
        });

        for url in urls {
            tokio::spawn(relay_task(
                url,
                command_tx.subscribe(),
                inbound_tx.clone(),
                subscriptions.clone(),
            ));
        }

        (
            client,
            RelayInbound {
                rx: inbound_rx,
                _keepalive: inbound_tx,
            },
        )
    }

    /// Registers a subscription; live connections pick it up immediately,
    /// reconnecting ones replay it from the registry.
    pub async fn subscribe(&self, sub_id: String, filter: Value) {
        self.subscriptions.lock().await.insert(sub_id.clone(), filter.clone());
        let _ = self.command_tx.send(RelayCommand::Subscribe { sub_id, filter });
    }
}

#[async_trait]
impl RelayPublisher for RelayClient {
    async fn publish(&self, event: RelayEvent) -> Result<()> {
        // relays deduplicate by event id, so fan-out to every connection
        // is idempotent
        let _ = self.command_tx.send(RelayCommand::Publish(event));
        Ok(())
    }
}

async fn relay_task(
    url: String,
    mut commands: broadcast::Receiver<RelayCommand>,
    inbound: mpsc::Sender<RelayEvent>,
    subscriptions: Arc<Mutex<BTreeMap<String, Value>>>,
) {
    let mut backoff = BACKOFF_START;
    loop {
        let (mut socket, _) = match connect_async(url.as_str()).await {
            Ok(connection) => connection,
            Err(error) => {
                event!(Level::WARN, %url, "relay connect failed: {error}; retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_CAP);
                continue;
            }
        };
        event!(Level::INFO, %url, "relay connected");
        backoff = BACKOFF_START;

        // replay the subscription registry on every (re)connect
        for (sub_id, filter) in subscriptions.lock().await.iter() {
            let frame = serde_json::to_string(&json!(["REQ", sub_id, filter])).unwrap_or_default();
            if socket.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let frame = match command {
                        Ok(RelayCommand::Publish(relay_event)) => {
                            serde_json::to_string(&json!(["EVENT", relay_event])).ok()
                        }
                        Ok(RelayCommand::Subscribe { sub_id, filter }) => {
                            serde_json::to_string(&json!(["REQ", sub_id, filter])).ok()
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            event!(Level::WARN, %url, "relay command stream lagged, {skipped} dropped");
                            None
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    };
                    if let Some(frame) = frame {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                }
                frame = socket.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(relay_event) = parse_relay_frame(&text) {
                                if inbound.send(relay_event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = socket.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        event!(Level::WARN, %url, "relay disconnected; reconnecting");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

/// Decodes an inbound relay frame; only `["EVENT", sub, {event}]` carries
/// payload, everything else (`OK`, `EOSE`, `NOTICE`) is logged or ignored.
fn parse_relay_frame(text: &str) -> Option<RelayEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let frame = value.as_array()?;
    match frame.first()?.as_str()? {
        "EVENT" => {
            let raw = frame.get(2)?;
            serde_json::from_value(raw.clone()).ok()
        }
        "OK" => {
            event!(Level::DEBUG, "relay ack: {text}");
            None
        }
        "NOTICE" => {
            event!(Level::INFO, "relay notice: {text}");
            None
        }
        _ => None,
    }
}

/// Filter for the events a daemon cares about in one game: slot claims and
/// turn commands tagged with the game id.
pub fn game_filter(game_id: &str) -> Value {
    json!({
        "kinds": [super::envelope::KIND_SLOT_CLAIM, super::envelope::KIND_TURN_COMMAND],
        "#g": [game_id],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_frames_parse_and_noise_is_ignored() {
        let text = r#"["EVENT","sub-1",{"id":"aa","pubkey":"bb","created_at":1,"kind":30402,"tags":[["g","g1"]],"content":"x","sig":"cc"}]"#;
        let parsed = parse_relay_frame(text).unwrap();
        assert_eq!(parsed.kind, 30402);
        assert_eq!(parsed.tag("g"), Some("g1"));

        assert!(parse_relay_frame(r#"["EOSE","sub-1"]"#).is_none());
        assert!(parse_relay_frame(r#"["OK","aa",true,""]"#).is_none());
        assert!(parse_relay_frame("not json").is_none());
    }
}
