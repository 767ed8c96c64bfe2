//! Websocket gateway transport.
//!
//! Speaks a small JSON envelope protocol with the chat gateway:
//!
//! 1. Connect to the gateway URL and send `{ "op": "identify", "token": … }`.
//! 2. The gateway answers with a `ready` event, then streams `message` and
//!    `command` events.
//! 3. Delivery operations go out as op frames carrying a `seq` number; the
//!    gateway answers each with `{ "type": "ack", "seq": …, "ok": … }`.
//!    Negative acks carry the rejection reason (e.g. a recipient that
//!    disallows direct messages).
//! 4. On disconnect: reconnect with exponential backoff (2s → 4s → … max
//!    60s), re-identify, and fail all in-flight operations.
//!
//! A heartbeat task pings the gateway periodically and records the
//! round-trip time for the `latency_ms` operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{AuthorId, ChannelId, ChatGateway, GatewayError, GatewayEvent, MessageId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Ack>>>>;

const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF_SECS: u64 = 60;
/// Sentinel for "no heartbeat measured yet".
const LATENCY_UNKNOWN: u64 = u64::MAX;

/// Outbound op frames.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum OpFrame<'a> {
    Identify {
        token: &'a str,
    },
    DeleteMessage {
        seq: u64,
        channel: &'a str,
        message: &'a str,
    },
    SendMessage {
        seq: u64,
        channel: &'a str,
        content: &'a str,
    },
    SendDirect {
        seq: u64,
        author: &'a str,
        content: &'a str,
    },
    RegisterCommand {
        seq: u64,
        name: &'a str,
        description: &'a str,
    },
    Ping {
        seq: u64,
    },
}

/// Acknowledgment for one op frame.
#[derive(Debug, Clone, Deserialize)]
struct Ack {
    seq: u64,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Inbound frames: gateway events plus op acknowledgments.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    Ready { identity: String },
    Message(super::MessageEvent),
    Command { name: String, channel: ChannelId },
    Ack(Ack),
}

/// Websocket-backed [`ChatGateway`].
///
/// Cheap to clone; all clones share the transport.
#[derive(Clone)]
pub struct WsGateway {
    out_tx: mpsc::Sender<String>,
    pending: Pending,
    seq: Arc<AtomicU64>,
    latency_ms: Arc<AtomicU64>,
}

impl WsGateway {
    /// Connect and identify, returning the gateway handle and the inbound
    /// event stream. The transport task reconnects for the life of the
    /// process; only the initial connection failure is surfaced here.
    pub async fn connect(url: &str, token: &str) -> Result<(Self, mpsc::Receiver<GatewayEvent>)> {
        let stream = open_and_identify(url, token).await?;
        info!(url, "Gateway connected");

        let (out_tx, out_rx) = mpsc::channel::<String>(128);
        let (events_tx, events_rx) = mpsc::channel::<GatewayEvent>(128);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let gateway = Self {
            out_tx,
            pending: pending.clone(),
            seq: Arc::new(AtomicU64::new(1)),
            latency_ms: Arc::new(AtomicU64::new(LATENCY_UNKNOWN)),
        };

        tokio::spawn(transport_loop(
            url.to_string(),
            token.to_string(),
            stream,
            out_rx,
            events_tx,
            pending,
        ));
        tokio::spawn(heartbeat_loop(gateway.clone()));

        Ok((gateway, events_rx))
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one op frame and await its acknowledgment.
    async fn request(&self, seq: u64, frame: String) -> Result<(), GatewayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.insert_pending(seq, ack_tx)?;

        if self.out_tx.send(frame).await.is_err() {
            self.remove_pending(seq);
            return Err(GatewayError::TransportClosed);
        }

        match tokio::time::timeout(ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(ack)) if ack.ok => Ok(()),
            Ok(Ok(ack)) => Err(GatewayError::Rejected(
                ack.error.unwrap_or_else(|| "unspecified".into()),
            )),
            // Sender dropped: the transport failed this request on disconnect.
            Ok(Err(_)) => Err(GatewayError::TransportClosed),
            Err(_) => {
                self.remove_pending(seq);
                Err(GatewayError::Protocol(format!(
                    "no ack for seq {seq} within {}s",
                    ACK_TIMEOUT.as_secs()
                )))
            }
        }
    }

    fn insert_pending(&self, seq: u64, tx: oneshot::Sender<Ack>) -> Result<(), GatewayError> {
        match self.pending.lock() {
            Ok(mut map) => {
                map.insert(seq, tx);
                Ok(())
            }
            Err(_) => Err(GatewayError::Protocol("pending map lock poisoned".into())),
        }
    }

    fn remove_pending(&self, seq: u64) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&seq);
        }
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        let seq = self.next_seq();
        let frame = serde_json::to_string(&OpFrame::Ping { seq })?;
        self.request(seq, frame).await
    }
}

#[async_trait]
impl ChatGateway for WsGateway {
    async fn delete_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<(), GatewayError> {
        let seq = self.next_seq();
        let frame = serde_json::to_string(&OpFrame::DeleteMessage {
            seq,
            channel: &channel.0,
            message: &message.0,
        })?;
        self.request(seq, frame).await
    }

    async fn send_message(&self, channel: &ChannelId, text: &str) -> Result<(), GatewayError> {
        let seq = self.next_seq();
        let frame = serde_json::to_string(&OpFrame::SendMessage {
            seq,
            channel: &channel.0,
            content: text,
        })?;
        self.request(seq, frame).await
    }

    async fn send_direct(&self, author: &AuthorId, text: &str) -> Result<(), GatewayError> {
        let seq = self.next_seq();
        let frame = serde_json::to_string(&OpFrame::SendDirect {
            seq,
            author: &author.0,
            content: text,
        })?;
        self.request(seq, frame).await
    }

    async fn register_command(&self, name: &str, description: &str) -> Result<(), GatewayError> {
        let seq = self.next_seq();
        let frame = serde_json::to_string(&OpFrame::RegisterCommand {
            seq,
            name,
            description,
        })?;
        self.request(seq, frame).await
    }

    async fn latency_ms(&self) -> Option<u64> {
        match self.latency_ms.load(Ordering::Relaxed) {
            LATENCY_UNKNOWN => None,
            ms => Some(ms),
        }
    }
}

async fn open_and_identify(url: &str, token: &str) -> Result<WsStream> {
    let (mut ws, _) = connect_async(url)
        .await
        .context("Failed to connect to chat gateway")?;
    let identify = serde_json::to_string(&OpFrame::Identify { token })?;
    ws.send(Message::Text(identify))
        .await
        .context("Failed to send identify frame")?;
    Ok(ws)
}

/// Owns the websocket for the life of the process: pumps frames in both
/// directions, and reconnects with backoff when the connection drops.
async fn transport_loop(
    url: String,
    token: String,
    first: WsStream,
    mut out_rx: mpsc::Receiver<String>,
    events_tx: mpsc::Sender<GatewayEvent>,
    pending: Pending,
) {
    let mut stream = Some(first);
    let mut backoff_secs: u64 = 2;

    loop {
        let ws = match stream.take() {
            Some(ws) => ws,
            None => match open_and_identify(&url, &token).await {
                Ok(ws) => {
                    info!(url = %url, "Gateway reconnected");
                    ws
                }
                Err(e) => {
                    warn!(error = %e, "Gateway reconnect failed");
                    sleep_backoff(&mut backoff_secs).await;
                    continue;
                }
            },
        };
        backoff_secs = 2;

        let (mut sink, mut reader) = ws.split();
        loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(&text, &events_tx, &pending).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Gateway read error");
                        break;
                    }
                    None => {
                        warn!("Gateway stream closed");
                        break;
                    }
                },
                outbound = out_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(error = %e, "Gateway write error");
                            break;
                        }
                    }
                    // All gateway handles dropped.
                    None => return,
                },
            }
        }

        fail_pending(&pending);
        sleep_backoff(&mut backoff_secs).await;
    }
}

async fn dispatch_frame(text: &str, events_tx: &mpsc::Sender<GatewayEvent>, pending: &Pending) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Unparseable gateway frame");
            return;
        }
    };

    match frame {
        InboundFrame::Ack(ack) => {
            let waiter = pending.lock().ok().and_then(|mut map| map.remove(&ack.seq));
            match waiter {
                Some(tx) => {
                    let _ = tx.send(ack);
                }
                None => debug!(seq = ack.seq, "Ack with no waiter"),
            }
        }
        InboundFrame::Ready { identity } => {
            forward(events_tx, GatewayEvent::Ready { identity }).await;
        }
        InboundFrame::Message(msg) => {
            forward(events_tx, GatewayEvent::Message(msg)).await;
        }
        InboundFrame::Command { name, channel } => {
            forward(events_tx, GatewayEvent::Command { name, channel }).await;
        }
    }
}

async fn forward(events_tx: &mpsc::Sender<GatewayEvent>, event: GatewayEvent) {
    if events_tx.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}

/// Dropping the senders wakes every in-flight request with a closed-channel
/// error, which surfaces as `TransportClosed`.
fn fail_pending(pending: &Pending) {
    if let Ok(mut map) = pending.lock() {
        map.clear();
    }
}

async fn sleep_backoff(backoff_secs: &mut u64) {
    tokio::time::sleep(Duration::from_secs(*backoff_secs)).await;
    *backoff_secs = (*backoff_secs * 2).min(MAX_BACKOFF_SECS);
}

async fn heartbeat_loop(gateway: WsGateway) {
    loop {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        let started = Instant::now();
        match gateway.ping().await {
            Ok(()) => {
                let elapsed = started.elapsed().as_millis() as u64;
                gateway.latency_ms.store(elapsed, Ordering::Relaxed);
                debug!(latency_ms = elapsed, "Gateway heartbeat");
            }
            Err(e) => {
                gateway.latency_ms.store(LATENCY_UNKNOWN, Ordering::Relaxed);
                debug!(error = %e, "Gateway heartbeat failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_op_frame_wire_format() {
        let frame = OpFrame::SendMessage {
            seq: 7,
            channel: "c-1",
            content: "hello",
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"op": "send_message", "seq": 7, "channel": "c-1", "content": "hello"})
        );

        let frame = OpFrame::DeleteMessage {
            seq: 8,
            channel: "c-1",
            message: "m-9",
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"op": "delete_message", "seq": 8, "channel": "c-1", "message": "m-9"})
        );
    }

    #[test]
    fn test_ack_parses_with_and_without_error() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type": "ack", "seq": 3, "ok": true}"#).unwrap();
        match frame {
            InboundFrame::Ack(ack) => {
                assert_eq!(ack.seq, 3);
                assert!(ack.ok);
                assert!(ack.error.is_none());
            }
            other => panic!("expected ack, got {other:?}"),
        }

        let frame: InboundFrame = serde_json::from_str(
            r#"{"type": "ack", "seq": 4, "ok": false, "error": "recipient blocks direct messages"}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Ack(ack) => {
                assert!(!ack.ok);
                assert_eq!(
                    ack.error.as_deref(),
                    Some("recipient blocks direct messages")
                );
            }
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[test]
    fn test_inbound_message_frame_parses() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{
                "type": "message",
                "id": "m-1",
                "channel": "c-1",
                "channel_kind": "direct",
                "author": "u-1",
                "author_name": "alice",
                "author_is_bot": false,
                "content": "exit"
            }"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Message(msg) => {
                assert_eq!(msg.channel_kind, super::super::ChannelKind::Direct);
                assert_eq!(msg.content, "exit");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_frame_has_no_seq() {
        let frame = OpFrame::Identify { token: "secret" };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"op": "identify", "token": "secret"})
        );
    }
}
