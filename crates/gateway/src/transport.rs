//! Live Discord gateway connection over a websocket.
//!
//! A session is HELLO, then IDENTIFY, then a stream of dispatches. A background
//! task sends heartbeats at the interval HELLO announced and closes the socket
//! when a beat goes unacknowledged, which surfaces as a receive error so the
//! runner opens a fresh session. Only reaction add/remove dispatches become
//! envelopes; everything else only advances the sequence number.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::events::{GatewayEnvelope, GatewayEvent, REACTION_ADD_DISPATCH, REACTION_REMOVE_DISPATCH};
use crate::socket::{GatewayTransport, TransportError};

/// `GUILD_MESSAGE_REACTIONS`; reaction dispatches are all the starboard consumes.
pub const GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close codes after which reconnecting with the same settings cannot succeed.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

const HELLO_TIMEOUT: Duration = Duration::from_secs(15);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWriter = Arc<Mutex<SplitSink<Socket, Message>>>;

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub url: String,
    pub bot_token: SecretString,
    pub intents: u64,
}

struct GatewaySession {
    reader: SplitStream<Socket>,
    writer: SocketWriter,
    // 0 until the first dispatch; Discord sequence numbers start at 1.
    sequence: Arc<AtomicU64>,
    heartbeat_acked: Arc<AtomicBool>,
    heartbeat: JoinHandle<()>,
}

pub struct DiscordGatewayTransport {
    settings: GatewaySettings,
    session: Mutex<Option<GatewaySession>>,
}

impl DiscordGatewayTransport {
    pub fn new(settings: GatewaySettings) -> Self {
        Self { settings, session: Mutex::new(None) }
    }

    async fn close_session(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session.heartbeat.abort();
        let mut writer = session.writer.lock().await;
        writer.send(Message::Close(None)).await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[async_trait]
impl GatewayTransport for DiscordGatewayTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if let Err(error) = self.close_session().await {
            debug!(error = %error, "previous gateway session did not close cleanly");
        }

        let (socket, _response) = connect_async(self.settings.url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (writer, mut reader) = socket.split();

        let heartbeat_interval = tokio::time::timeout(HELLO_TIMEOUT, read_hello(&mut reader))
            .await
            .map_err(|_| TransportError::Connect(format!("no HELLO within {HELLO_TIMEOUT:?}")))??;

        let writer = Arc::new(Mutex::new(writer));
        let identify = identify_payload(self.settings.bot_token.expose_secret(), self.settings.intents);
        send_payload(&writer, &identify).await.map_err(TransportError::Connect)?;

        let sequence = Arc::new(AtomicU64::new(0));
        let heartbeat_acked = Arc::new(AtomicBool::new(true));
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&writer),
            heartbeat_interval,
            Arc::clone(&sequence),
            Arc::clone(&heartbeat_acked),
        ));

        info!(
            event_name = "ingress.gateway.identified",
            heartbeat_interval_ms = heartbeat_interval.as_millis() as u64,
            intents = self.settings.intents,
            "identified with the discord gateway"
        );

        *self.session.lock().await =
            Some(GatewaySession { reader, writer, sequence, heartbeat_acked, heartbeat });
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<GatewayEnvelope>, TransportError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Err(TransportError::Receive("no open gateway session".to_owned()));
        };

        loop {
            let text = match session.reader.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => return Err(close_error(frame.as_ref())),
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                None => return Err(TransportError::Receive("gateway stream ended".to_owned())),
            };

            let inbound = match interpret(text.as_str()) {
                Ok(inbound) => inbound,
                Err(error) => {
                    warn!(error = %error, "skipping undecodable gateway frame");
                    continue;
                }
            };

            match inbound {
                Inbound::Dispatch { sequence, name, data } => {
                    if let Some(sequence) = sequence {
                        session.sequence.store(sequence, Ordering::Release);
                    }
                    if let Some(envelope) = reaction_envelope(sequence, &name, data) {
                        return Ok(Some(envelope));
                    }
                }
                Inbound::HeartbeatRequest => {
                    let beat = heartbeat_payload(last_sequence(&session.sequence));
                    send_payload(&session.writer, &beat).await.map_err(TransportError::Receive)?;
                }
                Inbound::HeartbeatAck => session.heartbeat_acked.store(true, Ordering::Release),
                Inbound::Reconnect => {
                    return Err(TransportError::Receive("gateway requested a reconnect".to_owned()))
                }
                Inbound::InvalidSession => {
                    return Err(TransportError::Receive("gateway invalidated the session".to_owned()))
                }
                Inbound::Hello { .. } | Inbound::Other(_) => {}
            }
        }
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        // Gateway dispatches carry no per-event acknowledgement.
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.close_session().await
    }
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Dispatch { sequence: Option<u64>, name: String, data: Value },
    HeartbeatRequest,
    HeartbeatAck,
    Reconnect,
    InvalidSession,
    Hello { heartbeat_interval: Duration },
    Other(u8),
}

fn interpret(text: &str) -> Result<Inbound, serde_json::Error> {
    let payload: GatewayPayload = serde_json::from_str(text)?;
    Ok(match payload.op {
        OP_DISPATCH => Inbound::Dispatch {
            sequence: payload.s,
            name: payload.t.unwrap_or_default(),
            data: payload.d,
        },
        OP_HEARTBEAT => Inbound::HeartbeatRequest,
        OP_HEARTBEAT_ACK => Inbound::HeartbeatAck,
        OP_RECONNECT => Inbound::Reconnect,
        OP_INVALID_SESSION => Inbound::InvalidSession,
        OP_HELLO => match payload.d.get("heartbeat_interval").and_then(Value::as_u64) {
            Some(millis) => Inbound::Hello { heartbeat_interval: Duration::from_millis(millis) },
            None => Inbound::Other(OP_HELLO),
        },
        other => Inbound::Other(other),
    })
}

fn reaction_envelope(sequence: Option<u64>, name: &str, data: Value) -> Option<GatewayEnvelope> {
    if name != REACTION_ADD_DISPATCH && name != REACTION_REMOVE_DISPATCH {
        return None;
    }
    match GatewayEvent::from_dispatch(name, data) {
        Ok(event) => {
            let envelope_id = match sequence {
                Some(sequence) => format!("seq-{sequence}"),
                None => format!("{}-unsequenced", name.to_ascii_lowercase()),
            };
            Some(GatewayEnvelope { envelope_id, event })
        }
        Err(error) => {
            warn!(
                event_name = "ingress.gateway.dispatch_undecodable",
                dispatch = name,
                error = %error,
                "skipping reaction dispatch that could not be decoded"
            );
            None
        }
    }
}

fn identify_payload(token: &str, intents: u64) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "starboard",
                "device": "starboard"
            }
        }
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": sequence })
}

fn last_sequence(sequence: &AtomicU64) -> Option<u64> {
    match sequence.load(Ordering::Acquire) {
        0 => None,
        value => Some(value),
    }
}

fn close_error(frame: Option<&CloseFrame>) -> TransportError {
    let Some(frame) = frame else {
        return TransportError::Receive("gateway closed the connection".to_owned());
    };
    let code = u16::from(frame.code);
    let detail = format!("close code {code}: {}", frame.reason);
    if FATAL_CLOSE_CODES.contains(&code) {
        TransportError::Rejected(detail)
    } else {
        TransportError::Receive(detail)
    }
}

async fn read_hello(reader: &mut SplitStream<Socket>) -> Result<Duration, TransportError> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(Inbound::Hello { heartbeat_interval }) = interpret(text.as_str()) {
                    return Ok(heartbeat_interval);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(match close_error(frame.as_ref()) {
                    TransportError::Receive(detail) => TransportError::Connect(detail),
                    fatal => fatal,
                })
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => return Err(TransportError::Connect(error.to_string())),
            None => return Err(TransportError::Connect("gateway closed before HELLO".to_owned())),
        }
    }
}

async fn send_payload(writer: &SocketWriter, payload: &Value) -> Result<(), String> {
    writer
        .lock()
        .await
        .send(Message::Text(payload.to_string().into()))
        .await
        .map_err(|error| error.to_string())
}

async fn heartbeat_loop(
    writer: SocketWriter,
    interval: Duration,
    sequence: Arc<AtomicU64>,
    acked: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !acked.swap(false, Ordering::AcqRel) {
            warn!(
                event_name = "ingress.gateway.heartbeat_missed",
                "gateway did not acknowledge the last heartbeat; closing session"
            );
            if let Err(error) = writer.lock().await.send(Message::Close(None)).await {
                debug!(error = %error, "close after missed heartbeat failed");
            }
            return;
        }
        if let Err(error) = send_payload(&writer, &heartbeat_payload(last_sequence(&sequence))).await {
            warn!(event_name = "ingress.gateway.heartbeat_failed", error = %error, "heartbeat send failed");
            return;
        }
    }
}
