//! Rich-presence session over the chat client's local IPC endpoint.
//!
//! Frames are `opcode: u32 LE, length: u32 LE, payload: JSON`. One
//! handshake on connect, SET_ACTIVITY pushes afterwards. The endpoint also
//! emits asynchronous events (ready, presence echo); those are surfaced on
//! a channel and consumed by a log-only task; nothing in the monitor
//! depends on them.

use crate::presence::PresenceRecord;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;

const OP_HANDSHAKE: u32 = 0;
const OP_FRAME: u32 = 1;
const OP_CLOSE: u32 = 2;

#[derive(Debug)]
pub enum TransportError {
    /// No IPC endpoint answered; the chat client probably isn't running.
    NoEndpoint,
    Io(std::io::Error),
    /// Endpoint answered the handshake with something other than READY.
    Handshake(String),
    Decode(serde_json::Error),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NoEndpoint => {
                write!(f, "no presence IPC endpoint found (is the client running?)")
            }
            TransportError::Io(e) => write!(f, "presence IPC I/O error: {e}"),
            TransportError::Handshake(reply) => {
                write!(f, "presence handshake rejected: {reply}")
            }
            TransportError::Decode(e) => write!(f, "malformed presence frame: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// Out-of-band session notifications. Advisory only; logged, never acted
/// on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake accepted; carries the authenticated user.
    Ready { username: String },
    /// The endpoint echoed back the presence it now displays.
    PresenceUpdated {
        details: Option<String>,
        state: Option<String>,
    },
}

/// Session over which presence records are published.
#[async_trait]
pub trait PresenceTransport: Send {
    async fn publish(&mut self, record: &PresenceRecord) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

fn encode_frame(opcode: u32, payload: &Value) -> Vec<u8> {
    let body = payload.to_string().into_bytes();
    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(u32, Value), TransportError> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).await?;
    let opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;
    let payload = serde_json::from_slice(&body).map_err(TransportError::Decode)?;
    Ok((opcode, payload))
}

/// Map a received frame payload onto a session event, if it is one.
fn parse_event(payload: &Value) -> Option<SessionEvent> {
    if payload.get("evt").and_then(Value::as_str) == Some("READY") {
        let username = payload
            .pointer("/data/user/username")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        return Some(SessionEvent::Ready { username });
    }

    if payload.get("cmd").and_then(Value::as_str) == Some("SET_ACTIVITY") {
        let field = |name: &str| {
            payload
                .pointer(&format!("/data/{name}"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        return Some(SessionEvent::PresenceUpdated {
            details: field("details"),
            state: field("state"),
        });
    }

    None
}

trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type IpcStream = Box<dyn AsyncStream>;

/// Concrete IPC-backed presence session.
pub struct IpcTransport {
    writer: tokio::io::WriteHalf<IpcStream>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl IpcTransport {
    /// Connect to the local endpoint and perform the one-shot handshake.
    ///
    /// Returns the session plus the advisory event receiver; the READY
    /// event is the first thing delivered on it.
    pub async fn connect(
        application_id: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), TransportError> {
        let stream = open_ipc_stream().await?;
        Self::connect_over(stream, application_id).await
    }

    async fn connect_over(
        mut stream: IpcStream,
        application_id: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), TransportError> {
        let handshake = json!({ "v": 1, "client_id": application_id });
        stream.write_all(&encode_frame(OP_HANDSHAKE, &handshake)).await?;

        let (opcode, reply) = read_frame(&mut stream).await?;
        if opcode != OP_FRAME || reply.get("evt").and_then(Value::as_str) != Some("READY") {
            return Err(TransportError::Handshake(reply.to_string()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Some(event) = parse_event(&reply) {
            let _ = events_tx.send(event);
        }

        let (mut read_half, writer) = tokio::io::split(stream);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok((_opcode, payload)) => {
                        if let Some(event) = parse_event(&payload) {
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Err(TransportError::Decode(e)) => {
                        tracing::debug!(error = %e, "ignoring malformed frame");
                    }
                    Err(_) => break,
                }
            }
        });

        Ok((
            Self {
                writer,
                reader_task,
            },
            events_rx,
        ))
    }
}

#[async_trait]
impl PresenceTransport for IpcTransport {
    async fn publish(&mut self, record: &PresenceRecord) -> Result<(), TransportError> {
        let payload = json!({
            "cmd": "SET_ACTIVITY",
            "args": {
                "pid": std::process::id(),
                "activity": record.activity_payload(),
            },
            "nonce": Uuid::new_v4().to_string(),
        });
        self.writer
            .write_all(&encode_frame(OP_FRAME, &payload))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Best effort: the endpoint may already be gone on the drain path.
        let _ = self
            .writer
            .write_all(&encode_frame(OP_CLOSE, &json!({})))
            .await;
        let _ = self.writer.shutdown().await;
        self.reader_task.abort();
        Ok(())
    }
}

/// Try the platform's well-known IPC endpoints in order.
async fn open_ipc_stream() -> Result<IpcStream, TransportError> {
    #[cfg(unix)]
    for path in socket_candidates() {
        if let Ok(stream) = tokio::net::UnixStream::connect(&path).await {
            tracing::debug!(path = %path.display(), "connected to presence endpoint");
            return Ok(Box::new(stream));
        }
    }

    #[cfg(windows)]
    for index in 0..10 {
        let path = format!(r"\\.\pipe\discord-ipc-{index}");
        if let Ok(pipe) = tokio::net::windows::named_pipe::ClientOptions::new().open(&path) {
            tracing::debug!(path, "connected to presence endpoint");
            return Ok(Box::new(pipe));
        }
    }

    Err(TransportError::NoEndpoint)
}

/// `discord-ipc-{0..9}` under each runtime/temp directory, most specific
/// first.
#[cfg(unix)]
fn socket_candidates() -> Vec<std::path::PathBuf> {
    let mut dirs = Vec::new();
    for var in ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"] {
        if let Ok(dir) = std::env::var(var) {
            if !dir.is_empty() {
                dirs.push(std::path::PathBuf::from(dir));
            }
        }
    }
    dirs.push(std::path::PathBuf::from("/tmp"));

    let mut candidates = Vec::new();
    for dir in dirs {
        for index in 0..10 {
            candidates.push(dir.join(format!("discord-ipc-{index}")));
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceRecord;

    fn record() -> PresenceRecord {
        PresenceRecord {
            details: "Drawing".to_string(),
            state: "sketch.clip".to_string(),
            started_at: 1234,
            large_image: Some("https://files.example/x.png".to_string()),
            large_image_text: String::new(),
            small_image_key: "paint-new".to_string(),
            small_image_text: String::new(),
            button: None,
        }
    }

    #[test]
    fn test_frame_header_is_little_endian() {
        let frame = encode_frame(1, &json!({}));
        assert_eq!(&frame[0..4], &[1, 0, 0, 0]);
        // "{}" is two bytes
        assert_eq!(&frame[4..8], &[2, 0, 0, 0]);
        assert_eq!(&frame[8..], b"{}");
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let payload = json!({ "cmd": "SET_ACTIVITY", "nonce": "abc" });
        let frame = encode_frame(OP_FRAME, &payload);

        let mut cursor: &[u8] = &frame;
        let (opcode, decoded) = read_frame(&mut cursor).await.unwrap();
        assert_eq!(opcode, OP_FRAME);
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_read_frame_truncated_is_io_error() {
        let frame = encode_frame(OP_FRAME, &json!({ "k": "v" }));
        let mut cursor: &[u8] = &frame[..frame.len() - 3];
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_parse_ready_event() {
        let payload = json!({
            "cmd": "DISPATCH",
            "evt": "READY",
            "data": { "user": { "username": "korone" } }
        });
        assert_eq!(
            parse_event(&payload),
            Some(SessionEvent::Ready {
                username: "korone".to_string()
            })
        );
    }

    #[test]
    fn test_parse_presence_echo_event() {
        let payload = json!({
            "cmd": "SET_ACTIVITY",
            "data": { "details": "Drawing", "state": "sketch.clip" }
        });
        assert_eq!(
            parse_event(&payload),
            Some(SessionEvent::PresenceUpdated {
                details: Some("Drawing".to_string()),
                state: Some("sketch.clip".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_unrelated_frame_is_not_an_event() {
        assert_eq!(parse_event(&json!({ "cmd": "DISPATCH", "evt": "OTHER" })), None);
        assert_eq!(parse_event(&json!({})), None);
    }

    /// Fake endpoint on an in-memory duplex stream: accept the handshake,
    /// answer READY, then record whatever gets published.
    #[tokio::test]
    async fn test_connect_handshake_and_publish() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let (opcode, handshake) = read_frame(&mut server_side).await.unwrap();
            assert_eq!(opcode, OP_HANDSHAKE);
            assert_eq!(handshake["v"], 1);
            assert_eq!(handshake["client_id"], "app-123");

            let ready = json!({
                "cmd": "DISPATCH",
                "evt": "READY",
                "data": { "user": { "username": "korone" } }
            });
            server_side
                .write_all(&encode_frame(OP_FRAME, &ready))
                .await
                .unwrap();

            let (opcode, published) = read_frame(&mut server_side).await.unwrap();
            assert_eq!(opcode, OP_FRAME);
            published
        });

        let (mut transport, mut events) =
            IpcTransport::connect_over(Box::new(client_side), "app-123")
                .await
                .unwrap();

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Ready {
                username: "korone".to_string()
            })
        );

        transport.publish(&record()).await.unwrap();

        let published = server.await.unwrap();
        assert_eq!(published["cmd"], "SET_ACTIVITY");
        assert_eq!(published["args"]["activity"]["state"], "sketch.clip");
        assert_eq!(published["args"]["activity"]["timestamps"]["start"], 1234);
        assert!(published["nonce"].is_string());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejected_handshake_is_error() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let _ = read_frame(&mut server_side).await;
            let error = json!({ "cmd": "DISPATCH", "evt": "ERROR", "data": { "code": 4000 } });
            let _ = server_side
                .write_all(&encode_frame(OP_FRAME, &error))
                .await;
        });

        let err = IpcTransport::connect_over(Box::new(client_side), "app-123")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_candidates_cover_tmp_fallback() {
        let candidates = socket_candidates();
        for index in 0..10 {
            let expected = std::path::PathBuf::from(format!("/tmp/discord-ipc-{index}"));
            assert!(candidates.contains(&expected));
        }
    }
}
