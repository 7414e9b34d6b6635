//! Wire protocol types shared by the RPC server, the WebSocket stream, and
//! the MCP client: JSON-RPC 2.0 envelopes, the socket framing codec, and
//! the editor-facing WebSocket frames.
//!
//! # Framing
//!
//! The socket accepts two framings and lets the client's first frame pick:
//! a first byte of `{` selects one-JSON-object-per-line; anything else is
//! read as a 4-byte big-endian length prefix followed by that many bytes of
//! UTF-8 JSON. The chosen framing then holds for the whole session.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ZekeError, ZekeResult};

pub const JSONRPC_VERSION: &str = "2.0";

/// Upper bound for one length-prefixed frame (16 MiB).
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// JSON-RPC request or notification (no id).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(
        id: impl Into<serde_json::Value>,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// A notification: request without an id, never answered.
    pub fn notification(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: serde_json::Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn from_error(id: serde_json::Value, e: &ZekeError) -> Self {
        let mut resp = Self::failure(id, e.rpc_code(), e.to_string());
        if let Some(err) = resp.error.as_mut() {
            err.data = Some(serde_json::json!({ "kind": e.code_str() }));
        }
        resp
    }
}

/// Socket framing, selected by the first client frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    LineDelimited,
    LengthPrefixed,
}

impl Framing {
    /// `{` starts a JSON object, so the session is line-delimited; anything
    /// else is the first byte of a length prefix.
    pub fn detect(first_byte: u8) -> Framing {
        if first_byte == b'{' {
            Framing::LineDelimited
        } else {
            Framing::LengthPrefixed
        }
    }

    /// Reads one frame. `Ok(None)` means a clean EOF between frames.
    pub async fn read_frame<R>(
        &self,
        reader: &mut BufReader<R>,
    ) -> ZekeResult<Option<Vec<u8>>>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        match self {
            Framing::LineDelimited => {
                let mut line = String::new();
                let n = reader.read_line(&mut line).await?;
                if n == 0 {
                    return Ok(None);
                }
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() {
                    return Ok(Some(Vec::new()));
                }
                Ok(Some(trimmed.as_bytes().to_vec()))
            }
            Framing::LengthPrefixed => {
                let mut len_bytes = [0u8; 4];
                match reader.read_exact(&mut len_bytes).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Ok(None)
                    }
                    Err(e) => return Err(ZekeError::Io(e)),
                }
                let len = u32::from_be_bytes(len_bytes);
                if len > MAX_FRAME_BYTES {
                    return Err(ZekeError::InvalidArgument(format!(
                        "frame of {len} bytes exceeds limit"
                    )));
                }
                let mut payload = vec![0u8; len as usize];
                reader.read_exact(&mut payload).await?;
                Ok(Some(payload))
            }
        }
    }

    /// Writes one frame and flushes.
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> ZekeResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        match self {
            Framing::LineDelimited => {
                writer.write_all(payload).await?;
                writer.write_all(b"\n").await?;
            }
            Framing::LengthPrefixed => {
                writer
                    .write_all(&(payload.len() as u32).to_be_bytes())
                    .await?;
                writer.write_all(payload).await?;
            }
        }
        writer.flush().await?;
        Ok(())
    }
}

/// WebSocket frames for editor clients. `chat_request` initiates; the rest
/// are server-pushed (plus `ping`/`pong` both ways).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame {
    ChatRequest {
        id: String,
        #[serde(flatten)]
        request: crate::chat::ChatRequest,
    },
    ChatStart {
        id: String,
        model: String,
        provider: String,
    },
    ChatDelta {
        id: String,
        delta: String,
        finished: bool,
    },
    StreamEnd {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u32>,
    },
    Error {
        id: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Ping {
        ts: i64,
    },
    Pong {
        ts: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_by_first_byte() {
        assert_eq!(Framing::detect(b'{'), Framing::LineDelimited);
        assert_eq!(Framing::detect(0x00), Framing::LengthPrefixed);
        assert_eq!(Framing::detect(0x7f), Framing::LengthPrefixed);
    }

    #[tokio::test]
    async fn line_frames_round_trip() {
        let mut buf = Vec::new();
        Framing::LineDelimited
            .write_frame(&mut buf, br#"{"a":1}"#)
            .await
            .unwrap();
        Framing::LineDelimited
            .write_frame(&mut buf, br#"{"b":2}"#)
            .await
            .unwrap();
        let mut reader = BufReader::new(buf.as_slice());
        let one = Framing::LineDelimited
            .read_frame(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one, br#"{"a":1}"#);
        let two = Framing::LineDelimited
            .read_frame(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(two, br#"{"b":2}"#);
        assert!(Framing::LineDelimited
            .read_frame(&mut reader)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn length_prefixed_frames_round_trip() {
        let mut buf = Vec::new();
        Framing::LengthPrefixed
            .write_frame(&mut buf, br#"{"x":"y"}"#)
            .await
            .unwrap();
        assert_eq!(&buf[..4], &9u32.to_be_bytes());
        let mut reader = BufReader::new(buf.as_slice());
        let frame = Framing::LengthPrefixed
            .read_frame(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, br#"{"x":"y"}"#);
        assert!(Framing::LengthPrefixed
            .read_frame(&mut reader)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let mut reader = BufReader::new(buf.as_slice());
        assert!(Framing::LengthPrefixed
            .read_frame(&mut reader)
            .await
            .is_err());
    }

    #[test]
    fn notification_has_no_id() {
        let n = RpcRequest::notification("stream.delta", serde_json::json!({"id": "s"}));
        assert!(n.is_notification());
        let json = serde_json::to_value(&n).unwrap();
        assert!(json.get("id").is_none());
    }

    #[test]
    fn response_from_error_carries_kind() {
        let e = ZekeError::InvalidArgument("bad".into());
        let resp = RpcResponse::from_error(serde_json::json!(1), &e);
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32602);
        assert_eq!(err.data.unwrap()["kind"], serde_json::json!("invalid_argument"));
    }

    #[test]
    fn ws_frames_tag_by_type() {
        let frame = WsFrame::ChatDelta {
            id: "c1".into(),
            delta: "hi".into(),
            finished: false,
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], serde_json::json!("chat_delta"));
        let back: WsFrame = serde_json::from_value(v).unwrap();
        assert!(matches!(back, WsFrame::ChatDelta { .. }));
    }

    #[test]
    fn chat_request_frame_flattens_request() {
        let json = serde_json::json!({
            "type": "chat_request",
            "id": "r1",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "tags": {"intent": "code"}
        });
        let frame: WsFrame = serde_json::from_value(json).unwrap();
        match frame {
            WsFrame::ChatRequest { id, request } => {
                assert_eq!(id, "r1");
                assert_eq!(request.messages.len(), 1);
                assert!(request.stream);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }
}
