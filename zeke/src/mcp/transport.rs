//! MCP transports: stdio child process, WebSocket, docker exec pipe.
//!
//! All three move line-shaped JSON-RPC messages; the docker transport is the
//! stdio one with a `docker exec -i` command line.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{ZekeError, ZekeResult};

/// One MCP message pipe.
#[async_trait]
pub trait McpTransport: Send {
    /// Sends one JSON-RPC message (no trailing newline).
    async fn send(&mut self, line: &str) -> ZekeResult<()>;

    /// Receives the next message; `None` when the peer closed.
    async fn recv(&mut self) -> ZekeResult<Option<String>>;
}

/// Child-process transport: JSON lines over stdin/stdout. Stderr is
/// discarded so server debug chatter does not pollute the terminal.
pub struct StdioTransport {
    _child: Child,
    stdin: ChildStdin,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> ZekeResult<Self> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ZekeError::Network("mcp child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ZekeError::Network("mcp child has no stdout".into()))?;
        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    /// Docker variant: `docker exec -i <container> <command> <args…>` with
    /// the same line framing on the exec pipe.
    pub fn docker(container: &str, command: &str, args: &[String]) -> ZekeResult<Self> {
        let mut full = vec![
            "exec".to_string(),
            "-i".to_string(),
            container.to_string(),
            command.to_string(),
        ];
        full.extend(args.iter().cloned());
        Self::spawn("docker", &full, &[])
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&mut self, line: &str) -> ZekeResult<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> ZekeResult<Option<String>> {
        loop {
            match self.stdout.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(line)),
                None => return Ok(None),
            }
        }
    }
}

/// WebSocket transport: one JSON object per text frame.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> ZekeResult<Self> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ZekeError::Network(format!("mcp websocket connect: {e}")))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl McpTransport for WsTransport {
    async fn send(&mut self, line: &str) -> ZekeResult<()> {
        self.stream
            .send(Message::Text(line.to_string().into()))
            .await
            .map_err(|e| ZekeError::Network(format!("mcp websocket send: {e}")))
    }

    async fn recv(&mut self) -> ZekeResult<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.stream.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(ZekeError::Network(format!("mcp websocket recv: {e}")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdio_transport_round_trips_lines() {
        // `cat` echoes our frames back verbatim.
        let mut t = StdioTransport::spawn("cat", &[], &[]).unwrap();
        t.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .await
            .unwrap();
        let line = t.recv().await.unwrap().unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
    }

    #[tokio::test]
    async fn stdio_transport_skips_blank_lines() {
        let mut t = StdioTransport::spawn("printf", &["\\n\\n{\"id\":2}\\n".into()], &[])
            .unwrap();
        let line = t.recv().await.unwrap().unwrap();
        assert_eq!(line, r#"{"id":2}"#);
        assert!(t.recv().await.unwrap().is_none());
    }
}
