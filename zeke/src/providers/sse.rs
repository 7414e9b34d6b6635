//! Server-Sent-Events decoder for provider streams.
//!
//! Feeds arbitrary byte chunks, yields complete `data:` payloads. A JSON
//! fragment split across a read boundary stays buffered until the rest
//! arrives; `data: [DONE]` terminates the stream.

/// One decoded SSE item.
#[derive(Clone, Debug, PartialEq)]
pub enum SseEvent {
    /// Payload of one `data:` line (trimmed, without the prefix).
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental decoder. One instance per response body.
#[derive(Default)]
pub struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one chunk of the response body and returns every event that
    /// became complete. Bytes after the last newline remain buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = decode_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes a final unterminated line at end of stream.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buf);
        decode_line(line.trim_end_matches(['\n', '\r']))
    }
}

fn decode_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_lines_and_done() {
        let mut d = SseDecoder::new();
        let events = d.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".into()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn partial_json_held_until_next_read() {
        let mut d = SseDecoder::new();
        assert!(d.feed(b"data: {\"content\":\"he").is_empty());
        let events = d.feed(b"llo\"}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"content\":\"hello\"}".into())]);
    }

    #[test]
    fn split_across_prefix_boundary() {
        let mut d = SseDecoder::new();
        assert!(d.feed(b"da").is_empty());
        assert!(d.feed(b"ta: x").is_empty());
        assert_eq!(d.feed(b"\n"), vec![SseEvent::Data("x".into())]);
    }

    #[test]
    fn ignores_comments_event_names_and_blank_lines() {
        let mut d = SseDecoder::new();
        let events = d.feed(b": keepalive\nevent: message_delta\n\ndata: y\n");
        assert_eq!(events, vec![SseEvent::Data("y".into())]);
    }

    #[test]
    fn crlf_line_endings_tolerated() {
        let mut d = SseDecoder::new();
        let events = d.feed(b"data: z\r\n");
        assert_eq!(events, vec![SseEvent::Data("z".into())]);
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut d = SseDecoder::new();
        assert!(d.feed(b"data: tail").is_empty());
        assert_eq!(d.finish(), Some(SseEvent::Data("tail".into())));
        assert_eq!(d.finish(), None);
    }
}
