//! Incremental decoder for `text/event-stream` bodies.

/// Splits an event-stream byte feed into `data` payloads.
///
/// Chunks may end anywhere, including inside a UTF-8 sequence; incomplete
/// lines stay buffered until the next [`SseDecoder::push`].
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = text.strip_suffix('\r').unwrap_or(text.as_ref());
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let event = self.data.join("\n");
            self.data.clear();
            return Some(event);
        }
        if line.starts_with(':') {
            // keepalive
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_and_skips_keepalives() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: first\n\n: keepalive\n\ndata: second\n\n");
        assert_eq!(events, ["first", "second"]);
    }

    #[test]
    fn buffers_partial_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"level\":").is_empty());
        assert!(decoder.push(b"\"INFO\"}\n").is_empty());
        assert_eq!(decoder.push(b"\n"), [r#"{"level":"INFO"}"#]);
    }

    #[test]
    fn joins_multiline_data_and_tolerates_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: log\r\nid: 7\r\ndata: one\r\ndata:two\r\n\r\n");
        assert_eq!(events, ["one\ntwo"]);
    }

    #[test]
    fn split_utf8_sequences_survive() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: d\u{e9}j\u{e0} vu\n\n".as_bytes();
        let (head, tail) = bytes.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), ["d\u{e9}j\u{e0} vu"]);
    }
}
