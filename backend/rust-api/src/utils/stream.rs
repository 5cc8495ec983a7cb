//! Line-delimited `data:` event framing over a byte stream.
//!
//! Transport chunks do not align with event boundaries: a chunk may end in
//! the middle of a `data:` line, an escape sequence, or a multi-byte UTF-8
//! character. [`SseParser`] buffers bytes until a full `\n\n`-terminated
//! event is available and only then decodes it.

/// Terminates a finished stream; sent as a literal `data: [DONE]` event.
pub const DONE_MARKER: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";
const EVENT_DELIMITER: &[u8] = b"\n\n";

/// Escape a token for single-line framing. Newlines inside a token would
/// otherwise break the event boundary.
pub fn escape_token(token: &str) -> String {
    token.replace('\n', "\\n").replace('\r', "\\r")
}

pub fn unescape_token(data: &str) -> String {
    data.replace("\\n", "\n").replace("\\r", "\r")
}

/// A decoded event from the tutoring stream protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A piece of assistant text, already unescaped.
    Token(String),
    /// End-of-stream marker.
    Done,
    /// Structured mid-stream error; distinguishable from literal text
    /// because it arrives as a JSON object with an `error` field.
    Error(String),
}

/// Decode one complete `data:` payload of the tutoring protocol.
pub fn decode_frame(payload: &str) -> StreamFrame {
    if payload == DONE_MARKER {
        return StreamFrame::Done;
    }
    if payload.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
            if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
                return StreamFrame::Error(message.to_string());
            }
        }
        // Not an error object; treat as literal text.
    }
    StreamFrame::Token(unescape_token(payload))
}

/// Incremental parser extracting complete `data:` payloads from arbitrary
/// byte chunks. Owns its buffer; callers feed raw transport chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and return every payload whose event became
    /// complete. Incomplete trailing bytes stay buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let event: Vec<u8> = self.buf.drain(..pos + EVENT_DELIMITER.len()).collect();
            // A complete event is a whole number of UTF-8 sequences; lossy
            // decoding only matters for a misbehaving producer.
            let text = String::from_utf8_lossy(&event[..pos]);
            for line in text.split('\n') {
                if let Some(data) = line.strip_prefix(DATA_PREFIX) {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }

    /// Bytes still waiting for their event delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(EVENT_DELIMITER.len())
        .position(|w| w == EVENT_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_frame_split_mid_payload() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: Hel").is_empty());
        let payloads = parser.push(b"lo\n\n");
        assert_eq!(payloads, vec!["Hello".to_string()]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn parses_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let payloads = parser.push(b"data: a\n\ndata: b\n\ndata: [DONE]\n\n");
        assert_eq!(payloads, vec!["a", "b", "[DONE]"]);
    }

    #[test]
    fn buffers_split_multibyte_sequences() {
        let mut parser = SseParser::new();
        let event = "data: caf\u{e9}\n\n".as_bytes();
        // Split inside the two-byte 'é' sequence.
        let split = event.len() - 4;
        assert!(parser.push(&event[..split]).is_empty());
        let payloads = parser.push(&event[split..]);
        assert_eq!(payloads, vec!["caf\u{e9}".to_string()]);
    }

    #[test]
    fn buffers_split_escape_sequence() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: line\\").is_empty());
        let payloads = parser.push(b"nbreak\n\n");
        assert_eq!(payloads, vec!["line\\nbreak".to_string()]);
        assert_eq!(
            decode_frame(&payloads[0]),
            StreamFrame::Token("line\nbreak".to_string())
        );
    }

    #[test]
    fn decode_distinguishes_done_error_and_text() {
        assert_eq!(decode_frame("[DONE]"), StreamFrame::Done);
        assert_eq!(
            decode_frame(r#"{"error": "Course not found"}"#),
            StreamFrame::Error("Course not found".to_string())
        );
        // JSON-looking text without an error field stays literal.
        assert_eq!(
            decode_frame(r#"{"note": "hi"}"#),
            StreamFrame::Token(r#"{"note": "hi"}"#.to_string())
        );
        assert_eq!(
            decode_frame("plain\\ntext"),
            StreamFrame::Token("plain\ntext".to_string())
        );
    }

    #[test]
    fn escape_round_trip() {
        let token = "a\nb\rc";
        assert_eq!(escape_token(token), "a\\nb\\rc");
        assert_eq!(unescape_token(&escape_token(token)), token);
    }

    #[test]
    fn consumer_accumulates_truncated_stream_on_cancel() {
        // Cancellation mid-stream: earlier complete frames stay intact, the
        // partial tail is simply never delivered.
        let mut parser = SseParser::new();
        let mut reply = String::new();
        for payload in parser.push(b"data: Hello \n\ndata: wor") {
            if let StreamFrame::Token(t) = decode_frame(&payload) {
                reply.push_str(&t);
            }
        }
        assert_eq!(reply, "Hello ");
        assert_eq!(parser.pending(), "data: wor".len());
    }
}
