//! Incremental server-sent-event framing.
//!
//! Bytes arrive in arbitrary chunks; frames are emitted once their blank-line
//! terminator has been seen. Payload interpretation is left to callers.

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    /// Returns true for the `[DONE]` sentinel used by OpenAI-style streams.
    #[must_use]
    pub fn is_done_sentinel(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    /// Event name, defaulting to `message` as the SSE format specifies.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental parser for SSE text streams.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: String,
    pending_utf8: Vec<u8>,
}

impl SseFrameParser {
    /// Feeds arbitrary bytes and drains every complete frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.push_bytes(bytes);
        let mut frames = Vec::new();

        while let Some((split, terminator_len)) = find_frame_end(&self.buffer) {
            let raw = self.buffer[..split].to_string();
            self.buffer.drain(..split + terminator_len);
            if let Some(frame) = parse_frame(&raw) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flushes a trailing frame that was not blank-line terminated.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let raw = std::mem::take(&mut self.buffer);
        self.pending_utf8.clear();
        parse_frame(&raw)
    }

    /// Parses a complete SSE payload string in one shot.
    pub fn parse_all(input: &str) -> Vec<SseFrame> {
        let mut parser = Self::default();
        let mut frames = parser.feed(input.as_bytes());
        frames.extend(parser.finish());
        frames
    }

    #[must_use]
    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && self.pending_utf8.is_empty()
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending_utf8.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending_utf8) {
            Ok(text) => {
                self.buffer.push_str(&text.replace("\r\n", "\n"));
                self.pending_utf8.clear();
            }
            Err(error) => {
                let valid = error.valid_up_to();
                // An incomplete multi-byte sequence at the end waits for the next chunk.
                if error.error_len().is_none() {
                    let text = String::from_utf8_lossy(&self.pending_utf8[..valid]).into_owned();
                    self.buffer.push_str(&text.replace("\r\n", "\n"));
                    self.pending_utf8.drain(..valid);
                } else {
                    let text = String::from_utf8_lossy(&self.pending_utf8).into_owned();
                    self.buffer.push_str(&text.replace("\r\n", "\n"));
                    self.pending_utf8.clear();
                }
            }
        }
    }
}

fn find_frame_end(buffer: &str) -> Option<(usize, usize)> {
    buffer.find("\n\n").map(|index| (index, 2))
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => frame.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => frame.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && frame.event.is_none() {
        return None;
    }

    frame.data = data_lines.join("\n");
    Some(frame)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{SseFrame, SseFrameParser};

    #[test]
    fn frames_are_emitted_only_after_blank_line() {
        let mut parser = SseFrameParser::default();

        assert!(parser.feed(b"event: ping\ndata: {\"a\"").is_empty());
        let frames = parser.feed(b":1}\n\n");

        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("ping".to_string()),
                data: "{\"a\":1}".to_string(),
                id: None,
            }]
        );
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn multi_line_data_is_joined_and_comments_are_skipped() {
        let frames = SseFrameParser::parse_all(": keepalive\n\ndata: one\ndata: two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one\ntwo");
        assert_eq!(frames[0].event_name(), "message");
    }

    #[test]
    fn crlf_terminators_are_normalized() {
        let frames = SseFrameParser::parse_all("data: [DONE]\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_done_sentinel());
    }

    #[test]
    fn split_utf8_sequences_survive_chunk_boundaries() {
        let payload = "data: héllo\n\n".as_bytes();
        let split = payload
            .iter()
            .position(|byte| *byte == 0xC3)
            .expect("payload contains multi-byte char")
            + 1;

        let mut parser = SseFrameParser::default();
        assert!(parser.feed(&payload[..split]).is_empty());
        let frames = parser.feed(&payload[split..]);

        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn finish_flushes_unterminated_trailing_frame() {
        let mut parser = SseFrameParser::default();
        assert!(parser.feed(b"data: tail").is_empty());
        let frame = parser.finish().expect("trailing frame");
        assert_eq!(frame.data, "tail");
    }
}
