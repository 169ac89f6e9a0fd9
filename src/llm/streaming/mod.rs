//! Server-Sent Events decoding for streaming responses

/// Server-Sent Events (SSE) decoder
///
/// Buffers incoming bytes and yields one payload per complete event, joining
/// multi-line `data:` fields with `\n`. Handles:
/// - events split across chunks, including inside a UTF-8 sequence
/// - several events in one chunk
/// - `\r\n` line endings
/// - a final event without the terminating blank line (via [`finish`])
///
/// # Example
/// ```
/// use flowr::llm::streaming::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert_eq!(decoder.push(b"data: {\"text\":\"he"), Vec::<String>::new());
/// assert_eq!(decoder.push(b"llo\"}\n\n"), vec!["{\"text\":\"hello\"}"]);
///
/// decoder.push(b"data: {\"done\":true}");
/// assert_eq!(decoder.finish(), vec!["{\"done\":true}"]);
/// ```
///
/// [`finish`]: SseDecoder::finish
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push incoming bytes and return the payloads of completed events
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(payload) = self.process_line(line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush whatever is buffered when the stream ends
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = String::from_utf8_lossy(&rest).into_owned();

        let mut payloads = Vec::new();
        for line in rest.lines() {
            if let Some(payload) = self.process_line(line) {
                payloads.push(payload);
            }
        }
        if let Some(payload) = self.dispatch() {
            payloads.push(payload);
        }
        payloads
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comments and other fields (event:, id:, retry:) carry no payload
        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }
}
