use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events produced by the upstream read loop.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// Incremental text content from the model.
    Delta { text: String },

    /// Upstream signalled completion (`[DONE]` sentinel or clean EOF).
    Done,

    /// Error while reading or parsing the stream.
    Error { message: String },
}

/// Pull side of an upstream completion stream.
///
/// A spawned read loop parses SSE frames and feeds the channel; this reader
/// hands them out one at a time. Closing (or dropping) the reader cancels
/// the loop, which aborts the in-flight HTTP request.
pub struct TokenReader {
    rx: mpsc::Receiver<TokenEvent>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TokenReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReader")
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl TokenReader {
    pub fn new(rx: mpsc::Receiver<TokenEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next event, or `None` once the read loop has gone away.
    pub async fn next(&mut self) -> Option<TokenEvent> {
        self.rx.recv().await
    }

    /// Abort the read loop. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TokenReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Parse a single SSE line.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_parse() {
        match parse_sse_line("data: {\"x\":1}") {
            Some(SseParsed::Data(d)) => assert_eq!(d, "{\"x\":1}"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn event_lines_parse() {
        match parse_sse_line("event: message") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "message"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn other_lines_are_ignored() {
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("").is_none());
    }

    #[tokio::test]
    async fn reader_drains_channel_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let mut reader = TokenReader::new(rx, CancellationToken::new());
        tx.send(TokenEvent::Delta {
            text: "hi".to_string(),
        })
        .await
        .unwrap();
        tx.send(TokenEvent::Done).await.unwrap();
        drop(tx);

        assert!(matches!(
            reader.next().await,
            Some(TokenEvent::Delta { text }) if text == "hi"
        ));
        assert!(matches!(reader.next().await, Some(TokenEvent::Done)));
        assert!(reader.next().await.is_none());
    }
}
