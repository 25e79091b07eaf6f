use std::sync::{Arc, Mutex};

use parley_llm::{TokenEvent, TokenReader};

use crate::types::StreamEvent;

/// Shared between a stream and its background title task. Each stream owns
/// its own instance; the title task is the only writer.
#[derive(Debug)]
pub struct StreamContext {
    conversation_id: String,
    title: Mutex<String>,
}

impl StreamContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            title: Mutex::new(String::new()),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn set_title(&self, title: &str) {
        *self.title.lock().unwrap() = title.to_string();
    }

    pub fn title(&self) -> String {
        self.title.lock().unwrap().clone()
    }
}

/// Runs exactly once per stream with the accumulated assistant text.
pub type Finalizer = Box<dyn FnOnce(&str) + Send>;

#[derive(Debug)]
enum StreamState {
    Open,
    Closed,
}

/// Client-visible event stream over an upstream token reader.
///
/// Tees every text delta into an internal accumulator so the full reply can
/// be persisted when the stream terminates. The finaliser fires at most
/// once, whichever terminal path is taken first — upstream completion,
/// upstream error, `close()`, or drop.
///
/// Empty-accumulator policy: a normally-completed stream persists its
/// (possibly empty) text; an errored stream that produced nothing skips
/// persistence, so an upstream failure before the first delta leaves no
/// assistant row behind.
pub struct MessageStream {
    reader: TokenReader,
    ctx: Arc<StreamContext>,
    on_complete: Option<Finalizer>,
    buf: String,
    state: StreamState,
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("ctx", &self.ctx)
            .field("buf", &self.buf)
            .field("state", &self.state)
            .finish()
    }
}

impl MessageStream {
    pub fn new(reader: TokenReader, ctx: Arc<StreamContext>, on_complete: Finalizer) -> Self {
        Self {
            reader,
            ctx,
            on_complete: Some(on_complete),
            buf: String::new(),
            state: StreamState::Open,
        }
    }

    pub fn context(&self) -> Arc<StreamContext> {
        Arc::clone(&self.ctx)
    }

    /// Pull the next event. The `bool` marks terminal events; after one has
    /// been returned the stream is closed and `next` yields `None`.
    pub async fn next(&mut self) -> Option<(StreamEvent, bool)> {
        if matches!(self.state, StreamState::Closed) {
            return None;
        }
        match self.reader.next().await {
            Some(TokenEvent::Delta { text }) => {
                self.buf.push_str(&text);
                Some((StreamEvent::text_delta(text), false))
            }
            Some(TokenEvent::Done) | None => {
                self.finish(false);
                let ev = StreamEvent::done(self.ctx.conversation_id(), self.ctx.title());
                Some((ev, true))
            }
            Some(TokenEvent::Error { message }) => {
                self.finish(true);
                let ev = StreamEvent::error(message, self.ctx.conversation_id(), self.ctx.title());
                Some((ev, true))
            }
        }
    }

    /// Run the finaliser if it has not fired yet, then close the upstream
    /// reader. Idempotent.
    pub fn close(&mut self) {
        if matches!(self.state, StreamState::Open) {
            self.finish(false);
        }
    }

    fn finish(&mut self, errored: bool) {
        self.state = StreamState::Closed;
        self.reader.close();
        if let Some(finalize) = self.on_complete.take() {
            if errored && self.buf.is_empty() {
                return;
            }
            finalize(&self.buf);
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamEventType;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn reader_with(events: Vec<TokenEvent>) -> TokenReader {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for ev in events {
            tx.try_send(ev).unwrap();
        }
        // tx dropped here: after the queued events the reader sees EOF
        TokenReader::new(rx, CancellationToken::new())
    }

    fn recording_finalizer() -> (Finalizer, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls2 = Arc::clone(&calls);
        let f: Finalizer = Box::new(move |content: &str| {
            calls2.lock().unwrap().push(content.to_string());
        });
        (f, calls)
    }

    fn delta(text: &str) -> TokenEvent {
        TokenEvent::Delta {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn deltas_accumulate_and_done_carries_conversation_id() {
        let (f, calls) = recording_finalizer();
        let ctx = Arc::new(StreamContext::new("c1"));
        let mut stream = MessageStream::new(
            reader_with(vec![delta("he"), delta("llo"), TokenEvent::Done]),
            ctx,
            f,
        );

        let (ev, done) = stream.next().await.unwrap();
        assert_eq!(ev.event_type, StreamEventType::TextDelta);
        assert_eq!(ev.delta, "he");
        assert!(!done);

        let (ev, _) = stream.next().await.unwrap();
        assert_eq!(ev.delta, "llo");

        let (ev, done) = stream.next().await.unwrap();
        assert_eq!(ev.event_type, StreamEventType::Done);
        assert_eq!(ev.conversation_id, "c1");
        assert!(done);

        assert!(stream.next().await.is_none());
        assert_eq!(*calls.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn eof_without_sentinel_still_finalises() {
        let (f, calls) = recording_finalizer();
        let ctx = Arc::new(StreamContext::new("c1"));
        let mut stream = MessageStream::new(reader_with(vec![delta("hi")]), ctx, f);

        stream.next().await.unwrap();
        let (ev, done) = stream.next().await.unwrap();
        assert_eq!(ev.event_type, StreamEventType::Done);
        assert!(done);
        assert_eq!(*calls.lock().unwrap(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn close_mid_stream_persists_partial_content() {
        let (f, calls) = recording_finalizer();
        let ctx = Arc::new(StreamContext::new("c1"));
        let mut stream = MessageStream::new(
            reader_with(vec![delta("he"), delta("llo"), delta("never")]),
            ctx,
            f,
        );

        stream.next().await.unwrap();
        stream.next().await.unwrap();
        stream.close();
        stream.close(); // idempotent

        assert!(stream.next().await.is_none());
        assert_eq!(*calls.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn drop_mid_stream_persists_partial_content() {
        let (f, calls) = recording_finalizer();
        let ctx = Arc::new(StreamContext::new("c1"));
        let mut stream = MessageStream::new(reader_with(vec![delta("par"), delta("tial")]), ctx, f);

        stream.next().await.unwrap();
        stream.next().await.unwrap();
        drop(stream);

        assert_eq!(*calls.lock().unwrap(), vec!["partial".to_string()]);
    }

    #[tokio::test]
    async fn error_before_any_delta_skips_persistence() {
        let (f, calls) = recording_finalizer();
        let ctx = Arc::new(StreamContext::new("c1"));
        let mut stream = MessageStream::new(
            reader_with(vec![TokenEvent::Error {
                message: "boom".to_string(),
            }]),
            ctx,
            f,
        );

        let (ev, done) = stream.next().await.unwrap();
        assert_eq!(ev.event_type, StreamEventType::Error);
        assert_eq!(ev.delta, "boom");
        assert!(done);
        assert!(stream.next().await.is_none());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_after_deltas_persists_partial_content() {
        let (f, calls) = recording_finalizer();
        let ctx = Arc::new(StreamContext::new("c1"));
        let mut stream = MessageStream::new(
            reader_with(vec![
                delta("half"),
                TokenEvent::Error {
                    message: "cut off".to_string(),
                },
            ]),
            ctx,
            f,
        );

        stream.next().await.unwrap();
        let (ev, done) = stream.next().await.unwrap();
        assert_eq!(ev.event_type, StreamEventType::Error);
        assert!(done);
        assert_eq!(*calls.lock().unwrap(), vec!["half".to_string()]);
    }

    #[tokio::test]
    async fn title_set_before_drain_shows_on_terminal_event() {
        let (f, _calls) = recording_finalizer();
        let ctx = Arc::new(StreamContext::new("c1"));
        let mut stream = MessageStream::new(reader_with(vec![TokenEvent::Done]), ctx, f);

        stream.context().set_title("Greetings");
        let (ev, done) = stream.next().await.unwrap();
        assert!(done);
        assert_eq!(ev.title, "Greetings");
    }
}
