//! NDJSON decoding for the chat endpoint.
//!
//! The backend answers `POST /chat` with one JSON object per line:
//! ```text
//! {"message":{"role":"assistant","content":"Hel"},"done":false}
//! {"message":{"role":"assistant","content":"lo"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true}
//! ```
//! or `{"error":"..."}` when generation fails. Lines that are not valid JSON
//! of that shape are dropped.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::protocol::{ChatChunk, StreamEvent};

/// Incremental line splitter and parser.
///
/// Bytes are buffered until a `\n` arrives, so chunk boundaries may fall
/// anywhere, including inside a multi-byte UTF-8 sequence.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
    dropped: usize,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the events of every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline_pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=newline_pos).collect();
            self.process_line(&line[..newline_pos], &mut events);
        }

        events
    }

    /// Flush an unterminated final line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.process_line(&line, &mut events);
        }
        events
    }

    /// Number of lines discarded as malformed so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let Ok(line) = std::str::from_utf8(raw) else {
            self.dropped += 1;
            warn!("dropping NDJSON line that is not valid UTF-8");
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<ChatChunk>(line) {
            Ok(chunk) => events.extend(chunk_events(chunk)),
            Err(e) => {
                self.dropped += 1;
                warn!(error = %e, "dropping malformed NDJSON line");
            }
        }
    }
}

fn chunk_events(chunk: ChatChunk) -> Vec<StreamEvent> {
    if let Some(error) = chunk.error {
        return vec![StreamEvent::Error(error)];
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            events.push(StreamEvent::Delta(message.content));
        }
    }
    if chunk.done {
        events.push(StreamEvent::Done);
    }
    events
}

/// Turn a chat response body into a lazy stream of [`StreamEvent`]s.
///
/// The stream ends after the first terminal event. A body that ends without
/// `done` is treated as done; a read error ends the stream with
/// [`StreamEvent::Error`].
pub fn chat_events<S, E>(byte_stream: S) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = NdjsonDecoder::new();
        let mut byte_stream = std::pin::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    yield StreamEvent::Error(format!("stream read error: {e}"));
                    return;
                }
            };

            for event in decoder.feed(&chunk) {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
        }

        for event in decoder.finish() {
            let terminal = event.is_terminal();
            yield event;
            if terminal {
                return;
            }
        }

        debug!(dropped = decoder.dropped(), "chat body ended without done marker");
        yield StreamEvent::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = concat!(
        "{\"message\":{\"content\":\"Hel\"}}\n",
        "not json at all\n",
        "\n",
        "{\"message\":{\"content\":\"lo\"}}\n",
        "{\"message\":\n",
        "{\"unrelated\":true}\n",
        "{\"message\":{\"content\":\", world\"}}\n",
        "{\"message\":{\"content\":\"\"},\"done\":true}\n",
    );

    fn deltas(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn malformed_lines_are_dropped_in_order() {
        let mut decoder = NdjsonDecoder::new();
        let mut events = decoder.feed(MIXED.as_bytes());
        events.extend(decoder.finish());

        assert_eq!(deltas(&events), "Hello, world");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(decoder.dropped(), 2);
    }

    #[test]
    fn output_is_independent_of_chunk_boundaries() {
        let bytes = MIXED.as_bytes();
        let mut whole = NdjsonDecoder::new();
        let mut expected = whole.feed(bytes);
        expected.extend(whole.finish());

        for size in 1..=bytes.len() {
            let mut decoder = NdjsonDecoder::new();
            let mut events = Vec::new();
            for chunk in bytes.chunks(size) {
                events.extend(decoder.feed(chunk));
            }
            events.extend(decoder.finish());
            assert_eq!(events, expected, "chunk size {size}");
        }
    }

    #[test]
    fn split_multibyte_character_survives() {
        let line = "{\"message\":{\"content\":\"caf\u{e9}\"}}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.feed(&line[..split]).is_empty());
        let events = decoder.feed(&line[split..]);
        assert_eq!(events, vec![StreamEvent::Delta("caf\u{e9}".into())]);
    }

    #[test]
    fn error_line_becomes_error_event() {
        let mut decoder = NdjsonDecoder::new();
        let events = decoder.feed(b"{\"error\":\"model not loaded\"}\n");
        assert_eq!(events, vec![StreamEvent::Error("model not loaded".into())]);
    }

    #[test]
    fn unterminated_last_line_is_flushed() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.feed(b"{\"message\":{\"content\":\"tail\"}}").is_empty());
        assert_eq!(decoder.finish(), vec![StreamEvent::Delta("tail".into())]);
    }

    #[tokio::test]
    async fn chat_events_stops_at_done_and_synthesizes_missing_done() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"a\"}}\n{\"done\":true}\n")),
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"ignored\"}}\n")),
        ];
        let events: Vec<_> = chat_events(futures_util::stream::iter(chunks)).collect().await;
        assert_eq!(events, vec![StreamEvent::Delta("a".into()), StreamEvent::Done]);

        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"{\"message\":{\"content\":\"b\"}}\n"))];
        let events: Vec<_> = chat_events(futures_util::stream::iter(chunks)).collect().await;
        assert_eq!(events, vec![StreamEvent::Delta("b".into()), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn read_error_ends_stream_with_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"a\"}}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let events: Vec<_> = chat_events(futures_util::stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StreamEvent::Error(m) if m.contains("reset")));
    }
}
