pub mod ndjson;
pub mod sse;

use std::pin::Pin;

use futures_util::Stream;

use crate::protocol::StreamEvent;

pub use ndjson::{chat_events, NdjsonDecoder};
pub use sse::{research_event, SseDecoder, SseFrame};

/// A boxed, lazily-driven sequence of events for one connection.
///
/// Dropping it closes the underlying HTTP response.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
