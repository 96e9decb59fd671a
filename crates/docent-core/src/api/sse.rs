use eventsource_stream::Eventsource;
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio_util::bytes::Bytes;

use crate::api::error::StreamError;

/// One server-sent event. Only the payload matters for chat completions.
///
/// Events without an `event:` line carry the default type `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, StreamError>> + Send>>;

pub fn parse_sse_stream<S, E>(byte_stream: S) -> SseStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    let events = byte_stream
        .map(|chunk| chunk.map_err(|e| std::io::Error::other(e.to_string())))
        .eventsource()
        .map(|event| {
            event
                .map(|event| SseEvent {
                    event_type: event.event,
                    data: event.data,
                })
                .map_err(|e| StreamError::SseParse(e.to_string()))
        });

    Box::pin(events)
}
