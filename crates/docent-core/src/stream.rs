//! Flattening of incremental model output into plain text fragments.

use futures::{Stream, StreamExt, TryStreamExt};

use crate::api::StreamChunk;

/// A unit of streamed output that carries zero or more text pieces.
pub trait DeltaUnit {
    fn text_deltas(&self) -> Vec<String>;
}

impl DeltaUnit for StreamChunk {
    fn text_deltas(&self) -> Vec<String> {
        match self {
            StreamChunk::TextDelta(text) => vec![text.clone()],
            _ => Vec::new(),
        }
    }
}

impl DeltaUnit for String {
    fn text_deltas(&self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl DeltaUnit for Vec<String> {
    fn text_deltas(&self) -> Vec<String> {
        self.clone()
    }
}

/// Yield every text piece of every unit, in arrival order.
///
/// Only the current unit is held. An error is passed through and ends the
/// stream.
pub fn flatten_text_deltas<S, U, E>(units: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<U, E>>,
    U: DeltaUnit,
{
    async_stream::stream! {
        let mut units = std::pin::pin!(units);
        while let Some(unit) = units.next().await {
            match unit {
                Ok(unit) => {
                    for piece in unit.text_deltas() {
                        yield Ok(piece);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}

/// Concatenate a fragment stream, stopping at the first error.
pub async fn collect_text<S, E>(fragments: S) -> Result<String, E>
where
    S: Stream<Item = Result<String, E>>,
{
    fragments
        .try_fold(String::new(), |mut text, piece| async move {
            text.push_str(&piece);
            Ok(text)
        })
        .await
}
