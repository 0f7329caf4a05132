//! Producer Loop Helpers
//!
//! Both transports run a producer task that reads from the HTTP body and
//! pushes frames into a channel. Cancellation is checked between every read
//! and every read is bounded by the idle timeout.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::traits::FrameResult;

/// Outcome of one bounded read
pub(crate) enum Read<T> {
    /// The stream produced an item
    Item(T),
    /// The server closed the stream
    Ended,
    /// Cancellation was signalled
    Cancelled,
    /// Nothing arrived within the idle timeout
    TimedOut,
}

/// Read the next item unless cancelled or idle for too long
pub(crate) async fn read_next<S>(
    stream: &mut S,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> Read<S::Item>
where
    S: Stream + Unpin,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Read::Cancelled,
        next = tokio::time::timeout(idle_timeout, stream.next()) => match next {
            Ok(Some(item)) => Read::Item(item),
            Ok(None) => Read::Ended,
            Err(_) => Read::TimedOut,
        },
    }
}

/// Push a frame to the consumer
///
/// Returns `false` when the consumer is gone or the stream was cancelled,
/// in which case the producer should stop.
pub(crate) async fn forward(
    tx: &mpsc::Sender<FrameResult>,
    cancel: &CancellationToken,
    frame: FrameResult,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(frame) => sent.is_ok(),
    }
}
