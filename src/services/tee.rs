//! Stream tee for simultaneous client delivery and cache population.
//!
//! Wraps a byte stream and copies each chunk into a bounded channel while
//! passing the original through untouched. The copy is best-effort: if the
//! cache writer falls behind and the channel fills, the sender is dropped so
//! the writer sees a closed channel and discards its partial entry — the
//! client-facing stream is never stalled by the slow consumer.
//!
//! The split happens before either consumer reads, so the two sides cannot
//! disturb each other's read position.

use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A stream that tees data chunks to a channel while passing them through.
pub struct TeeStream<S> {
    inner: S,
    sender: Option<mpsc::Sender<Bytes>>,
}

impl<S> TeeStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    pub fn new(inner: S, sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            inner,
            sender: Some(sender),
        }
    }
}

impl<S> Stream for TeeStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                if let Some(sender) = this.sender.take() {
                    match sender.try_send(bytes.clone()) {
                        Ok(()) => this.sender = Some(sender),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Closing the channel makes the writer discard the
                            // incomplete copy instead of caching a gap.
                            warn!("cache channel full, abandoning cache copy");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!("cache channel closed, stopping tee");
                        }
                    }
                }
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(err))) => {
                // Upstream failed mid-body; the cache copy is unusable.
                this.sender = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.sender = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};

    #[tokio::test]
    async fn both_consumers_observe_identical_chunks() {
        let (tx, mut rx) = mpsc::channel(10);
        let data = vec![
            Ok(Bytes::from_static(b"hello")),
            Ok(Bytes::from_static(b"world")),
        ];
        let mut tee = TeeStream::new(stream::iter(data), tx);

        let mut passed = Vec::new();
        while let Some(Ok(chunk)) = tee.next().await {
            passed.push(chunk);
        }
        assert_eq!(passed, vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")]);

        drop(tee);
        let mut teed = Vec::new();
        while let Some(chunk) = rx.recv().await {
            teed.push(chunk);
        }
        assert_eq!(teed, passed);
    }

    #[tokio::test]
    async fn full_channel_abandons_the_copy_but_not_the_client() {
        let (tx, rx) = mpsc::channel(1);
        let data = vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
            Ok(Bytes::from_static(b"c")),
        ];
        let mut tee = TeeStream::new(stream::iter(data), tx);

        // Nobody drains the channel, so the second chunk overflows it.
        let mut passed = Vec::new();
        while let Some(Ok(chunk)) = tee.next().await {
            passed.push(chunk);
        }
        assert_eq!(passed.len(), 3);

        drop(rx);
    }

    #[tokio::test]
    async fn upstream_error_closes_the_copy_channel() {
        let (tx, mut rx) = mpsc::channel(10);
        let data: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"a")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "boom")),
        ];
        let mut tee = TeeStream::new(stream::iter(data), tx);

        assert!(tee.next().await.unwrap().is_ok());
        assert!(tee.next().await.unwrap().is_err());

        // First chunk arrived, then the channel closed.
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"a")));
        assert_eq!(rx.recv().await, None);
    }
}
