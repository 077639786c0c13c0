use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Stream returned by [`combine_latest`].
pub struct CombineLatest<A, B, F> {
    left: Option<BoxStream<'static, A>>,
    right: Option<BoxStream<'static, B>>,
    latest_left: Option<A>,
    latest_right: Option<B>,
    combine: F,
}

// Values are only ever moved in and borrowed out, never pinned.
impl<A, B, F> Unpin for CombineLatest<A, B, F> {}

/// Emit `combine(a, b)` whenever either input emits, using the newest value of each.
///
/// Nothing is emitted until both inputs have produced a value. Values that
/// arrive together between two polls collapse into one output. The stream
/// ends once both inputs have ended, or as soon as one input ends without
/// ever producing a value.
pub fn combine_latest<A, B, C, F>(
    left: BoxStream<'static, A>,
    right: BoxStream<'static, B>,
    combine: F,
) -> CombineLatest<A, B, F>
where
    F: FnMut(&A, &B) -> C,
{
    CombineLatest {
        left: Some(left),
        right: Some(right),
        latest_left: None,
        latest_right: None,
        combine,
    }
}

/// Poll `stream` until it is pending, keeping only its last item.
///
/// Returns whether a new item arrived; clears `stream` when it ends.
fn drain_latest<T>(
    stream: &mut Option<BoxStream<'static, T>>,
    latest: &mut Option<T>,
    cx: &mut Context<'_>,
) -> bool {
    let mut updated = false;
    let mut ended = false;
    if let Some(inner) = stream.as_mut() {
        loop {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(value)) => {
                    *latest = Some(value);
                    updated = true;
                }
                Poll::Ready(None) => {
                    ended = true;
                    break;
                }
                Poll::Pending => break,
            }
        }
    }
    if ended {
        *stream = None;
    }
    updated
}

impl<A, B, C, F> Stream for CombineLatest<A, B, F>
where
    F: FnMut(&A, &B) -> C,
{
    type Item = C;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<C>> {
        let this = self.get_mut();

        let left_updated = drain_latest(&mut this.left, &mut this.latest_left, cx);
        let right_updated = drain_latest(&mut this.right, &mut this.latest_right, cx);

        if left_updated || right_updated {
            if let (Some(a), Some(b)) = (&this.latest_left, &this.latest_right) {
                return Poll::Ready(Some((this.combine)(a, b)));
            }
        }

        let left_dead = this.left.is_none() && (this.right.is_none() || this.latest_left.is_none());
        let right_dead = this.right.is_none() && (this.left.is_none() || this.latest_right.is_none());
        if left_dead || right_dead {
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::watch_stream;
    use futures::stream;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_waits_for_both_inputs() {
        let (left_tx, left_rx) = watch::channel(None::<i32>);
        let left = watch_stream(left_rx).filter_map(|v| async move { v }).boxed();
        let right = stream::iter(vec!["x"]).chain(stream::pending()).boxed();

        let mut combined = combine_latest(left, right, |a, b| format!("{a}{b}"));

        let first = tokio::time::timeout(std::time::Duration::from_millis(20), combined.next()).await;
        assert!(first.is_err(), "emitted before left produced a value");

        left_tx.send_replace(Some(1));
        assert_eq!(combined.next().await, Some("1x".to_string()));
    }

    #[tokio::test]
    async fn test_recomputes_on_either_side() {
        let (left_tx, left_rx) = watch::channel(1);
        let (right_tx, right_rx) = watch::channel(10);
        let mut combined =
            combine_latest(watch_stream(left_rx), watch_stream(right_rx), |a, b| a + b);

        assert_eq!(combined.next().await, Some(11));

        left_tx.send_replace(2);
        assert_eq!(combined.next().await, Some(12));

        right_tx.send_replace(20);
        assert_eq!(combined.next().await, Some(22));
    }

    #[tokio::test]
    async fn test_ends_when_both_inputs_end() {
        let left = stream::iter(vec![1, 2]).boxed();
        let right = stream::iter(vec![10]).boxed();
        let out: Vec<i32> = combine_latest(left, right, |a, b| a + b).collect().await;

        // Both inputs are ready on the first poll, so only the latest pair is seen
        assert_eq!(out, vec![12]);
    }

    #[tokio::test]
    async fn test_ends_when_one_side_is_empty() {
        let left = stream::empty::<i32>().boxed();
        let right = stream::iter(vec![1]).chain(stream::pending()).boxed();
        let out: Vec<i32> = combine_latest(left, right, |a, b| a + b).collect().await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_keeps_running_after_one_side_ends_with_value() {
        let left = stream::iter(vec![1]).boxed();
        let (right_tx, right_rx) = watch::channel(10);
        let mut combined = combine_latest(left, watch_stream(right_rx), |a, b| a + b);

        assert_eq!(combined.next().await, Some(11));
        right_tx.send_replace(20);
        assert_eq!(combined.next().await, Some(21));
    }
}
