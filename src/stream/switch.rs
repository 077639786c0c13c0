use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Stream returned by [`switch_map`].
pub struct SwitchMap<A, B, F> {
    outer: Option<BoxStream<'static, A>>,
    inner: Option<BoxStream<'static, B>>,
    map: F,
}

impl<A, B, F> Unpin for SwitchMap<A, B, F> {}

/// For each outer value build an inner stream and forward its items,
/// dropping the previous inner stream as soon as a newer outer value arrives.
///
/// Ends when the outer stream and the current inner stream have both ended.
pub fn switch_map<A, B, F>(outer: BoxStream<'static, A>, map: F) -> SwitchMap<A, B, F>
where
    F: FnMut(A) -> BoxStream<'static, B>,
{
    SwitchMap {
        outer: Some(outer),
        inner: None,
        map,
    }
}

impl<A, B, F> Stream for SwitchMap<A, B, F>
where
    F: FnMut(A) -> BoxStream<'static, B>,
{
    type Item = B;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<B>> {
        let this = self.get_mut();

        let mut latest = None;
        let mut outer_done = false;
        if let Some(outer) = this.outer.as_mut() {
            loop {
                match outer.poll_next_unpin(cx) {
                    Poll::Ready(Some(value)) => latest = Some(value),
                    Poll::Ready(None) => {
                        outer_done = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }
        if outer_done {
            this.outer = None;
        }
        if let Some(value) = latest {
            this.inner = Some((this.map)(value));
        }

        let mut inner_done = false;
        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => inner_done = true,
                Poll::Pending => {}
            }
        }
        if inner_done {
            this.inner = None;
        }

        if this.outer.is_none() && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::watch_stream;
    use futures::stream;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_follows_latest_outer_value() {
        let (outer_tx, outer_rx) = watch::channel(1);
        let (inner_tx, inner_rx) = watch::channel(100);

        let mut switched = switch_map(watch_stream(outer_rx), move |n| {
            watch_stream(inner_rx.clone()).map(move |m| n * 1000 + m).boxed()
        });

        assert_eq!(switched.next().await, Some(1100));

        inner_tx.send_replace(101);
        assert_eq!(switched.next().await, Some(1101));

        outer_tx.send_replace(2);
        assert_eq!(switched.next().await, Some(2101));
    }

    #[tokio::test]
    async fn test_previous_inner_is_dropped() {
        let (outer_tx, outer_rx) = watch::channel("first");
        let (first_tx, first_rx) = watch::channel(1);
        let (_second_tx, second_rx) = watch::channel(2);

        let mut switched = switch_map(watch_stream(outer_rx), move |which| match which {
            "first" => watch_stream(first_rx.clone()),
            _ => watch_stream(second_rx.clone()),
        });

        assert_eq!(switched.next().await, Some(1));
        outer_tx.send_replace("second");
        assert_eq!(switched.next().await, Some(2));

        // Updates on the abandoned inner stream never surface
        first_tx.send_replace(10);
        let next = tokio::time::timeout(std::time::Duration::from_millis(20), switched.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_ends_after_outer_and_inner_end() {
        let switched = switch_map(stream::iter(vec![3]).boxed(), |n| {
            stream::iter(0..n).boxed()
        });
        let out: Vec<i32> = switched.collect().await;
        assert_eq!(out, vec![0, 1, 2]);
    }
}
