//! Keep-latest stream building blocks.
//!
//! Everything here is push-based and lossy in the same direction: a slow
//! consumer sees the most recent value, never a backlog.
//!
//! - [`combine_latest`]: recompute from the newest value of each input
//! - [`switch_map`]: follow only the stream derived from the newest outer value
//! - [`distinct_until_changed`]: drop consecutive duplicates
//! - [`SharedStream`]: one upstream for many observers, started lazily and
//!   stopped after a grace period once the last observer leaves

mod combine;
mod shared;
mod switch;

use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub use combine::{combine_latest, CombineLatest};
pub use shared::{SharedStream, Subscription};
pub use switch::{switch_map, SwitchMap};

/// Stream of a watch channel's value: the current value first, then each change.
pub fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    WatchStream::new(rx).boxed()
}

/// Drop items equal to the item emitted just before them.
pub fn distinct_until_changed<T>(stream: BoxStream<'static, T>) -> BoxStream<'static, T>
where
    T: Clone + PartialEq + Send + 'static,
{
    let mut last: Option<T> = None;
    stream
        .filter(move |item| {
            let changed = last.as_ref() != Some(item);
            if changed {
                last = Some(item.clone());
            }
            future::ready(changed)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_distinct_until_changed_only_drops_consecutive() {
        let items = stream::iter(vec![1, 1, 2, 2, 2, 1, 3, 3]).boxed();
        let out: Vec<i32> = distinct_until_changed(items).collect().await;
        assert_eq!(out, vec![1, 2, 1, 3]);
    }

    #[tokio::test]
    async fn test_watch_stream_replays_current_value() {
        let (tx, rx) = watch::channel("a");
        let mut values = watch_stream(rx);

        assert_eq!(values.next().await, Some("a"));
        tx.send_replace("b");
        assert_eq!(values.next().await, Some("b"));

        drop(tx);
        assert_eq!(values.next().await, None);
    }

    #[tokio::test]
    async fn test_watch_stream_keeps_only_latest() {
        let (tx, rx) = watch::channel(0);
        let mut values = watch_stream(rx);
        assert_eq!(values.next().await, Some(0));

        for i in 1..=5 {
            tx.send_replace(i);
        }
        assert_eq!(values.next().await, Some(5));
    }
}
