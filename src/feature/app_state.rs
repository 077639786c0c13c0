use futures::stream::{BoxStream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::scope::ScreenScope;
use crate::stream::{watch_stream, SharedStream, Subscription};
use crate::timezone::{TimeZoneId, TimeZoneMonitor};

pub const NOT_CONNECTED_MESSAGE: &str = "You aren't connected to the internet";

/// Reports connectivity.
pub trait NetworkMonitor: Send + Sync + 'static {
    /// The current connectivity immediately, then each change.
    fn is_online(&self) -> BoxStream<'static, bool>;
}

/// Connectivity set by hand.
#[derive(Debug)]
pub struct ManualNetworkMonitor {
    online: watch::Sender<bool>,
}

impl ManualNetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self { online }
    }

    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }
}

impl NetworkMonitor for ManualNetworkMonitor {
    fn is_online(&self) -> BoxStream<'static, bool> {
        watch_stream(self.online.subscribe())
    }
}

/// App-wide state shared by every screen.
pub struct AppState {
    offline: SharedStream<bool>,
    time_zone: SharedStream<TimeZoneId>,
    scope: ScreenScope,
}

impl AppState {
    pub fn new(
        network: Arc<dyn NetworkMonitor>,
        time_zones: TimeZoneMonitor,
        system_default: TimeZoneId,
        grace: Duration,
    ) -> Self {
        let offline = SharedStream::with_initial("is_offline", grace, false, move || {
            network.is_online().map(|online| !online).boxed()
        });
        let time_zone = SharedStream::with_initial("current_time_zone", grace, system_default, move || {
            time_zones.current_time_zone().boxed()
        });

        let scope = ScreenScope::new("app");
        {
            let offline = offline.clone();
            scope.on_close(move || offline.shutdown());
        }
        {
            let time_zone = time_zone.clone();
            scope.on_close(move || time_zone.shutdown());
        }

        Self {
            offline,
            time_zone,
            scope,
        }
    }

    pub fn is_offline(&self) -> Subscription<bool> {
        self.offline.subscribe()
    }

    pub fn current_time_zone(&self) -> Subscription<TimeZoneId> {
        self.time_zone.subscribe()
    }

    pub fn scope(&self) -> &ScreenScope {
        &self.scope
    }

    /// Show a persistent notice whenever the device is offline.
    ///
    /// `on_show_snackbar` is called with the message each time connectivity
    /// is lost; its future is dropped, dismissing the notice, as soon as the
    /// device is back online. Runs until the offline stream ends.
    pub async fn show_offline_notices<F, Fut>(&self, mut on_show_snackbar: F)
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut offline = self.is_offline();
        let mut current = offline.next().await;

        while let Some(is_offline) = current {
            if !is_offline {
                current = offline.next().await;
                continue;
            }

            let notice = on_show_snackbar(NOT_CONNECTED_MESSAGE.to_string());
            tokio::select! {
                next = offline.next() => current = next,
                _ = notice => current = offline.next().await,
            }
        }
    }

    pub fn close(&self) {
        self.scope.close();
    }
}
