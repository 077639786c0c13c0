//! Current system time zone as a shared, deduplicated stream.

mod source;
mod zone;

pub use source::{SystemNotice, SystemTimeZoneSource, TimeZoneSource};
pub use zone::{TimeZoneError, TimeZoneId};

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::stream::{distinct_until_changed, SharedStream, Subscription};

/// Publishes the system time zone to any number of observers.
///
/// All observers share one registration with the [`TimeZoneSource`]. It is
/// made when the first observer subscribes and dropped once observers have
/// been gone for the grace period; the last zone seen is kept for the next
/// observer.
#[derive(Debug, Clone)]
pub struct TimeZoneMonitor {
    shared: SharedStream<TimeZoneId>,
}

impl TimeZoneMonitor {
    pub fn new(source: Arc<dyn TimeZoneSource>, grace: Duration) -> Self {
        let shared = SharedStream::new("time_zone", grace, move || {
            distinct_until_changed(time_zone_changes(Arc::clone(&source)))
        });
        Self { shared }
    }

    /// The current zone immediately, then each change.
    pub fn current_time_zone(&self) -> Subscription<TimeZoneId> {
        self.shared.subscribe()
    }

    /// The last zone published, if the monitor has ever been active.
    pub fn latest(&self) -> Option<TimeZoneId> {
        self.shared.value()
    }
}

enum Phase {
    Start,
    Register,
    Listening(mpsc::Receiver<SystemNotice>),
}

/// Cold stream: the default zone, a registration, the default again (a
/// change can slip in while registering), then one zone per change notice.
fn time_zone_changes(source: Arc<dyn TimeZoneSource>) -> BoxStream<'static, TimeZoneId> {
    stream::unfold((source, Phase::Start), |(source, phase)| async move {
        match phase {
            Phase::Start => {
                let zone = source.system_default();
                Some((zone, (source, Phase::Register)))
            }
            Phase::Register => {
                let notices = source.register();
                tracing::debug!("Registered for time zone changes");
                let zone = source.system_default();
                Some((zone, (source, Phase::Listening(notices))))
            }
            Phase::Listening(mut notices) => loop {
                match notices.recv().await? {
                    SystemNotice::TimeZoneChanged { zone_id } => {
                        let zone = zone_id
                            .and_then(|id| match TimeZoneId::parse_with_short_ids(&id) {
                                Ok(zone) => Some(zone),
                                Err(e) => {
                                    tracing::warn!(error = %e, "Ignoring invalid zone in notice");
                                    None
                                }
                            })
                            .unwrap_or_else(|| source.system_default());
                        return Some((zone, (source, Phase::Listening(notices))));
                    }
                    SystemNotice::Other(kind) => {
                        tracing::trace!(notice = %kind, "Ignoring unrelated notice");
                    }
                }
            },
        }
    })
    .boxed()
}
