use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use super::zone::TimeZoneId;

/// A notification delivered to a registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemNotice {
    /// The system time zone changed; the new id is attached when known.
    TimeZoneChanged { zone_id: Option<String> },
    /// Any other notice sharing the channel. Ignored by the monitor.
    Other(String),
}

/// Where the system time zone and its change notifications come from.
pub trait TimeZoneSource: Send + Sync + 'static {
    /// The zone the system currently reports.
    fn system_default(&self) -> TimeZoneId;

    /// Start delivering notices. Dropping the receiver unregisters.
    fn register(&self) -> mpsc::Receiver<SystemNotice>;
}

const NOTICE_BUFFER: usize = 8;

// ============================================================================
// SystemTimeZoneSource
// ============================================================================

/// Reads the host's time zone and detects changes by polling.
///
/// Lookup order: the `TZ` environment variable, `/etc/timezone`, then the
/// target of the `/etc/localtime` symlink. Falls back to UTC.
///
/// Lookups touch the filesystem and run on the blocking pool;
/// [`TimeZoneSource::system_default`] returns the most recent result.
#[derive(Debug, Clone)]
pub struct SystemTimeZoneSource {
    poll_interval: Duration,
    paths: Arc<HostPaths>,
    current: Arc<Mutex<TimeZoneId>>,
}

#[derive(Debug)]
struct HostPaths {
    timezone_file: PathBuf,
    localtime_link: PathBuf,
}

impl SystemTimeZoneSource {
    /// Detect the current zone and poll for changes every `poll_interval`
    /// while registered.
    pub async fn new(poll_interval: Duration) -> Self {
        let source = Self {
            poll_interval,
            paths: Arc::new(HostPaths {
                timezone_file: PathBuf::from("/etc/timezone"),
                localtime_link: PathBuf::from("/etc/localtime"),
            }),
            current: Arc::new(Mutex::new(TimeZoneId::utc())),
        };
        source.refresh().await;
        source
    }

    /// Look the zone up again and cache it.
    async fn refresh(&self) -> TimeZoneId {
        let paths = Arc::clone(&self.paths);
        let zone = match tokio::task::spawn_blocking(move || detect(&paths)).await {
            Ok(zone) => zone.unwrap_or_else(TimeZoneId::utc),
            Err(e) => {
                tracing::warn!(error = %e, "Time zone lookup failed, keeping previous zone");
                return self.system_default();
            }
        };
        *lock(&self.current) = zone.clone();
        zone
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Blocking lookup of the host's zone.
fn detect(paths: &HostPaths) -> Option<TimeZoneId> {
    from_env(std::env::var("TZ").ok().as_deref())
        .or_else(|| from_timezone_file(&paths.timezone_file))
        .or_else(|| from_localtime_link(&paths.localtime_link))
}

impl TimeZoneSource for SystemTimeZoneSource {
    fn system_default(&self) -> TimeZoneId {
        lock(&self.current).clone()
    }

    fn register(&self) -> mpsc::Receiver<SystemNotice> {
        let (tx, rx) = mpsc::channel(NOTICE_BUFFER);
        let source = self.clone();

        tokio::spawn(async move {
            let mut last = source.system_default();
            let mut ticker = tokio::time::interval(source.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        let current = source.refresh().await;
                        if current == last {
                            continue;
                        }
                        tracing::debug!(from = %last, to = %current, "System time zone changed");
                        last = current.clone();
                        let notice = SystemNotice::TimeZoneChanged {
                            zone_id: Some(current.to_string()),
                        };
                        if tx.send(notice).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Time zone polling stopped");
        });

        rx
    }
}

fn from_env(value: Option<&str>) -> Option<TimeZoneId> {
    // POSIX allows a leading ':' meaning "implementation-defined"
    let value = value?.trim().trim_start_matches(':');
    let value = value.strip_prefix("posix/").unwrap_or(value);
    TimeZoneId::parse(value).ok()
}

fn from_timezone_file(path: &Path) -> Option<TimeZoneId> {
    let content = std::fs::read_to_string(path).ok()?;
    TimeZoneId::parse(content.lines().next()?).ok()
}

fn from_localtime_link(path: &Path) -> Option<TimeZoneId> {
    let target = std::fs::read_link(path).ok()?;
    let target = target.to_string_lossy();
    let (_, zone) = target.split_once("zoneinfo/")?;
    TimeZoneId::parse(zone).ok()
}
