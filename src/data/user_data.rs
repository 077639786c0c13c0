//! Preference-backed user data and the repository that wraps it with analytics.
//!
//! Every piece of user data is its own row in `user_preferences`, so each
//! mutation touches exactly one key (or one key prefix) and concurrent
//! writers never overwrite each other's unrelated changes.
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::model::{DarkThemeConfig, ThemeBrand, UserData};
use crate::analytics::{AnalyticsEvent, AnalyticsHelper};
use crate::storage::{Database, DatabaseError};
use crate::stream::watch_stream;

// ============================================================================
// Preference Keys
// ============================================================================

const FOLLOWED_TOPIC_PREFIX: &str = "followed_topic.";
const BOOKMARK_PREFIX: &str = "bookmark.";
const VIEWED_PREFIX: &str = "viewed.";

const THEME_BRAND_KEY: &str = "theme.brand";
const DARK_THEME_CONFIG_KEY: &str = "theme.dark_config";
const DYNAMIC_COLOR_KEY: &str = "theme.dynamic_color";
const HIDE_ONBOARDING_KEY: &str = "onboarding.hidden";

const TOPIC_VERSION_KEY: &str = "sync.topic_version";
const CONTENT_VERSION_KEY: &str = "sync.content_version";

/// Last change-list versions applied by the synchronizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeListVersions {
    pub topic_version: i64,
    pub content_version: i64,
}

// ============================================================================
// PreferenceStore
// ============================================================================

/// Persistent user data with a replaying change stream.
///
/// Writes are serialized: each one commits to the database, then applies
/// the same change to the in-memory snapshot and publishes it before the
/// next write starts. A committed write is always published.
pub struct PreferenceStore {
    db: Database,
    state: watch::Sender<UserData>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("current", &*self.state.borrow())
            .finish()
    }
}

impl PreferenceStore {
    pub async fn open(db: Database) -> Result<Self, DatabaseError> {
        let initial = load_user_data(&db).await?;
        let (state, _) = watch::channel(initial);
        Ok(Self {
            db,
            state,
            write_lock: Mutex::new(()),
        })
    }

    /// The current snapshot first, then every committed change.
    pub fn user_data(&self) -> BoxStream<'static, UserData> {
        watch_stream(self.state.subscribe())
    }

    pub fn current(&self) -> UserData {
        self.state.borrow().clone()
    }

    pub async fn set_followed_topic_ids(&self, ids: &BTreeSet<String>) -> Result<(), DatabaseError> {
        let entries: Vec<(String, String)> = ids
            .iter()
            .map(|id| (format!("{FOLLOWED_TOPIC_PREFIX}{id}"), "true".to_string()))
            .collect();

        let _guard = self.write_lock.lock().await;
        self.db
            .replace_preferences_with_prefix(FOLLOWED_TOPIC_PREFIX, &entries)
            .await?;
        self.publish(|data| replace(&mut data.followed_topics, ids.clone()));
        Ok(())
    }

    pub async fn set_topic_id_followed(&self, id: &str, followed: bool) -> Result<(), DatabaseError> {
        self.set_member(FOLLOWED_TOPIC_PREFIX, id, followed, |data| &mut data.followed_topics)
            .await
    }

    pub async fn set_content_bookmarked(&self, id: &str, bookmarked: bool) -> Result<(), DatabaseError> {
        self.set_member(BOOKMARK_PREFIX, id, bookmarked, |data| &mut data.bookmarked_content)
            .await
    }

    pub async fn set_content_viewed(&self, id: &str, viewed: bool) -> Result<(), DatabaseError> {
        self.set_member(VIEWED_PREFIX, id, viewed, |data| &mut data.viewed_content)
            .await
    }

    pub async fn set_theme_brand(&self, brand: ThemeBrand) -> Result<(), DatabaseError> {
        self.set_value(THEME_BRAND_KEY, brand.as_str(), |data| {
            replace(&mut data.theme_brand, brand)
        })
        .await
    }

    pub async fn set_dark_theme_config(&self, config: DarkThemeConfig) -> Result<(), DatabaseError> {
        self.set_value(DARK_THEME_CONFIG_KEY, config.as_str(), |data| {
            replace(&mut data.dark_theme_config, config)
        })
        .await
    }

    pub async fn set_dynamic_color_preference(&self, enabled: bool) -> Result<(), DatabaseError> {
        self.set_value(DYNAMIC_COLOR_KEY, bool_str(enabled), |data| {
            replace(&mut data.use_dynamic_color, enabled)
        })
        .await
    }

    pub async fn set_should_hide_onboarding(&self, hidden: bool) -> Result<(), DatabaseError> {
        self.set_value(HIDE_ONBOARDING_KEY, bool_str(hidden), |data| {
            replace(&mut data.should_hide_onboarding, hidden)
        })
        .await
    }

    pub async fn change_list_versions(&self) -> Result<ChangeListVersions, DatabaseError> {
        Ok(ChangeListVersions {
            topic_version: read_version(&self.db, TOPIC_VERSION_KEY).await?,
            content_version: read_version(&self.db, CONTENT_VERSION_KEY).await?,
        })
    }

    pub async fn set_change_list_versions(
        &self,
        versions: ChangeListVersions,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.db
            .set_preference(TOPIC_VERSION_KEY, &versions.topic_version.to_string())
            .await?;
        self.db
            .set_preference(CONTENT_VERSION_KEY, &versions.content_version.to_string())
            .await
    }

    /// Add or remove `id` from the set stored under `prefix`, mirrored by `set`.
    async fn set_member(
        &self,
        prefix: &str,
        id: &str,
        member: bool,
        set: fn(&mut UserData) -> &mut BTreeSet<String>,
    ) -> Result<(), DatabaseError> {
        let key = format!("{prefix}{id}");
        let _guard = self.write_lock.lock().await;
        if member {
            self.db.set_preference(&key, "true").await?;
        } else {
            self.db.delete_preference(&key).await?;
        }
        self.publish(|data| {
            let set = set(data);
            if member {
                set.insert(id.to_string())
            } else {
                set.remove(id)
            }
        });
        Ok(())
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        apply: impl FnOnce(&mut UserData) -> bool,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.db.set_preference(key, value).await?;
        self.publish(apply);
        Ok(())
    }

    /// Apply a committed change to the snapshot; publish if it changed anything.
    /// Callers hold `write_lock`.
    fn publish(&self, apply: impl FnOnce(&mut UserData) -> bool) {
        self.state.send_if_modified(apply);
    }
}

/// Store `value` in `slot`, reporting whether it differed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn parse_bool(key: &str, value: &str) -> bool {
    match value {
        "true" => true,
        "false" => false,
        other => {
            tracing::warn!(key = %key, value = %other, "Invalid boolean preference, using default");
            false
        }
    }
}

async fn read_version(db: &Database, key: &str) -> Result<i64, DatabaseError> {
    let Some(raw) = db.get_preference(key).await? else {
        return Ok(0);
    };
    Ok(raw.parse().unwrap_or_else(|_| {
        tracing::warn!(key = %key, value = %raw, "Invalid change-list version, resetting to 0");
        0
    }))
}

async fn load_user_data(db: &Database) -> Result<UserData, DatabaseError> {
    let mut data = UserData::default();

    for (key, value) in db.get_preferences_by_prefix("").await? {
        if let Some(id) = key.strip_prefix(FOLLOWED_TOPIC_PREFIX) {
            data.followed_topics.insert(id.to_string());
        } else if let Some(id) = key.strip_prefix(BOOKMARK_PREFIX) {
            data.bookmarked_content.insert(id.to_string());
        } else if let Some(id) = key.strip_prefix(VIEWED_PREFIX) {
            data.viewed_content.insert(id.to_string());
        } else {
            match key.as_str() {
                THEME_BRAND_KEY => match value.parse() {
                    Ok(brand) => data.theme_brand = brand,
                    Err(e) => tracing::warn!(error = %e, "Invalid theme brand, using default"),
                },
                DARK_THEME_CONFIG_KEY => match value.parse() {
                    Ok(config) => data.dark_theme_config = config,
                    Err(e) => tracing::warn!(error = %e, "Invalid dark theme config, using default"),
                },
                DYNAMIC_COLOR_KEY => data.use_dynamic_color = parse_bool(&key, &value),
                HIDE_ONBOARDING_KEY => data.should_hide_onboarding = parse_bool(&key, &value),
                _ => {}
            }
        }
    }

    Ok(data)
}

// ============================================================================
// UserDataRepository
// ============================================================================

/// User data mutations with analytics.
///
/// An event is logged only after the underlying write succeeded.
#[derive(Clone)]
pub struct UserDataRepository {
    store: Arc<PreferenceStore>,
    analytics: Arc<dyn AnalyticsHelper>,
}

impl std::fmt::Debug for UserDataRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataRepository")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl UserDataRepository {
    pub fn new(store: Arc<PreferenceStore>, analytics: Arc<dyn AnalyticsHelper>) -> Self {
        Self { store, analytics }
    }

    pub fn user_data(&self) -> BoxStream<'static, UserData> {
        self.store.user_data()
    }

    pub fn current(&self) -> UserData {
        self.store.current()
    }

    pub fn store(&self) -> &Arc<PreferenceStore> {
        &self.store
    }

    pub async fn set_followed_topic_ids(&self, ids: &BTreeSet<String>) -> Result<(), DatabaseError> {
        self.store.set_followed_topic_ids(ids).await
    }

    pub async fn set_topic_id_followed(&self, id: &str, followed: bool) -> Result<(), DatabaseError> {
        self.store.set_topic_id_followed(id, followed).await?;
        self.analytics
            .log_event(AnalyticsEvent::topic_follow_toggled(id, followed));
        Ok(())
    }

    pub async fn set_content_bookmarked(&self, id: &str, bookmarked: bool) -> Result<(), DatabaseError> {
        self.store.set_content_bookmarked(id, bookmarked).await?;
        self.analytics
            .log_event(AnalyticsEvent::bookmark_toggled(id, bookmarked));
        Ok(())
    }

    pub async fn set_content_viewed(&self, id: &str, viewed: bool) -> Result<(), DatabaseError> {
        self.store.set_content_viewed(id, viewed).await
    }

    pub async fn set_theme_brand(&self, brand: ThemeBrand) -> Result<(), DatabaseError> {
        self.store.set_theme_brand(brand).await?;
        self.analytics
            .log_event(AnalyticsEvent::theme_changed(brand.as_str()));
        Ok(())
    }

    pub async fn set_dark_theme_config(&self, config: DarkThemeConfig) -> Result<(), DatabaseError> {
        self.store.set_dark_theme_config(config).await?;
        self.analytics
            .log_event(AnalyticsEvent::dark_theme_config_changed(config.as_str()));
        Ok(())
    }

    pub async fn set_dynamic_color_preference(&self, enabled: bool) -> Result<(), DatabaseError> {
        self.store.set_dynamic_color_preference(enabled).await?;
        self.analytics
            .log_event(AnalyticsEvent::dynamic_color_preference_changed(enabled));
        Ok(())
    }

    pub async fn set_should_hide_onboarding(&self, hidden: bool) -> Result<(), DatabaseError> {
        self.store.set_should_hide_onboarding(hidden).await?;
        self.analytics
            .log_event(AnalyticsEvent::onboarding_state_changed(hidden));
        Ok(())
    }
}
