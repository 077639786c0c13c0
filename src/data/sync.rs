//! Applies change sets to the local cache.
//!
//! A change set carries topic and content updates, deletions, and the
//! change-list versions it brings the cache up to. Each half (topics,
//! content) is applied only when its version is newer than the one last
//! recorded, so replaying an old change set is a no-op.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::user_data::{ChangeListVersions, PreferenceStore};
use crate::storage::{ContentTopicLink, Database, DatabaseError, NewContentItem, Topic};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to read change set: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid change set: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Change set too large: {0}")]
    TooLarge(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ============================================================================
// Change Set
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChangeSet {
    pub topic_version: i64,
    pub content_version: i64,
    pub topics: Vec<Topic>,
    pub content: Vec<ChangeSetContent>,
    pub deleted_topic_ids: Vec<String>,
    pub deleted_content_ids: Vec<String>,
}

/// A content item as it arrives in a change set: dated, with topic ids.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeSetContent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub header_image_url: Option<String>,
    pub publish_date: DateTime<Utc>,
    #[serde(default, rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl ChangeSetContent {
    fn to_new_item(&self) -> NewContentItem {
        NewContentItem {
            id: self.id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            url: self.url.clone(),
            header_image_url: self.header_image_url.clone(),
            publish_date: self.publish_date.timestamp(),
            content_type: self.content_type.clone(),
        }
    }
}

impl ChangeSet {
    /// Maximum change set file size (16 MB).
    const MAX_FILE_SIZE: u64 = 16 * 1_048_576;

    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a change set from a JSON file, refusing oversized files.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let len = std::fs::metadata(path)?.len();
        if len > Self::MAX_FILE_SIZE {
            return Err(SyncError::TooLarge(format!(
                "{} is {} bytes (max {} bytes)",
                path.display(),
                len,
                Self::MAX_FILE_SIZE
            )));
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

/// What one [`Synchronizer::apply`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub topics_upserted: usize,
    pub topics_deleted: u64,
    pub content_upserted: usize,
    pub content_deleted: u64,
    pub links_added: u64,
    pub links_skipped: usize,
    pub topics_stale: bool,
    pub content_stale: bool,
    pub indexed_entities: i64,
}

#[derive(Debug, Clone)]
pub struct Synchronizer {
    db: Database,
    preferences: Arc<PreferenceStore>,
}

impl Synchronizer {
    pub fn new(db: Database, preferences: Arc<PreferenceStore>) -> Self {
        Self { db, preferences }
    }

    pub async fn apply(&self, change_set: &ChangeSet) -> Result<SyncReport, SyncError> {
        let current = self.preferences.change_list_versions().await?;
        let mut report = SyncReport {
            topics_stale: change_set.topic_version <= current.topic_version,
            content_stale: change_set.content_version <= current.content_version,
            ..SyncReport::default()
        };

        if !report.topics_stale {
            report.topics_upserted = self.db.upsert_topics(&change_set.topics).await?;
            report.topics_deleted = self.db.delete_topics(&change_set.deleted_topic_ids).await?;
        }

        if !report.content_stale {
            let items: Vec<NewContentItem> =
                change_set.content.iter().map(ChangeSetContent::to_new_item).collect();
            report.content_upserted = self.db.upsert_content(&items).await?;

            // Links to topics the cache has never seen would violate the foreign key
            let known: HashSet<String> = self.db.get_topic_ids().await?.into_iter().collect();
            let mut links = Vec::new();
            for item in &change_set.content {
                for topic_id in &item.topics {
                    if known.contains(topic_id) {
                        links.push(ContentTopicLink {
                            content_id: item.id.clone(),
                            topic_id: topic_id.clone(),
                        });
                    } else {
                        tracing::warn!(content = %item.id, topic = %topic_id, "Skipping link to unknown topic");
                        report.links_skipped += 1;
                    }
                }
            }
            report.links_added = self.db.insert_or_ignore_topic_links(&links).await?;
            report.content_deleted = self.db.delete_content(&change_set.deleted_content_ids).await?;
        }

        if report.topics_stale && report.content_stale {
            tracing::info!(
                topic_version = change_set.topic_version,
                content_version = change_set.content_version,
                "Change set already applied, nothing to do"
            );
            report.indexed_entities = self.db.get_search_index_count().await?;
            return Ok(report);
        }

        report.indexed_entities = self.db.populate_search_index().await?;
        self.preferences
            .set_change_list_versions(ChangeListVersions {
                topic_version: current.topic_version.max(change_set.topic_version),
                content_version: current.content_version.max(change_set.content_version),
            })
            .await?;

        tracing::info!(
            topics = report.topics_upserted,
            content = report.content_upserted,
            deleted = report.content_deleted,
            indexed = report.indexed_entities,
            "Sync applied"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ContentQuery;
    use pretty_assertions::assert_eq;

    const CHANGE_SET: &str = r#"{
        "topic_version": 1,
        "content_version": 1,
        "topics": [
            { "id": "t1", "name": "Compose", "short_description": "UI toolkit" },
            { "id": "t2", "name": "Kotlin" }
        ],
        "content": [
            {
                "id": "a",
                "title": "Compose 1.6",
                "publish_date": "2024-01-02T00:00:00Z",
                "type": "Article",
                "topics": ["t1", "t9"]
            },
            {
                "id": "b",
                "title": "Kotlin 2.0",
                "publish_date": "2024-01-01T00:00:00Z",
                "topics": ["t2"]
            }
        ]
    }"#;

    async fn synchronizer() -> (Database, Arc<PreferenceStore>, Synchronizer) {
        let db = Database::open(":memory:").await.unwrap();
        let prefs = Arc::new(PreferenceStore::open(db.clone()).await.unwrap());
        let sync = Synchronizer::new(db.clone(), prefs.clone());
        (db, prefs, sync)
    }

    #[tokio::test]
    async fn test_apply_populates_store_and_index() {
        let (db, prefs, sync) = synchronizer().await;
        let change_set = ChangeSet::from_json(CHANGE_SET).unwrap();

        let report = sync.apply(&change_set).await.unwrap();
        assert_eq!(report.topics_upserted, 2);
        assert_eq!(report.content_upserted, 2);
        assert_eq!(report.links_added, 2);
        assert_eq!(report.links_skipped, 1);
        assert_eq!(report.indexed_entities, 4);

        let items = db.get_content(&ContentQuery::all()).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(items[0].publish_date, 1_704_153_600);
        assert_eq!(items[0].topic_ids().collect::<Vec<_>>(), vec!["t1"]);

        assert_eq!(
            prefs.change_list_versions().await.unwrap(),
            ChangeListVersions {
                topic_version: 1,
                content_version: 1
            }
        );
    }

    #[tokio::test]
    async fn test_replaying_old_change_set_is_noop() {
        let (db, _, sync) = synchronizer().await;
        let change_set = ChangeSet::from_json(CHANGE_SET).unwrap();
        sync.apply(&change_set).await.unwrap();
        db.delete_content(&["b".to_string()]).await.unwrap();

        let report = sync.apply(&change_set).await.unwrap();
        assert!(report.topics_stale);
        assert!(report.content_stale);
        assert_eq!(report.content_upserted, 0);
        assert_eq!(db.get_content_ids(&ContentQuery::all()).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_deletions_cascade_to_links() {
        let (db, _, sync) = synchronizer().await;
        sync.apply(&ChangeSet::from_json(CHANGE_SET).unwrap())
            .await
            .unwrap();

        let deletion = ChangeSet {
            topic_version: 1,
            content_version: 2,
            deleted_content_ids: vec!["a".to_string()],
            ..ChangeSet::default()
        };
        let report = sync.apply(&deletion).await.unwrap();
        assert!(report.topics_stale);
        assert_eq!(report.content_deleted, 1);

        let by_topic = db
            .get_content_ids(&ContentQuery::with_topic_ids(["t1"]))
            .await
            .unwrap();
        assert!(by_topic.is_empty());
        // Index rebuilt without the deleted item
        assert_eq!(report.indexed_entities, 3);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            ChangeSet::from_json("{\"content\": [{\"id\": 1}]}"),
            Err(SyncError::Parse(_))
        ));
    }
}
