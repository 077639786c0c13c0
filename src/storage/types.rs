use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages.
///
/// Cloneable so a failure can be fanned out to every observer of a shared stream.
#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of nowfeed appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A query was asked to do something it cannot (bad input, row missing)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[source] Arc<sqlx::Error>),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::Other(Arc::new(err))
    }
}

impl DatabaseError {
    /// Map a sqlx error, recognising database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err) {
            return DatabaseError::InstanceLocked;
        }
        err.into()
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_error(err: &sqlx::Error) -> bool {
    let error_string = err.to_string().to_lowercase();
    error_string.contains("database is locked")
        || error_string.contains("database table is locked")
        || error_string.contains("sqlite_busy")
        || error_string.contains("sqlite_locked")
        || error_string.contains("unable to open database file")
}

// ============================================================================
// Query Parameters
// ============================================================================

/// Filter for content queries.
///
/// `None` disables a filter. `Some(set)` restricts results to rows whose id (or
/// one of whose topics) is in the set. Two enabled filters combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentQuery {
    pub filter_topic_ids: Option<BTreeSet<String>>,
    pub filter_content_ids: Option<BTreeSet<String>>,
}

impl ContentQuery {
    /// Query with no restrictions.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_topic_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter_topic_ids: Some(ids.into_iter().map(Into::into).collect()),
            filter_content_ids: None,
        }
    }

    pub fn with_content_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter_topic_ids: None,
            filter_content_ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    /// True when an enabled filter has an empty set, so nothing can match.
    pub(crate) fn matches_nothing(&self) -> bool {
        self.filter_topic_ids.as_ref().is_some_and(BTreeSet::is_empty)
            || self.filter_content_ids.as_ref().is_some_and(BTreeSet::is_empty)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Reference data describing a subject area content can be tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub long_description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image_url: String,
}

/// A stored article together with the topics it is linked to.
///
/// Topics are ordered by name so two reads of the same row compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub header_image_url: Option<String>,
    /// Unix seconds
    pub publish_date: i64,
    pub content_type: String,
    pub topics: Vec<Topic>,
}

impl ContentItem {
    pub fn topic_ids(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.id.as_str())
    }
}

/// Write-side shape of a content row. Topic links are written separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContentItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub header_image_url: Option<String>,
    pub publish_date: i64,
    #[serde(default)]
    pub content_type: String,
}

/// One row of the content/topic join table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentTopicLink {
    pub content_id: String,
    pub topic_id: String,
}

/// A remembered search, newest first when listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RecentSearchQuery {
    pub query: String,
    /// Unix milliseconds
    pub queried_date: i64,
}

/// Ids matched by a full-text search, each list in relevance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchMatches {
    pub topic_ids: Vec<String>,
    pub content_ids: Vec<String>,
}

/// Internal row type for content queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContentDbRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub header_image_url: Option<String>,
    pub publish_date: i64,
    pub content_type: String,
}

impl ContentDbRow {
    pub(crate) fn into_item(self, topics: Vec<Topic>) -> ContentItem {
        ContentItem {
            id: self.id,
            title: self.title,
            content: self.content,
            url: self.url,
            header_image_url: self.header_image_url,
            publish_date: self.publish_date,
            content_type: self.content_type,
            topics,
        }
    }
}

/// Topic row joined with the content id it is linked to
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LinkedTopicRow {
    pub content_id: String,
    pub id: String,
    pub name: String,
    pub short_description: String,
    pub long_description: String,
    pub url: String,
    pub image_url: String,
}

impl LinkedTopicRow {
    pub(crate) fn into_pair(self) -> (String, Topic) {
        (
            self.content_id,
            Topic {
                id: self.id,
                name: self.name,
                short_description: self.short_description,
                long_description: self.long_description,
                url: self.url,
                image_url: self.image_url,
            },
        )
    }
}
