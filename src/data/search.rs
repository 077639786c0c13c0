use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};

use super::model::{map_to_user_content, FollowableTopic, UserSearchResult};
use super::user_data::UserDataRepository;
use crate::storage::{ContentQuery, Database, DatabaseError, RecentSearchQuery};
use crate::stream::{combine_latest, switch_map};

// ============================================================================
// Recent Searches
// ============================================================================

/// Bounded, most-recent-first log of submitted search queries.
#[derive(Debug, Clone)]
pub struct RecentSearchRepository {
    db: Database,
    limit: usize,
}

impl RecentSearchRepository {
    pub fn new(db: Database, limit: usize) -> Self {
        Self { db, limit }
    }

    /// Record `query` now, exactly as typed. Repeating the same text moves
    /// it to the front instead of duplicating it.
    pub async fn insert_or_replace_recent_search(&self, query: &str) -> Result<(), DatabaseError> {
        self.db
            .insert_or_replace_recent_search(query, Utc::now().timestamp_millis())
            .await?;
        let dropped = self.db.trim_recent_searches(self.limit).await?;
        if dropped > 0 {
            tracing::debug!(dropped, limit = self.limit, "Trimmed recent searches");
        }
        Ok(())
    }

    pub fn observe_recent_search_queries(
        &self,
    ) -> BoxStream<'static, Result<Vec<RecentSearchQuery>, DatabaseError>> {
        self.db.observe_recent_searches(self.limit)
    }

    pub async fn clear_recent_searches(&self) -> Result<(), DatabaseError> {
        let cleared = self.db.clear_recent_searches().await?;
        tracing::debug!(cleared, "Cleared recent searches");
        Ok(())
    }
}

// ============================================================================
// Search Contents
// ============================================================================

/// Full-text search over topics and content.
#[derive(Debug, Clone)]
pub struct SearchContentsRepository {
    db: Database,
    user_data: UserDataRepository,
}

impl SearchContentsRepository {
    pub fn new(db: Database, user_data: UserDataRepository) -> Self {
        Self { db, user_data }
    }

    /// Rebuild the search index from the stored topics and content.
    pub async fn populate_search_index(&self) -> Result<i64, DatabaseError> {
        self.db.populate_search_index().await
    }

    /// Live number of indexed entities (topics + content).
    pub fn observe_search_contents_count(&self) -> BoxStream<'static, Result<i64, DatabaseError>> {
        self.db.observe_search_index_count()
    }

    /// Live search results for `query`, annotated with user state.
    ///
    /// Re-runs when the index is rebuilt; the matched entities themselves
    /// stay live, so bookmark or follow changes show up immediately.
    pub fn observe_search_result(
        &self,
        query: &str,
    ) -> BoxStream<'static, Result<UserSearchResult, DatabaseError>> {
        let db = self.db.clone();
        let user_data = self.user_data.clone();

        switch_map(self.db.observe_search(query.to_string()), move |matches| {
            let matches = match matches {
                Ok(matches) => matches,
                Err(e) => return stream::iter([Err(e)]).boxed(),
            };

            let entities = combine_latest(
                db.observe_topics_by_ids(matches.topic_ids),
                db.observe_content(ContentQuery::with_content_ids(matches.content_ids)),
                |topics, content| (topics.clone(), content.clone()),
            )
            .boxed();

            combine_latest(
                entities,
                user_data.user_data(),
                |(topics, content), user| -> Result<UserSearchResult, DatabaseError> {
                    let topics = topics.as_ref().map_err(Clone::clone)?;
                    let content = content.as_ref().map_err(Clone::clone)?;
                    Ok(UserSearchResult {
                        topics: topics
                            .iter()
                            .map(|t| FollowableTopic::new(t.clone(), user))
                            .collect(),
                        content: map_to_user_content(content, user),
                    })
                },
            )
            .boxed()
        })
        .boxed()
    }
}
