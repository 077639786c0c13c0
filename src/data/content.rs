use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeSet;

use super::model::{map_to_user_content, UserContentItem, UserData};
use super::user_data::UserDataRepository;
use crate::storage::{ContentQuery, Database, DatabaseError};
use crate::stream::{combine_latest, distinct_until_changed, switch_map};

pub type UserContentStream = BoxStream<'static, Result<Vec<UserContentItem>, DatabaseError>>;

/// Content joined with the user's bookmark, follow and viewed state.
///
/// Every emission of either the content query or the user data recomputes
/// the whole list. Order is the store's order: newest first.
#[derive(Debug, Clone)]
pub struct UserContentRepository {
    db: Database,
    user_data: UserDataRepository,
}

impl UserContentRepository {
    pub fn new(db: Database, user_data: UserDataRepository) -> Self {
        Self { db, user_data }
    }

    pub fn observe_all(&self, query: ContentQuery) -> UserContentStream {
        combine_latest(
            self.db.observe_content(query),
            self.user_data.user_data(),
            |content, user_data| {
                content
                    .as_ref()
                    .map(|items| map_to_user_content(items, user_data))
                    .map_err(Clone::clone)
            },
        )
        .boxed()
    }

    /// Bookmarked content; follows the bookmark set as it changes.
    pub fn observe_all_bookmarked(&self) -> UserContentStream {
        self.observe_by_user_ids(
            |data| data.bookmarked_content.clone(),
            ContentQuery::with_content_ids,
        )
    }

    /// Content tagged with at least one followed topic.
    pub fn observe_all_for_followed_topics(&self) -> UserContentStream {
        self.observe_by_user_ids(
            |data| data.followed_topics.clone(),
            ContentQuery::with_topic_ids,
        )
    }

    /// Derive an id set from user data and re-query whenever that set changes.
    /// An empty set yields an empty list without touching the store.
    fn observe_by_user_ids(
        &self,
        select: fn(&UserData) -> BTreeSet<String>,
        to_query: fn(BTreeSet<String>) -> ContentQuery,
    ) -> UserContentStream {
        let ids = distinct_until_changed(
            self.user_data
                .user_data()
                .map(move |data| select(&data))
                .boxed(),
        );

        let repo = self.clone();
        switch_map(ids, move |ids| {
            if ids.is_empty() {
                stream::iter([Ok(Vec::new())]).boxed()
            } else {
                repo.observe_all(to_query(ids))
            }
        })
        .boxed()
    }
}
