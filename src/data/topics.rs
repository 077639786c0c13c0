use futures::stream::{BoxStream, StreamExt};

use super::model::FollowableTopic;
use super::user_data::UserDataRepository;
use crate::storage::{Database, DatabaseError, Topic};
use crate::stream::combine_latest;

/// Topics, alone or annotated with the user's follow state.
#[derive(Debug, Clone)]
pub struct TopicsRepository {
    db: Database,
    user_data: UserDataRepository,
}

impl TopicsRepository {
    pub fn new(db: Database, user_data: UserDataRepository) -> Self {
        Self { db, user_data }
    }

    pub fn observe_topics(&self) -> BoxStream<'static, Result<Vec<Topic>, DatabaseError>> {
        self.db.observe_topics()
    }

    pub fn observe_topic(&self, id: &str) -> BoxStream<'static, Result<Option<Topic>, DatabaseError>> {
        self.db.observe_topic(id.to_string())
    }

    /// Every topic with its follow flag, ordered by name.
    pub fn observe_followable_topics(
        &self,
    ) -> BoxStream<'static, Result<Vec<FollowableTopic>, DatabaseError>> {
        combine_latest(
            self.db.observe_topics(),
            self.user_data.user_data(),
            |topics, user_data| {
                topics
                    .as_ref()
                    .map(|topics| {
                        topics
                            .iter()
                            .map(|t| FollowableTopic::new(t.clone(), user_data))
                            .collect()
                    })
                    .map_err(Clone::clone)
            },
        )
        .boxed()
    }
}
