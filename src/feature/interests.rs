use futures::stream::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::scope::ScreenScope;
use crate::data::{FollowableTopic, TopicsRepository, UserDataRepository};
use crate::storage::DatabaseError;
use crate::stream::{combine_latest, watch_stream, SharedStream, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InterestsUiState {
    Loading,
    Interests {
        selected_topic_id: Option<String>,
        topics: Vec<FollowableTopic>,
    },
    Empty,
    LoadFailed,
}

/// State and intents for the topic list.
pub struct InterestsViewModel {
    user_data: UserDataRepository,
    selected_topic_id: Arc<watch::Sender<Option<String>>>,
    ui_state: SharedStream<InterestsUiState>,
    scope: ScreenScope,
}

impl InterestsViewModel {
    pub fn new(topics: TopicsRepository, user_data: UserDataRepository, grace: Duration) -> Self {
        let (selected_topic_id, _) = watch::channel(None);
        let selected_topic_id = Arc::new(selected_topic_id);

        let ui_state = {
            let selected_topic_id = Arc::clone(&selected_topic_id);
            SharedStream::with_initial("interests", grace, InterestsUiState::Loading, move || {
                combine_latest(
                    watch_stream(selected_topic_id.subscribe()),
                    topics.observe_followable_topics(),
                    |selected, topics| match topics {
                        Ok(topics) if topics.is_empty() => InterestsUiState::Empty,
                        Ok(topics) => InterestsUiState::Interests {
                            selected_topic_id: selected.clone(),
                            topics: topics.clone(),
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to load topics");
                            InterestsUiState::LoadFailed
                        }
                    },
                )
                .boxed()
            })
        };

        let scope = ScreenScope::new("interests");
        {
            let ui_state = ui_state.clone();
            scope.on_close(move || ui_state.shutdown());
        }

        Self {
            user_data,
            selected_topic_id,
            ui_state,
            scope,
        }
    }

    pub fn ui_state(&self) -> Subscription<InterestsUiState> {
        self.ui_state.subscribe()
    }

    pub fn selected_topic_id(&self) -> Option<String> {
        self.selected_topic_id.borrow().clone()
    }

    pub fn scope(&self) -> &ScreenScope {
        &self.scope
    }

    pub async fn follow_topic(&self, id: &str, followed: bool) -> Result<(), DatabaseError> {
        self.user_data.set_topic_id_followed(id, followed).await
    }

    /// Select a topic, or clear the selection with `None`.
    pub fn on_topic_click(&self, id: Option<&str>) {
        self.selected_topic_id
            .send_replace(id.map(str::to_string));
    }

    pub fn close(&self) {
        self.scope.close();
    }
}
