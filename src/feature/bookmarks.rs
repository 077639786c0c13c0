use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::scope::ScreenScope;
use crate::data::{UserContentItem, UserContentRepository, UserDataRepository};
use crate::storage::DatabaseError;
use crate::stream::{watch_stream, SharedStream, Subscription};

const BOOKMARK_REMOVED_MESSAGE: &str = "Bookmark removed";
const UNDO_ACTION: &str = "Undo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "items", rename_all = "snake_case")]
pub enum NewsFeedUiState {
    Loading,
    Success(Vec<UserContentItem>),
    LoadFailed,
}

/// Whether to offer undoing the most recent bookmark removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoState {
    pub should_display_undo_bookmark: bool,
    pub last_removed_bookmark_id: Option<String>,
}

/// State and intents for the saved-items screen.
pub struct BookmarksViewModel {
    user_data: UserDataRepository,
    feed: SharedStream<NewsFeedUiState>,
    undo: Arc<watch::Sender<UndoState>>,
    scope: ScreenScope,
}

impl BookmarksViewModel {
    pub fn new(
        user_content: UserContentRepository,
        user_data: UserDataRepository,
        grace: Duration,
    ) -> Self {
        let feed = SharedStream::with_initial(
            "bookmarks_feed",
            grace,
            NewsFeedUiState::Loading,
            move || {
                user_content
                    .observe_all_bookmarked()
                    .map(|items| match items {
                        Ok(items) => NewsFeedUiState::Success(items),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to load bookmarks");
                            NewsFeedUiState::LoadFailed
                        }
                    })
                    .boxed()
            },
        );

        let (undo, _) = watch::channel(UndoState::default());
        let undo = Arc::new(undo);

        let scope = ScreenScope::new("bookmarks");
        {
            let feed = feed.clone();
            scope.on_close(move || feed.shutdown());
        }
        {
            let undo = Arc::clone(&undo);
            scope.on_close(move || {
                undo.send_replace(UndoState::default());
            });
        }

        Self {
            user_data,
            feed,
            undo,
            scope,
        }
    }

    pub fn feed_ui_state(&self) -> Subscription<NewsFeedUiState> {
        self.feed.subscribe()
    }

    pub fn undo_state(&self) -> BoxStream<'static, UndoState> {
        watch_stream(self.undo.subscribe())
    }

    pub fn current_undo_state(&self) -> UndoState {
        self.undo.borrow().clone()
    }

    pub fn scope(&self) -> &ScreenScope {
        &self.scope
    }

    /// Un-bookmark `id` and offer to undo it. Nothing is armed if the write fails.
    pub async fn remove_from_saved_resources(&self, id: &str) -> Result<(), DatabaseError> {
        self.user_data.set_content_bookmarked(id, false).await?;
        self.undo.send_replace(UndoState {
            should_display_undo_bookmark: true,
            last_removed_bookmark_id: Some(id.to_string()),
        });
        Ok(())
    }

    /// Re-bookmark the last removed item. The offer stays armed if the write fails.
    pub async fn undo_bookmark_removal(&self) -> Result<(), DatabaseError> {
        let Some(id) = self.current_undo_state().last_removed_bookmark_id else {
            return Ok(());
        };
        self.user_data.set_content_bookmarked(&id, true).await?;
        self.clear_undo_state();
        Ok(())
    }

    pub fn clear_undo_state(&self) {
        self.undo.send_replace(UndoState::default());
    }

    /// Show the undo offer through `on_show_snackbar` when one is armed.
    ///
    /// The callback gets the message and action label and returns whether
    /// the user took the action. Returns whether the removal was undone.
    pub async fn prompt_undo<F, Fut>(&self, on_show_snackbar: F) -> Result<bool, DatabaseError>
    where
        F: FnOnce(String, Option<String>) -> Fut,
        Fut: Future<Output = bool>,
    {
        if !self.current_undo_state().should_display_undo_bookmark {
            return Ok(false);
        }

        let undo = on_show_snackbar(
            BOOKMARK_REMOVED_MESSAGE.to_string(),
            Some(UNDO_ACTION.to_string()),
        )
        .await;

        if undo {
            self.undo_bookmark_removal().await?;
        } else {
            self.clear_undo_state();
        }
        Ok(undo)
    }

    /// The screen went to the background.
    pub fn on_screen_stop(&self) {
        self.clear_undo_state();
    }

    pub async fn set_content_viewed(&self, id: &str, viewed: bool) -> Result<(), DatabaseError> {
        self.user_data.set_content_viewed(id, viewed).await
    }

    pub fn close(&self) {
        self.scope.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::NoOpAnalyticsHelper;
    use crate::data::PreferenceStore;
    use crate::storage::{Database, NewContentItem};
    use pretty_assertions::assert_eq;

    const GRACE: Duration = Duration::from_secs(5);

    fn item(id: &str, publish_date: i64) -> NewContentItem {
        NewContentItem {
            id: id.to_string(),
            title: format!("Item {id}"),
            content: String::new(),
            url: String::new(),
            header_image_url: None,
            publish_date,
            content_type: "Article".to_string(),
        }
    }

    async fn setup() -> (Database, UserDataRepository, BookmarksViewModel) {
        let db = Database::open(":memory:").await.unwrap();
        db.upsert_content(&[item("a", 100), item("b", 200)])
            .await
            .unwrap();
        let store = Arc::new(PreferenceStore::open(db.clone()).await.unwrap());
        let user_data = UserDataRepository::new(store, Arc::new(NoOpAnalyticsHelper));
        user_data.set_content_bookmarked("a", true).await.unwrap();
        user_data.set_content_bookmarked("b", true).await.unwrap();

        let content = UserContentRepository::new(db.clone(), user_data.clone());
        let vm = BookmarksViewModel::new(content, user_data.clone(), GRACE);
        (db, user_data, vm)
    }

    fn saved_ids(state: &NewsFeedUiState) -> Vec<String> {
        match state {
            NewsFeedUiState::Success(items) => items.iter().map(|i| i.id.clone()).collect(),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    /// Skip the initial Loading and any intermediate states until `ids` show up.
    async fn next_with_ids(states: &mut Subscription<NewsFeedUiState>, ids: &[&str]) {
        loop {
            let state = states.next().await.unwrap();
            if state != NewsFeedUiState::Loading && saved_ids(&state) == ids {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_starts_loading_then_lists_bookmarks() {
        let (_, _, vm) = setup().await;
        let mut states = vm.feed_ui_state();

        assert_eq!(states.next().await, Some(NewsFeedUiState::Loading));
        let state = states.next().await.unwrap();
        assert_eq!(saved_ids(&state), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_remove_then_undo() {
        let (_, user_data, vm) = setup().await;
        let mut states = vm.feed_ui_state();
        next_with_ids(&mut states, &["b", "a"]).await;

        vm.remove_from_saved_resources("a").await.unwrap();
        assert_eq!(
            vm.current_undo_state(),
            UndoState {
                should_display_undo_bookmark: true,
                last_removed_bookmark_id: Some("a".to_string()),
            }
        );
        next_with_ids(&mut states, &["b"]).await;

        vm.undo_bookmark_removal().await.unwrap();
        assert_eq!(vm.current_undo_state(), UndoState::default());
        assert!(user_data.current().bookmarked_content.contains("a"));
        next_with_ids(&mut states, &["b", "a"]).await;
    }

    #[tokio::test]
    async fn test_clear_does_not_restore() {
        let (_, user_data, vm) = setup().await;

        vm.remove_from_saved_resources("b").await.unwrap();
        vm.clear_undo_state();
        vm.undo_bookmark_removal().await.unwrap();

        assert_eq!(vm.current_undo_state(), UndoState::default());
        assert!(!user_data.current().bookmarked_content.contains("b"));
    }

    #[tokio::test]
    async fn test_prompt_undo_follows_snackbar_result() {
        let (_, user_data, vm) = setup().await;

        // Nothing armed: the snackbar is not shown
        let mut shown = false;
        let undone = vm
            .prompt_undo(|_, _| {
                shown = true;
                async { true }
            })
            .await
            .unwrap();
        assert!(!undone);
        assert!(!shown);

        vm.remove_from_saved_resources("a").await.unwrap();
        let undone = vm
            .prompt_undo(|message, action| async move {
                assert_eq!(message, "Bookmark removed");
                assert_eq!(action.as_deref(), Some("Undo"));
                true
            })
            .await
            .unwrap();
        assert!(undone);
        assert!(user_data.current().bookmarked_content.contains("a"));

        vm.remove_from_saved_resources("a").await.unwrap();
        let undone = vm.prompt_undo(|_, _| async { false }).await.unwrap();
        assert!(!undone);
        assert!(!user_data.current().bookmarked_content.contains("a"));
        assert_eq!(vm.current_undo_state(), UndoState::default());
    }

    #[tokio::test]
    async fn test_failed_removal_does_not_arm_undo() {
        let (db, _, vm) = setup().await;
        db.close().await;

        assert!(vm.remove_from_saved_resources("a").await.is_err());
        assert_eq!(vm.current_undo_state(), UndoState::default());
    }

    #[tokio::test]
    async fn test_stop_and_close_clear_undo_state() {
        let (_, _, vm) = setup().await;

        vm.remove_from_saved_resources("a").await.unwrap();
        vm.on_screen_stop();
        assert_eq!(vm.current_undo_state(), UndoState::default());

        vm.remove_from_saved_resources("b").await.unwrap();
        let _states = vm.feed_ui_state();
        vm.close();
        assert_eq!(vm.current_undo_state(), UndoState::default());
        assert!(vm.scope().is_closed());
    }

    #[tokio::test]
    async fn test_close_ends_feed_and_it_stays_ended() {
        let (_, _, vm) = setup().await;
        let mut states = vm.feed_ui_state();
        next_with_ids(&mut states, &["b", "a"]).await;

        vm.close();
        assert_eq!(states.next().await, None);

        let mut late = vm.feed_ui_state();
        vm.remove_from_saved_resources("a").await.unwrap();
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn test_store_failure_shows_load_failed() {
        let (db, _, vm) = setup().await;
        db.close().await;

        let mut states = vm.feed_ui_state();
        let state = loop {
            let state = states.next().await.unwrap();
            if state != NewsFeedUiState::Loading {
                break state;
            }
        };
        assert_eq!(state, NewsFeedUiState::LoadFailed);
    }

    #[tokio::test]
    async fn test_set_content_viewed() {
        let (_, user_data, vm) = setup().await;
        vm.set_content_viewed("a", true).await.unwrap();
        assert!(user_data.current().viewed_content.contains("a"));
    }
}
