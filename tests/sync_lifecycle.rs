//! End-to-end: apply change sets, then read them back through the
//! repositories and screen state holders.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use futures::StreamExt;
use nowfeed::analytics::{AnalyticsEvent, MemoryAnalyticsHelper};
use nowfeed::data::{
    ChangeSet, PreferenceStore, RecentSearchRepository, SearchContentsRepository, Synchronizer,
    UserContentRepository, UserDataRepository,
};
use nowfeed::feature::{
    BookmarksViewModel, NewsFeedUiState, SearchResultUiState, SearchThresholds, SearchViewModel,
    UndoState,
};
use nowfeed::storage::{ContentQuery, Database};
use nowfeed::stream::Subscription;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const GRACE: Duration = Duration::from_secs(5);

const INITIAL: &str = r#"{
    "topic_version": 3,
    "content_version": 7,
    "topics": [
        { "id": "compose", "name": "Compose" },
        { "id": "kotlin", "name": "Kotlin" }
    ],
    "content": [
        {
            "id": "n1",
            "title": "Lazy lists in Compose",
            "publish_date": "2024-03-02T09:00:00Z",
            "type": "Article",
            "topics": ["compose"]
        },
        {
            "id": "n2",
            "title": "Kotlin coroutines deep dive",
            "publish_date": "2024-03-01T09:00:00Z",
            "type": "Video",
            "topics": ["kotlin"]
        },
        {
            "id": "n3",
            "title": "Compose and Kotlin together",
            "publish_date": "2024-02-28T09:00:00Z",
            "topics": ["compose", "kotlin"]
        }
    ]
}"#;

struct App {
    db: Database,
    preferences: Arc<PreferenceStore>,
    user_data: UserDataRepository,
    analytics: Arc<MemoryAnalyticsHelper>,
}

impl App {
    async fn new() -> Self {
        let db = Database::open(":memory:").await.unwrap();
        let preferences = Arc::new(PreferenceStore::open(db.clone()).await.unwrap());
        let analytics = Arc::new(MemoryAnalyticsHelper::new());
        let user_data = UserDataRepository::new(preferences.clone(), analytics.clone());
        Self {
            db,
            preferences,
            user_data,
            analytics,
        }
    }

    async fn sync(&self, json: &str) {
        Synchronizer::new(self.db.clone(), self.preferences.clone())
            .apply(&ChangeSet::from_json(json).unwrap())
            .await
            .unwrap();
    }

    fn content(&self) -> UserContentRepository {
        UserContentRepository::new(self.db.clone(), self.user_data.clone())
    }

    fn search_view_model(&self) -> SearchViewModel {
        SearchViewModel::new(
            SearchContentsRepository::new(self.db.clone(), self.user_data.clone()),
            RecentSearchRepository::new(self.db.clone(), 10),
            self.user_data.clone(),
            self.analytics.clone(),
            SearchThresholds::default(),
            GRACE,
        )
    }
}

async fn settled_search(states: &mut Subscription<SearchResultUiState>) -> SearchResultUiState {
    loop {
        match states.next().await.unwrap() {
            SearchResultUiState::Loading => continue,
            state => return state,
        }
    }
}

#[tokio::test]
async fn test_sync_then_followed_feed() {
    let app = App::new().await;
    app.sync(INITIAL).await;

    let mut feed = app.content().observe_all_for_followed_topics();
    assert!(feed.next().await.unwrap().unwrap().is_empty());

    app.user_data
        .set_topic_id_followed("kotlin", true)
        .await
        .unwrap();
    let items = feed.next().await.unwrap().unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["n2", "n3"]);
    assert!(items.iter().all(|i| i.is_followed_via_topic()));
    assert!(app
        .analytics
        .has_logged(&AnalyticsEvent::topic_follow_toggled("kotlin", true)));
}

#[tokio::test]
async fn test_search_becomes_ready_after_sync() {
    let app = App::new().await;
    let vm = app.search_view_model();
    vm.on_search_query_changed("test");

    let mut states = vm.search_result_ui_state();
    assert_eq!(settled_search(&mut states).await, SearchResultUiState::SearchNotReady);

    app.sync(INITIAL).await;
    vm.on_search_query_changed("compose");
    let state = loop {
        match settled_search(&mut states).await {
            // Results for the earlier query may arrive first
            SearchResultUiState::Success { topics, content } if !topics.is_empty() => {
                break (topics, content)
            }
            _ => continue,
        }
    };
    let topic_ids: Vec<&str> = state.0.iter().map(|t| t.topic.id.as_str()).collect();
    assert_eq!(topic_ids, vec!["compose"]);
    let mut content_ids: Vec<&str> = state.1.iter().map(|c| c.id.as_str()).collect();
    content_ids.sort_unstable();
    assert_eq!(content_ids, vec!["n1", "n3"]);

    vm.on_search_query_changed("a");
    assert_eq!(settled_search(&mut states).await, SearchResultUiState::EmptyQuery);
}

#[tokio::test]
async fn test_bookmark_undo_round_trip() {
    let app = App::new().await;
    app.sync(INITIAL).await;
    app.user_data.set_content_bookmarked("n1", true).await.unwrap();
    app.user_data.set_content_bookmarked("n2", true).await.unwrap();

    let vm = BookmarksViewModel::new(app.content(), app.user_data.clone(), GRACE);
    let mut feed = vm.feed_ui_state();
    assert_eq!(feed.next().await, Some(NewsFeedUiState::Loading));

    vm.remove_from_saved_resources("n1").await.unwrap();
    assert_eq!(
        vm.current_undo_state(),
        UndoState {
            should_display_undo_bookmark: true,
            last_removed_bookmark_id: Some("n1".to_string()),
        }
    );
    vm.undo_bookmark_removal().await.unwrap();
    assert_eq!(vm.current_undo_state(), UndoState::default());

    // The feed settles on both bookmarks again
    loop {
        if let Some(NewsFeedUiState::Success(items)) = feed.next().await {
            if items.len() == 2 {
                assert_eq!(items[0].id, "n1");
                break;
            }
        }
    }

    vm.remove_from_saved_resources("n2").await.unwrap();
    vm.clear_undo_state();
    assert!(!app.user_data.current().bookmarked_content.contains("n2"));
}

#[tokio::test]
async fn test_stale_and_newer_change_sets() {
    let app = App::new().await;
    app.sync(INITIAL).await;

    // Older content version is ignored; newer topic version still applies
    app.sync(
        r#"{
            "topic_version": 4,
            "content_version": 7,
            "topics": [{ "id": "android", "name": "Android" }],
            "deleted_content_ids": ["n1"]
        }"#,
    )
    .await;
    let ids = app.db.get_content_ids(&ContentQuery::all()).await.unwrap();
    assert_eq!(ids, vec!["n1", "n2", "n3"]);
    assert_eq!(app.db.get_topic_ids().await.unwrap().len(), 3);

    app.sync(
        r#"{
            "topic_version": 4,
            "content_version": 8,
            "deleted_content_ids": ["n1"]
        }"#,
    )
    .await;
    let ids = app.db.get_content_ids(&ContentQuery::all()).await.unwrap();
    assert_eq!(ids, vec!["n2", "n3"]);

    let versions = app.preferences.change_list_versions().await.unwrap();
    assert_eq!((versions.topic_version, versions.content_version), (4, 8));
}
