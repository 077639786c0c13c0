use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::scope::ScreenScope;
use crate::analytics::{AnalyticsEvent, AnalyticsHelper};
use crate::config::Config;
use crate::data::{
    FollowableTopic, RecentSearchRepository, SearchContentsRepository, UserContentItem,
    UserDataRepository,
};
use crate::storage::{DatabaseError, RecentSearchQuery};
use crate::stream::{switch_map, watch_stream, SharedStream, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SearchResultUiState {
    Loading,
    /// The index has too few entries to search yet.
    SearchNotReady,
    /// The query is too short to run.
    EmptyQuery,
    Success {
        topics: Vec<FollowableTopic>,
        content: Vec<UserContentItem>,
    },
    LoadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "queries", rename_all = "snake_case")]
pub enum RecentSearchQueriesUiState {
    Loading,
    Success(Vec<RecentSearchQuery>),
}

/// When a search is worth running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchThresholds {
    /// Fewer indexed entities than this means search is not ready.
    pub min_index_count: i64,
    /// Queries shorter than this many characters are not run.
    pub min_query_length: usize,
}

impl Default for SearchThresholds {
    fn default() -> Self {
        Self {
            min_index_count: 1,
            min_query_length: 2,
        }
    }
}

impl From<&Config> for SearchThresholds {
    fn from(config: &Config) -> Self {
        Self {
            min_index_count: config.min_search_index_count,
            min_query_length: config.min_search_query_length,
        }
    }
}

/// State and intents for the search screen.
pub struct SearchViewModel {
    query: Arc<watch::Sender<String>>,
    results: SharedStream<SearchResultUiState>,
    recent: SharedStream<RecentSearchQueriesUiState>,
    recent_searches: RecentSearchRepository,
    user_data: UserDataRepository,
    analytics: Arc<dyn AnalyticsHelper>,
    scope: ScreenScope,
}

impl SearchViewModel {
    pub fn new(
        search: SearchContentsRepository,
        recent_searches: RecentSearchRepository,
        user_data: UserDataRepository,
        analytics: Arc<dyn AnalyticsHelper>,
        thresholds: SearchThresholds,
        grace: Duration,
    ) -> Self {
        let (query, _) = watch::channel(String::new());
        let query = Arc::new(query);

        let results = {
            let query = Arc::clone(&query);
            SharedStream::with_initial(
                "search_results",
                grace,
                SearchResultUiState::Loading,
                move || search_results(search.clone(), Arc::clone(&query), thresholds),
            )
        };

        let recent = {
            let recent_searches = recent_searches.clone();
            SharedStream::with_initial(
                "recent_searches",
                grace,
                RecentSearchQueriesUiState::Loading,
                move || {
                    recent_searches
                        .observe_recent_search_queries()
                        .filter_map(|queries| async move {
                            match queries {
                                Ok(queries) => Some(RecentSearchQueriesUiState::Success(queries)),
                                Err(e) => {
                                    tracing::warn!(error = %e, "Failed to load recent searches");
                                    None
                                }
                            }
                        })
                        .boxed()
                },
            )
        };

        let scope = ScreenScope::new("search");
        {
            let results = results.clone();
            scope.on_close(move || results.shutdown());
        }
        {
            let recent = recent.clone();
            scope.on_close(move || recent.shutdown());
        }

        Self {
            query,
            results,
            recent,
            recent_searches,
            user_data,
            analytics,
            scope,
        }
    }

    pub fn search_result_ui_state(&self) -> Subscription<SearchResultUiState> {
        self.results.subscribe()
    }

    pub fn recent_search_queries_ui_state(&self) -> Subscription<RecentSearchQueriesUiState> {
        self.recent.subscribe()
    }

    pub fn search_query(&self) -> String {
        self.query.borrow().clone()
    }

    pub fn scope(&self) -> &ScreenScope {
        &self.scope
    }

    pub fn on_search_query_changed(&self, query: &str) {
        self.query.send_if_modified(|current| {
            if current == query {
                return false;
            }
            *current = query.to_string();
            true
        });
    }

    /// The user explicitly submitted `query`: remember it.
    pub async fn on_search_triggered(&self, query: &str) -> Result<(), DatabaseError> {
        self.analytics
            .log_event(AnalyticsEvent::search_triggered(query));
        self.recent_searches
            .insert_or_replace_recent_search(query)
            .await
    }

    pub async fn clear_recent_searches(&self) -> Result<(), DatabaseError> {
        self.recent_searches.clear_recent_searches().await
    }

    pub async fn set_content_bookmarked(&self, id: &str, bookmarked: bool) -> Result<(), DatabaseError> {
        self.user_data.set_content_bookmarked(id, bookmarked).await
    }

    pub async fn follow_topic(&self, id: &str, followed: bool) -> Result<(), DatabaseError> {
        self.user_data.set_topic_id_followed(id, followed).await
    }

    pub async fn set_content_viewed(&self, id: &str, viewed: bool) -> Result<(), DatabaseError> {
        self.user_data.set_content_viewed(id, viewed).await
    }

    pub fn close(&self) {
        self.scope.close();
    }
}

/// Index readiness first, then the query, then the results for that query.
fn search_results(
    search: SearchContentsRepository,
    query: Arc<watch::Sender<String>>,
    thresholds: SearchThresholds,
) -> futures::stream::BoxStream<'static, SearchResultUiState> {
    switch_map(search.observe_search_contents_count(), move |count| {
        match count {
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count search index");
                return stream::iter([SearchResultUiState::LoadFailed]).boxed();
            }
            Ok(count) if count < thresholds.min_index_count => {
                return stream::iter([SearchResultUiState::SearchNotReady]).boxed();
            }
            Ok(_) => {}
        }

        let search = search.clone();
        switch_map(watch_stream(query.subscribe()), move |query| {
            if query.chars().count() < thresholds.min_query_length {
                return stream::iter([SearchResultUiState::EmptyQuery]).boxed();
            }
            search
                .observe_search_result(&query)
                .map(|result| match result {
                    Ok(result) => SearchResultUiState::Success {
                        topics: result.topics,
                        content: result.content,
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Search failed");
                        SearchResultUiState::LoadFailed
                    }
                })
                .boxed()
        })
        .boxed()
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::MemoryAnalyticsHelper;
    use crate::data::PreferenceStore;
    use crate::storage::{Database, NewContentItem, Topic};
    use pretty_assertions::assert_eq;

    const GRACE: Duration = Duration::from_secs(5);

    struct Fixture {
        db: Database,
        search: SearchContentsRepository,
        analytics: Arc<MemoryAnalyticsHelper>,
        vm: SearchViewModel,
    }

    async fn setup() -> Fixture {
        let db = Database::open(":memory:").await.unwrap();
        let store = Arc::new(PreferenceStore::open(db.clone()).await.unwrap());
        let analytics = Arc::new(MemoryAnalyticsHelper::new());
        let user_data = UserDataRepository::new(store, analytics.clone());
        let search = SearchContentsRepository::new(db.clone(), user_data.clone());
        let recent = RecentSearchRepository::new(db.clone(), 10);
        let vm = SearchViewModel::new(
            search.clone(),
            recent,
            user_data,
            analytics.clone(),
            SearchThresholds::default(),
            GRACE,
        );
        Fixture {
            db,
            search,
            analytics,
            vm,
        }
    }

    async fn seed(db: &Database, search: &SearchContentsRepository) {
        db.upsert_topics(&[Topic {
            id: "t1".to_string(),
            name: "Compose".to_string(),
            short_description: "UI toolkit".to_string(),
            long_description: String::new(),
            url: String::new(),
            image_url: String::new(),
        }])
        .await
        .unwrap();
        db.upsert_content(&[NewContentItem {
            id: "n1".to_string(),
            title: "Compose performance".to_string(),
            content: "Faster lists".to_string(),
            url: String::new(),
            header_image_url: None,
            publish_date: 1,
            content_type: "Article".to_string(),
        }])
        .await
        .unwrap();
        search.populate_search_index().await.unwrap();
    }

    async fn next_state(states: &mut Subscription<SearchResultUiState>) -> SearchResultUiState {
        loop {
            let state = states.next().await.unwrap();
            if state != SearchResultUiState::Loading {
                return state;
            }
        }
    }

    #[tokio::test]
    async fn test_not_ready_until_indexed_regardless_of_query() {
        let f = setup().await;
        f.vm.on_search_query_changed("compose");

        let mut states = f.vm.search_result_ui_state();
        assert_eq!(states.next().await, Some(SearchResultUiState::Loading));
        assert_eq!(next_state(&mut states).await, SearchResultUiState::SearchNotReady);

        seed(&f.db, &f.search).await;
        match next_state(&mut states).await {
            SearchResultUiState::Success { topics, content } => {
                assert_eq!(topics.len(), 1);
                assert_eq!(content[0].id, "n1");
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_query_is_empty() {
        let f = setup().await;
        seed(&f.db, &f.search).await;

        let mut states = f.vm.search_result_ui_state();
        assert_eq!(next_state(&mut states).await, SearchResultUiState::EmptyQuery);

        f.vm.on_search_query_changed("c");
        f.vm.on_search_query_changed("co");
        match next_state(&mut states).await {
            SearchResultUiState::Success { content, .. } => assert_eq!(content.len(), 1),
            other => panic!("expected Success, got {other:?}"),
        }

        f.vm.on_search_query_changed("");
        assert_eq!(next_state(&mut states).await, SearchResultUiState::EmptyQuery);
    }

    #[tokio::test]
    async fn test_bookmark_shows_up_in_results() {
        let f = setup().await;
        seed(&f.db, &f.search).await;
        f.vm.on_search_query_changed("performance");

        let mut states = f.vm.search_result_ui_state();
        let SearchResultUiState::Success { content, .. } = next_state(&mut states).await else {
            panic!("expected Success");
        };
        assert!(!content[0].is_saved);

        f.vm.set_content_bookmarked("n1", true).await.unwrap();
        let SearchResultUiState::Success { content, .. } = next_state(&mut states).await else {
            panic!("expected Success");
        };
        assert!(content[0].is_saved);
    }

    #[tokio::test]
    async fn test_triggered_search_is_recorded_and_logged() {
        let f = setup().await;
        let mut recent = f.vm.recent_search_queries_ui_state();
        assert_eq!(recent.next().await, Some(RecentSearchQueriesUiState::Loading));
        assert_eq!(
            recent.next().await,
            Some(RecentSearchQueriesUiState::Success(vec![]))
        );

        f.vm.on_search_triggered("kotlin").await.unwrap();
        let Some(RecentSearchQueriesUiState::Success(queries)) = recent.next().await else {
            panic!("expected Success");
        };
        assert_eq!(queries[0].query, "kotlin");
        assert!(f
            .analytics
            .has_logged(&AnalyticsEvent::search_triggered("kotlin")));

        f.vm.clear_recent_searches().await.unwrap();
        assert_eq!(
            recent.next().await,
            Some(RecentSearchQueriesUiState::Success(vec![]))
        );
    }

    #[tokio::test]
    async fn test_close_stops_upstreams_and_ends_observers() {
        let f = setup().await;
        let mut states = f.vm.search_result_ui_state();
        let mut recent = f.vm.recent_search_queries_ui_state();
        assert!(f.vm.results.is_active());

        f.vm.close();
        assert!(!f.vm.results.is_active());
        assert!(!f.vm.recent.is_active());
        assert_eq!(states.next().await, None);
        assert_eq!(recent.next().await, None);

        let mut late = f.vm.search_result_ui_state();
        assert_eq!(late.next().await, None);
        assert!(!f.vm.results.is_active());
    }

    #[tokio::test]
    async fn test_rejected_query_shows_load_failed() {
        let f = setup().await;
        seed(&f.db, &f.search).await;
        f.vm.on_search_query_changed(&"compose ".repeat(40));

        let mut states = f.vm.search_result_ui_state();
        assert_eq!(next_state(&mut states).await, SearchResultUiState::LoadFailed);

        // A valid query recovers
        f.vm.on_search_query_changed("compose");
        assert!(matches!(
            next_state(&mut states).await,
            SearchResultUiState::Success { .. }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_index_shows_load_failed() {
        let f = setup().await;
        f.db.close().await;
        f.vm.on_search_query_changed("compose");

        let mut states = f.vm.search_result_ui_state();
        assert_eq!(next_state(&mut states).await, SearchResultUiState::LoadFailed);
    }
}
