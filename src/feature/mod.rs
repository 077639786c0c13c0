//! Screen-level state holders built on the repositories.
//!
//! Each holder exposes its state as [`Subscription`](crate::stream::Subscription)s
//! that start in a loading state, turn upstream failures into a failure
//! variant, and share one upstream between observers. Intents are plain
//! async methods. Everything a holder starts is tied to its [`ScreenScope`].

mod app_state;
mod bookmarks;
mod interests;
mod scope;
mod search;

pub use app_state::{AppState, ManualNetworkMonitor, NetworkMonitor, NOT_CONNECTED_MESSAGE};
pub use bookmarks::{BookmarksViewModel, NewsFeedUiState, UndoState};
pub use interests::{InterestsUiState, InterestsViewModel};
pub use scope::ScreenScope;
pub use search::{RecentSearchQueriesUiState, SearchResultUiState, SearchThresholds, SearchViewModel};
