//! Repositories: the store joined with user data, plus sync.

mod content;
pub mod model;
mod search;
mod sync;
mod topics;
mod user_data;

pub use content::{UserContentRepository, UserContentStream};
pub use model::{
    DarkThemeConfig, FollowableTopic, ThemeBrand, UserContentItem, UserData, UserSearchResult,
};
pub use search::{RecentSearchRepository, SearchContentsRepository};
pub use sync::{ChangeSet, ChangeSetContent, SyncError, SyncReport, Synchronizer};
pub use topics::TopicsRepository;
pub use user_data::{ChangeListVersions, PreferenceStore, UserDataRepository};
