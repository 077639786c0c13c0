mod content;
mod invalidation;
mod preferences;
mod recent_search;
mod schema;
mod search;
mod topics;
mod types;

pub use invalidation::Table;
pub use schema::Database;
pub use types::{
    ContentItem, ContentQuery, ContentTopicLink, DatabaseError, NewContentItem,
    RecentSearchQuery, SearchMatches, Topic,
};
