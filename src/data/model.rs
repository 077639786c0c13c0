use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::storage::{ContentItem, Topic};

// ============================================================================
// Display Preferences
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ThemeBrand {
    #[default]
    Default,
    Android,
}

impl ThemeBrand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeBrand::Default => "Default",
            ThemeBrand::Android => "Android",
        }
    }
}

impl fmt::Display for ThemeBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeBrand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(ThemeBrand::Default),
            "android" => Ok(ThemeBrand::Android),
            other => Err(format!("unknown theme brand '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum DarkThemeConfig {
    #[default]
    FollowSystem,
    Light,
    Dark,
}

impl DarkThemeConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            DarkThemeConfig::FollowSystem => "FollowSystem",
            DarkThemeConfig::Light => "Light",
            DarkThemeConfig::Dark => "Dark",
        }
    }
}

impl fmt::Display for DarkThemeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DarkThemeConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "followsystem" | "system" => Ok(DarkThemeConfig::FollowSystem),
            "light" => Ok(DarkThemeConfig::Light),
            "dark" => Ok(DarkThemeConfig::Dark),
            other => Err(format!("unknown dark theme config '{other}'")),
        }
    }
}

// ============================================================================
// User Data
// ============================================================================

/// Everything the user has chosen: follows, bookmarks, viewed items, display settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserData {
    pub bookmarked_content: BTreeSet<String>,
    pub viewed_content: BTreeSet<String>,
    pub followed_topics: BTreeSet<String>,
    pub theme_brand: ThemeBrand,
    pub dark_theme_config: DarkThemeConfig,
    pub use_dynamic_color: bool,
    pub should_hide_onboarding: bool,
}

// ============================================================================
// User-annotated Content
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowableTopic {
    pub topic: Topic,
    pub is_followed: bool,
}

impl FollowableTopic {
    pub fn new(topic: Topic, user_data: &UserData) -> Self {
        let is_followed = user_data.followed_topics.contains(&topic.id);
        Self { topic, is_followed }
    }
}

/// A [`ContentItem`] joined with the user's bookmark, follow and viewed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContentItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub header_image_url: Option<String>,
    pub publish_date: i64,
    pub content_type: String,
    pub followable_topics: Vec<FollowableTopic>,
    pub is_saved: bool,
    pub has_been_viewed: bool,
}

impl UserContentItem {
    pub fn new(item: &ContentItem, user_data: &UserData) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            content: item.content.clone(),
            url: item.url.clone(),
            header_image_url: item.header_image_url.clone(),
            publish_date: item.publish_date,
            content_type: item.content_type.clone(),
            followable_topics: item
                .topics
                .iter()
                .map(|topic| FollowableTopic::new(topic.clone(), user_data))
                .collect(),
            is_saved: user_data.bookmarked_content.contains(&item.id),
            has_been_viewed: user_data.viewed_content.contains(&item.id),
        }
    }

    /// Whether any of the item's topics is followed.
    pub fn is_followed_via_topic(&self) -> bool {
        self.followable_topics.iter().any(|t| t.is_followed)
    }
}

/// Annotate every item, keeping the input order.
pub fn map_to_user_content(items: &[ContentItem], user_data: &UserData) -> Vec<UserContentItem> {
    items
        .iter()
        .map(|item| UserContentItem::new(item, user_data))
        .collect()
}

/// Search hits annotated with user state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserSearchResult {
    pub topics: Vec<FollowableTopic>,
    pub content: Vec<UserContentItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: &str) -> Topic {
        Topic {
            id: id.to_string(),
            name: format!("Topic {id}"),
            short_description: String::new(),
            long_description: String::new(),
            url: String::new(),
            image_url: String::new(),
        }
    }

    fn item(id: &str, topics: &[&str]) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            title: format!("Item {id}"),
            content: String::new(),
            url: String::new(),
            header_image_url: None,
            publish_date: 0,
            content_type: "Article".to_string(),
            topics: topics.iter().map(|t| topic(t)).collect(),
        }
    }

    #[test]
    fn test_flags_follow_user_data() {
        let user_data = UserData {
            bookmarked_content: BTreeSet::from(["a".to_string()]),
            viewed_content: BTreeSet::from(["b".to_string()]),
            followed_topics: BTreeSet::from(["t2".to_string()]),
            ..UserData::default()
        };

        let items = map_to_user_content(&[item("a", &["t1"]), item("b", &["t1", "t2"])], &user_data);

        assert_eq!(items[0].id, "a");
        assert!(items[0].is_saved);
        assert!(!items[0].has_been_viewed);
        assert!(!items[0].is_followed_via_topic());

        assert!(!items[1].is_saved);
        assert!(items[1].has_been_viewed);
        assert!(items[1].is_followed_via_topic());
        assert!(!items[1].followable_topics[0].is_followed);
        assert!(items[1].followable_topics[1].is_followed);
    }

    #[test]
    fn test_preference_enums_parse_loosely() {
        assert_eq!("android".parse::<ThemeBrand>(), Ok(ThemeBrand::Android));
        assert_eq!(
            "follow-system".parse::<DarkThemeConfig>(),
            Ok(DarkThemeConfig::FollowSystem)
        );
        assert_eq!(
            DarkThemeConfig::Dark.as_str().parse::<DarkThemeConfig>(),
            Ok(DarkThemeConfig::Dark)
        );
        assert!("neon".parse::<ThemeBrand>().is_err());
    }
}
