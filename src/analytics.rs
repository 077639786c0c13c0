//! Analytics events emitted after successful user-data mutations.
//!
//! Logging an event is fire-and-forget: helpers return `()` and must never
//! block or fail the mutation that produced the event.
use std::sync::{Mutex, PoisonError};

// ============================================================================
// Events
// ============================================================================

/// A key/value parameter attached to an [`AnalyticsEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsEvent {
    pub event_type: String,
    pub extras: Vec<Param>,
}

impl AnalyticsEvent {
    pub fn new(event_type: impl Into<String>, extras: Vec<Param>) -> Self {
        Self {
            event_type: event_type.into(),
            extras,
        }
    }

    pub fn topic_follow_toggled(topic_id: &str, followed: bool) -> Self {
        let event_type = if followed {
            "topic_followed"
        } else {
            "topic_unfollowed"
        };
        Self::new(event_type, vec![Param::new("followed_topic_id", topic_id)])
    }

    pub fn bookmark_toggled(content_id: &str, bookmarked: bool) -> Self {
        let event_type = if bookmarked {
            "news_resource_saved"
        } else {
            "news_resource_unsaved"
        };
        Self::new(event_type, vec![Param::new("news_resource_id", content_id)])
    }

    pub fn theme_changed(theme_name: &str) -> Self {
        Self::new("theme_changed", vec![Param::new("theme_name", theme_name)])
    }

    pub fn dark_theme_config_changed(config_name: &str) -> Self {
        Self::new(
            "dark_theme_config_changed",
            vec![Param::new("dark_theme_config", config_name)],
        )
    }

    pub fn dynamic_color_preference_changed(use_dynamic_color: bool) -> Self {
        Self::new(
            "dynamic_color_preference_changed",
            vec![Param::new(
                "dynamic_color_preference",
                use_dynamic_color.to_string(),
            )],
        )
    }

    pub fn onboarding_state_changed(hide_onboarding: bool) -> Self {
        let event_type = if hide_onboarding {
            "onboarding_completed"
        } else {
            "onboarding_reset"
        };
        Self::new(event_type, Vec::new())
    }

    pub fn search_triggered(query: &str) -> Self {
        Self::new("search_query", vec![Param::new("search_query", query)])
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub trait AnalyticsHelper: Send + Sync {
    fn log_event(&self, event: AnalyticsEvent);
}

/// Writes every event to the `nowfeed::analytics` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalyticsHelper;

impl AnalyticsHelper for TracingAnalyticsHelper {
    fn log_event(&self, event: AnalyticsEvent) {
        let extras: Vec<String> = event
            .extras
            .iter()
            .map(|p| format!("{}={}", p.key, p.value))
            .collect();
        tracing::info!(
            target: "nowfeed::analytics",
            event = %event.event_type,
            extras = %extras.join(","),
            "analytics event"
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpAnalyticsHelper;

impl AnalyticsHelper for NoOpAnalyticsHelper {
    fn log_event(&self, _event: AnalyticsEvent) {}
}

/// Keeps every logged event in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct MemoryAnalyticsHelper {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl MemoryAnalyticsHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_logged(&self, event: &AnalyticsEvent) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(event)
    }
}

impl AnalyticsHelper for MemoryAnalyticsHelper {
    fn log_event(&self, event: AnalyticsEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
