//! Offline-first news data layer.
//!
//! A SQLite cache of topics and content ([`storage`]), repositories that
//! join it with the user's choices as live streams ([`data`]), per-screen
//! state holders ([`feature`]), and the stream plumbing they share
//! ([`stream`]).

pub mod analytics;
pub mod config;
pub mod data;
pub mod feature;
pub mod storage;
pub mod stream;
pub mod timezone;
