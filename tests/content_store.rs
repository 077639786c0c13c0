//! Integration tests for the content store: filters, ordering and upserts.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use futures::StreamExt;
use nowfeed::storage::{ContentQuery, ContentTopicLink, Database, NewContentItem, Topic};
use pretty_assertions::assert_eq;

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

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

fn item(id: &str, title: &str, publish_date: i64) -> NewContentItem {
    NewContentItem {
        id: id.to_string(),
        title: title.to_string(),
        content: format!("Body of {title}"),
        url: format!("https://example.com/{id}"),
        header_image_url: None,
        publish_date,
        content_type: "Article".to_string(),
    }
}

fn link(content_id: &str, topic_id: &str) -> ContentTopicLink {
    ContentTopicLink {
        content_id: content_id.to_string(),
        topic_id: topic_id.to_string(),
    }
}

const JAN_1: i64 = 1_704_067_200;
const JAN_2: i64 = 1_704_153_600;

/// A(T1, Jan 2), B(T2, Jan 1), C(T1 and T2, Jan 1 + 1s)
async fn seed(db: &Database) {
    db.upsert_topics(&[topic("T1"), topic("T2")]).await.unwrap();
    db.upsert_content(&[
        item("A", "Alpha", JAN_2),
        item("B", "Beta", JAN_1),
        item("C", "Gamma", JAN_1 + 1),
    ])
    .await
    .unwrap();
    db.insert_or_ignore_topic_links(&[link("A", "T1"), link("B", "T2"), link("C", "T1"), link("C", "T2")])
        .await
        .unwrap();
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_topic_filter_ignores_recency_of_other_topics() {
    let db = test_db().await;
    db.upsert_topics(&[topic("T1"), topic("T2")]).await.unwrap();
    db.upsert_content(&[item("A", "Alpha", JAN_2), item("B", "Beta", JAN_1)])
        .await
        .unwrap();
    db.insert_or_ignore_topic_links(&[link("A", "T1"), link("B", "T2")])
        .await
        .unwrap();

    let ids = db
        .get_content_ids(&ContentQuery::with_topic_ids(["T1"]))
        .await
        .unwrap();
    assert_eq!(ids, vec!["A"]);
}

#[tokio::test]
async fn test_no_filter_returns_everything_newest_first() {
    let db = test_db().await;
    seed(&db).await;

    let ids = db.get_content_ids(&ContentQuery::all()).await.unwrap();
    assert_eq!(ids, vec!["A", "C", "B"]);
}

#[tokio::test]
async fn test_two_filters_intersect() {
    let db = test_db().await;
    seed(&db).await;

    let query = ContentQuery {
        filter_topic_ids: Some(["T2".to_string()].into()),
        filter_content_ids: Some(["A".to_string(), "C".to_string()].into()),
    };
    assert_eq!(db.get_content_ids(&query).await.unwrap(), vec!["C"]);
}

#[tokio::test]
async fn test_item_with_two_matching_topics_listed_once() {
    let db = test_db().await;
    seed(&db).await;

    let items = db
        .get_content(&ContentQuery::with_topic_ids(["T1", "T2"]))
        .await
        .unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C", "B"]);

    let c = &items[1];
    let mut topics: Vec<&str> = c.topic_ids().collect();
    topics.sort_unstable();
    assert_eq!(topics, vec!["T1", "T2"]);
}

#[tokio::test]
async fn test_empty_filter_set_matches_nothing() {
    let db = test_db().await;
    seed(&db).await;

    let none: [&str; 0] = [];
    assert!(db
        .get_content_ids(&ContentQuery::with_topic_ids(none))
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Upserts
// ============================================================================

#[tokio::test]
async fn test_upsert_replaces_fields_and_keeps_topic_links() {
    let db = test_db().await;
    seed(&db).await;

    db.upsert_content(&[item("B", "Beta, revised", JAN_2 + 10)])
        .await
        .unwrap();

    let items = db.get_content(&ContentQuery::with_content_ids(["B"])).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Beta, revised");
    assert_eq!(items[0].content, "Body of Beta, revised");
    assert_eq!(items[0].publish_date, JAN_2 + 10);
    assert_eq!(items[0].topic_ids().collect::<Vec<_>>(), vec!["T2"]);

    // New date moves it to the front
    let ids = db.get_content_ids(&ContentQuery::all()).await.unwrap();
    assert_eq!(ids, vec!["B", "A", "C"]);
}

#[tokio::test]
async fn test_duplicate_links_are_ignored() {
    let db = test_db().await;
    seed(&db).await;

    db.insert_or_ignore_topic_links(&[link("A", "T1")]).await.unwrap();
    let items = db.get_content(&ContentQuery::with_content_ids(["A"])).await.unwrap();
    assert_eq!(items[0].topic_ids().count(), 1);
}

// ============================================================================
// Live Queries
// ============================================================================

#[tokio::test]
async fn test_live_query_follows_writes_and_deletes() {
    let db = test_db().await;
    seed(&db).await;

    let mut live = db.observe_content_ids(ContentQuery::with_topic_ids(["T1"]));
    assert_eq!(live.next().await.unwrap().unwrap(), vec!["A", "C"]);

    db.upsert_content(&[item("D", "Delta", JAN_2 + 1)]).await.unwrap();
    db.insert_or_ignore_topic_links(&[link("D", "T1")]).await.unwrap();
    // The upsert and the link may surface as one or two emissions
    let mut ids = live.next().await.unwrap().unwrap();
    if ids != vec!["D", "A", "C"] {
        ids = live.next().await.unwrap().unwrap();
    }
    assert_eq!(ids, vec!["D", "A", "C"]);

    db.delete_topics(&["T1".to_string()]).await.unwrap();
    loop {
        let ids = live.next().await.unwrap().unwrap();
        if ids.is_empty() {
            break;
        }
    }
}
