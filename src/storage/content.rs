use futures::stream::BoxStream;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;

use super::invalidation::Table;
use super::schema::Database;
use super::types::{
    ContentDbRow, ContentItem, ContentQuery, ContentTopicLink, DatabaseError, LinkedTopicRow,
    NewContentItem, Topic,
};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of content rows returned from any single query (OOM protection)
const MAX_CONTENT: i64 = 2000;

/// Rows per multi-row INSERT; 7 columns * 50 stays far below SQLite's bind limit.
const BATCH_SIZE: usize = 50;

/// Ids per `IN (...)` list when loading topic links.
const ID_CHUNK: usize = 500;

/// Tables a content read depends on.
const CONTENT_TABLES: &[Table] = &[Table::ContentItems, Table::ContentTopicLinks, Table::Topics];

/// Encode ids as a JSON array for a single `json_each(?)` bind.
///
/// One bind per set keeps filters on large bookmark or follow sets under
/// SQLite's variable limit.
pub(super) fn json_id_list<'a>(ids: impl IntoIterator<Item = &'a String>) -> String {
    serde_json::Value::from(ids.into_iter().cloned().collect::<Vec<String>>()).to_string()
}

/// Append the WHERE clause shared by every filtered content query.
fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ContentQuery) {
    builder.push(" WHERE 1 = 1");

    if let Some(ids) = &query.filter_content_ids {
        builder.push(" AND id IN (SELECT value FROM json_each(");
        builder.push_bind(json_id_list(ids));
        builder.push("))");
    }

    if let Some(topic_ids) = &query.filter_topic_ids {
        builder.push(
            " AND id IN (SELECT content_id FROM content_topic_links \
             WHERE topic_id IN (SELECT value FROM json_each(",
        );
        builder.push_bind(json_id_list(topic_ids));
        builder.push(")))");
    }

    // Newest first; equal timestamps keep insertion order
    builder.push(" ORDER BY publish_date DESC, rowid ASC LIMIT ");
    builder.push_bind(MAX_CONTENT);
}

impl Database {
    // ========================================================================
    // Content Mutations
    // ========================================================================

    /// Insert content rows, or update every field of rows whose id exists.
    ///
    /// Uses `ON CONFLICT DO UPDATE` rather than `INSERT OR REPLACE`: a replace
    /// deletes the old row first, which would cascade away its topic links.
    pub async fn upsert_content(&self, items: &[NewContentItem]) -> Result<usize, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO content_items (id, title, content, url, header_image_url, publish_date, content_type) ",
            );
            builder.push_values(chunk, |mut b, item| {
                b.push_bind(item.id.clone())
                    .push_bind(item.title.clone())
                    .push_bind(item.content.clone())
                    .push_bind(item.url.clone())
                    .push_bind(item.header_image_url.clone())
                    .push_bind(item.publish_date)
                    .push_bind(item.content_type.clone());
            });
            builder.push(
                " ON CONFLICT(id) DO UPDATE SET \
                 title = excluded.title, \
                 content = excluded.content, \
                 url = excluded.url, \
                 header_image_url = excluded.header_image_url, \
                 publish_date = excluded.publish_date, \
                 content_type = excluded.content_type",
            );
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::debug!(count = items.len(), "Upserted content items");
        self.invalidate(&[Table::ContentItems]);
        Ok(items.len())
    }

    /// Add content/topic links. Existing links are left untouched.
    ///
    /// Returns the number of links that were new.
    pub async fn insert_or_ignore_topic_links(
        &self,
        links: &[ContentTopicLink],
    ) -> Result<u64, DatabaseError> {
        if links.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for chunk in links.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO content_topic_links (content_id, topic_id) ");
            builder.push_values(chunk, |mut b, link| {
                b.push_bind(link.content_id.clone())
                    .push_bind(link.topic_id.clone());
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        if inserted > 0 {
            self.invalidate(&[Table::ContentTopicLinks]);
        }
        Ok(inserted)
    }

    /// Delete content rows by id. Their topic links go with them (ON DELETE CASCADE).
    pub async fn delete_content(&self, ids: &[String]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for chunk in ids.chunks(ID_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM content_items WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(")");
            deleted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        tracing::debug!(requested = ids.len(), deleted, "Deleted content items");
        if deleted > 0 {
            self.invalidate(&[Table::ContentItems, Table::ContentTopicLinks]);
        }
        Ok(deleted)
    }

    // ========================================================================
    // Content Queries
    // ========================================================================

    /// Content matching `query`, newest first, each with its linked topics.
    pub async fn get_content(&self, query: &ContentQuery) -> Result<Vec<ContentItem>, DatabaseError> {
        if query.matches_nothing() {
            return Ok(Vec::new());
        }

        // One read transaction so rows and links come from the same snapshot
        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, title, content, url, header_image_url, publish_date, content_type FROM content_items",
        );
        push_filters(&mut builder, query);
        let rows: Vec<ContentDbRow> = builder.build_query_as().fetch_all(&mut *tx).await?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut topics = topics_for_content(&mut *tx, &ids).await?;
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let linked = topics.remove(&row.id).unwrap_or_default();
                row.into_item(linked)
            })
            .collect())
    }

    /// Ids of content matching `query`, in the same order as [`Database::get_content`].
    pub async fn get_content_ids(&self, query: &ContentQuery) -> Result<Vec<String>, DatabaseError> {
        if query.matches_nothing() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM content_items");
        push_filters(&mut builder, query);
        let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Live version of [`Database::get_content`].
    pub fn observe_content(
        &self,
        query: ContentQuery,
    ) -> BoxStream<'static, Result<Vec<ContentItem>, DatabaseError>> {
        self.observe(CONTENT_TABLES, move |db| {
            let query = query.clone();
            async move { db.get_content(&query).await }
        })
    }

    /// Live version of [`Database::get_content_ids`].
    pub fn observe_content_ids(
        &self,
        query: ContentQuery,
    ) -> BoxStream<'static, Result<Vec<String>, DatabaseError>> {
        self.observe(&[Table::ContentItems, Table::ContentTopicLinks], move |db| {
            let query = query.clone();
            async move { db.get_content_ids(&query).await }
        })
    }
}

/// Topics linked to each of `content_ids`, sorted by name within each entry.
async fn topics_for_content(
    conn: &mut SqliteConnection,
    content_ids: &[String],
) -> Result<HashMap<String, Vec<Topic>>, DatabaseError> {
    let mut by_content: HashMap<String, Vec<Topic>> = HashMap::new();

    for chunk in content_ids.chunks(ID_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"SELECT l.content_id, t.id, t.name, t.short_description, t.long_description, t.url, t.image_url
               FROM content_topic_links l
               INNER JOIN topics t ON t.id = l.topic_id
               WHERE l.content_id IN ("#,
        );
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(") ORDER BY t.name, t.id");

        let rows: Vec<LinkedTopicRow> = builder.build_query_as().fetch_all(&mut *conn).await?;
        for (content_id, topic) in rows.into_iter().map(LinkedTopicRow::into_pair) {
            by_content.entry(content_id).or_default().push(topic);
        }
    }

    Ok(by_content)
}
