use futures::stream::BoxStream;

use super::invalidation::Table;
use super::schema::Database;
use super::types::{DatabaseError, SearchMatches};

// ============================================================================
// FTS5 Query Validation
// ============================================================================

const MAX_QUERY_LENGTH: usize = 256;
const MAX_TERMS: usize = 10;

/// Maximum number of ids returned per entity kind (OOM protection)
const MAX_MATCHES: i64 = 500;

/// Turn free text into an FTS5 expression of quoted prefix terms.
///
/// Every term is wrapped in double quotes so user input can never be parsed
/// as FTS5 syntax (`OR`, `NEAR`, column filters). Terms combine with AND.
fn build_match_expression(query: &str) -> Result<String, DatabaseError> {
    if query.len() > MAX_QUERY_LENGTH {
        return Err(DatabaseError::InvalidQuery(format!(
            "search query exceeds maximum length of {MAX_QUERY_LENGTH} characters"
        )));
    }

    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\"*"))
        .collect();

    if terms.len() > MAX_TERMS {
        return Err(DatabaseError::InvalidQuery(format!(
            "search query contains too many terms (max {MAX_TERMS})"
        )));
    }

    Ok(terms.join(" "))
}

impl Database {
    // ========================================================================
    // Search Index Maintenance
    // ========================================================================

    /// Rebuild both search tables from `content_items` and `topics`.
    ///
    /// Returns the number of indexed entities.
    pub async fn populate_search_index(&self) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM content_fts").execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO content_fts (content_id, title, content) SELECT id, title, content FROM content_items",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM topics_fts").execute(&mut *tx).await?;
        sqlx::query(
            r#"
            INSERT INTO topics_fts (topic_id, name, short_description, long_description)
            SELECT id, name, short_description, long_description FROM topics
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.invalidate(&[Table::ContentFts, Table::TopicsFts]);

        let count = self.get_search_index_count().await?;
        tracing::info!(entities = count, "Search index populated");
        Ok(count)
    }

    /// Total rows across both search tables.
    pub async fn get_search_index_count(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM content_fts) + (SELECT COUNT(*) FROM topics_fts)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Live version of [`Database::get_search_index_count`].
    pub fn observe_search_index_count(&self) -> BoxStream<'static, Result<i64, DatabaseError>> {
        self.observe(&[Table::ContentFts, Table::TopicsFts], |db| async move {
            db.get_search_index_count().await
        })
    }

    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Ids of topics and content whose indexed text matches `query`, best match first.
    ///
    /// Uses FTS5 prefix matching, falling back to LIKE when FTS5 rejects the
    /// expression. A blank query matches nothing.
    pub async fn search(&self, query: &str) -> Result<SearchMatches, DatabaseError> {
        let expression = build_match_expression(query.trim())?;
        if expression.is_empty() {
            return Ok(SearchMatches::default());
        }

        tracing::debug!(query = %query, expression = %expression, "search");

        match self.search_fts(&expression).await {
            Ok(matches) => Ok(matches),
            Err(e) => {
                tracing::warn!(error = %e, query = %query, "FTS5 search failed, falling back to LIKE");
                self.search_like(query.trim()).await
            }
        }
    }

    async fn search_fts(&self, expression: &str) -> Result<SearchMatches, DatabaseError> {
        let content: Vec<(String,)> = sqlx::query_as(
            "SELECT content_id FROM content_fts WHERE content_fts MATCH ? ORDER BY rank LIMIT ?",
        )
        .bind(expression)
        .bind(MAX_MATCHES)
        .fetch_all(&self.pool)
        .await?;

        let topics: Vec<(String,)> = sqlx::query_as(
            "SELECT topic_id FROM topics_fts WHERE topics_fts MATCH ? ORDER BY rank LIMIT ?",
        )
        .bind(expression)
        .bind(MAX_MATCHES)
        .fetch_all(&self.pool)
        .await?;

        Ok(SearchMatches {
            topic_ids: topics.into_iter().map(|(id,)| id).collect(),
            content_ids: content.into_iter().map(|(id,)| id).collect(),
        })
    }

    async fn search_like(&self, query: &str) -> Result<SearchMatches, DatabaseError> {
        let pattern = format!("%{}%", query);

        let content: Vec<(String,)> = sqlx::query_as(
            "SELECT content_id FROM content_fts WHERE title LIKE ?1 OR content LIKE ?1 LIMIT ?2",
        )
        .bind(&pattern)
        .bind(MAX_MATCHES)
        .fetch_all(&self.pool)
        .await?;

        let topics: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT topic_id FROM topics_fts
            WHERE name LIKE ?1 OR short_description LIKE ?1 OR long_description LIKE ?1
            LIMIT ?2
        "#,
        )
        .bind(&pattern)
        .bind(MAX_MATCHES)
        .fetch_all(&self.pool)
        .await?;

        Ok(SearchMatches {
            topic_ids: topics.into_iter().map(|(id,)| id).collect(),
            content_ids: content.into_iter().map(|(id,)| id).collect(),
        })
    }

    /// Live version of [`Database::search`]; re-runs when the index is rebuilt.
    pub fn observe_search(
        &self,
        query: String,
    ) -> BoxStream<'static, Result<SearchMatches, DatabaseError>> {
        self.observe(&[Table::ContentFts, Table::TopicsFts], move |db| {
            let query = query.clone();
            async move { db.search(&query).await }
        })
    }
}
