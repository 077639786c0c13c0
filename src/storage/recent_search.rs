use futures::stream::BoxStream;

use super::invalidation::Table;
use super::schema::Database;
use super::types::{DatabaseError, RecentSearchQuery};

impl Database {
    // ========================================================================
    // Recent Search Operations
    // ========================================================================

    /// Record a search. An identical query text is replaced, moving it to the front.
    pub async fn insert_or_replace_recent_search(
        &self,
        query: &str,
        queried_date: i64,
    ) -> Result<(), DatabaseError> {
        // REPLACE deletes and re-inserts, so the row also gets a fresh rowid,
        // which breaks timestamp ties in favour of the latest insert
        sqlx::query("INSERT OR REPLACE INTO recent_search_queries (query, queried_date) VALUES (?, ?)")
            .bind(query)
            .bind(queried_date)
            .execute(&self.pool)
            .await?;

        self.invalidate(&[Table::RecentSearchQueries]);
        Ok(())
    }

    /// Keep only the `keep` most recent searches. Returns how many were dropped.
    pub async fn trim_recent_searches(&self, keep: usize) -> Result<u64, DatabaseError> {
        let keep: i64 = keep.try_into().unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            DELETE FROM recent_search_queries
            WHERE rowid NOT IN (
                SELECT rowid FROM recent_search_queries
                ORDER BY queried_date DESC, rowid DESC
                LIMIT ?
            )
        "#,
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.invalidate(&[Table::RecentSearchQueries]);
        }
        Ok(result.rows_affected())
    }

    /// Most recent searches first, at most `limit` of them.
    pub async fn get_recent_searches(
        &self,
        limit: usize,
    ) -> Result<Vec<RecentSearchQuery>, DatabaseError> {
        let limit: i64 = limit.try_into().unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, RecentSearchQuery>(
            r#"
            SELECT query, queried_date
            FROM recent_search_queries
            ORDER BY queried_date DESC, rowid DESC
            LIMIT ?
        "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn clear_recent_searches(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM recent_search_queries")
            .execute(&self.pool)
            .await?;
        self.invalidate(&[Table::RecentSearchQueries]);
        Ok(result.rows_affected())
    }

    /// Live version of [`Database::get_recent_searches`].
    pub fn observe_recent_searches(
        &self,
        limit: usize,
    ) -> BoxStream<'static, Result<Vec<RecentSearchQuery>, DatabaseError>> {
        self.observe(&[Table::RecentSearchQueries], move |db| async move {
            db.get_recent_searches(limit).await
        })
    }
}
