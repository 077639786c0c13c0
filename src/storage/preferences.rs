use super::invalidation::Table;
use super::schema::Database;
use super::types::DatabaseError;

impl Database {
    // ========================================================================
    // User Preferences Operations
    // ========================================================================

    /// Get a single preference value by key.
    ///
    /// Keys use dotted convention: `theme.brand`, `bookmark.<id>`, `sync.topic_version`, etc.
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a preference value (UPSERT).
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        self.invalidate(&[Table::UserPreferences]);
        Ok(())
    }

    /// Remove a preference. Returns whether a row existed.
    pub async fn delete_preference(&self, key: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.invalidate(&[Table::UserPreferences]);
        }
        Ok(result.rows_affected() > 0)
    }

    /// Get all preferences matching a key prefix, ordered by key.
    ///
    /// `theme.` matches `theme.brand` but not `thematic.value`.
    pub async fn get_preferences_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, DatabaseError> {
        // substr() instead of LIKE: ids may contain `%` or `_`
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM user_preferences WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Replace every key under `prefix` with `entries` in one transaction.
    pub async fn replace_preferences_with_prefix(
        &self,
        prefix: &str,
        entries: &[(String, String)],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_preferences WHERE substr(key, 1, length(?1)) = ?1")
            .bind(prefix)
            .execute(&mut *tx)
            .await?;

        for (key, value) in entries {
            if !key.starts_with(prefix) {
                return Err(DatabaseError::InvalidQuery(format!(
                    "key '{key}' is outside prefix '{prefix}'"
                )));
            }
            sqlx::query(
                "INSERT INTO user_preferences (key, value, updated_at) VALUES (?, ?, datetime('now'))",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.invalidate(&[Table::UserPreferences]);
        Ok(())
    }
}
