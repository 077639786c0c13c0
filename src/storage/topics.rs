use futures::stream::BoxStream;
use sqlx::{QueryBuilder, Sqlite};

use super::content::json_id_list;
use super::invalidation::Table;
use super::schema::Database;
use super::types::{DatabaseError, Topic};

impl Database {
    // ========================================================================
    // Topic Operations
    // ========================================================================

    /// Insert topics, or update the fields of topics whose id exists.
    pub async fn upsert_topics(&self, topics: &[Topic]) -> Result<usize, DatabaseError> {
        if topics.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in topics.chunks(50) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO topics (id, name, short_description, long_description, url, image_url) ",
            );
            builder.push_values(chunk, |mut b, topic| {
                b.push_bind(topic.id.clone())
                    .push_bind(topic.name.clone())
                    .push_bind(topic.short_description.clone())
                    .push_bind(topic.long_description.clone())
                    .push_bind(topic.url.clone())
                    .push_bind(topic.image_url.clone());
            });
            builder.push(
                " ON CONFLICT(id) DO UPDATE SET \
                 name = excluded.name, \
                 short_description = excluded.short_description, \
                 long_description = excluded.long_description, \
                 url = excluded.url, \
                 image_url = excluded.image_url",
            );
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        self.invalidate(&[Table::Topics]);
        Ok(topics.len())
    }

    /// Delete topics by id, along with their content links.
    pub async fn delete_topics(&self, ids: &[String]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = sqlx::query("DELETE FROM topics WHERE id IN (SELECT value FROM json_each(?))")
            .bind(json_id_list(ids))
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            self.invalidate(&[Table::Topics, Table::ContentTopicLinks]);
        }
        Ok(deleted)
    }

    /// All topics ordered by name.
    pub async fn get_topics(&self) -> Result<Vec<Topic>, DatabaseError> {
        let topics = sqlx::query_as::<_, Topic>(
            r#"
            SELECT id, name, short_description, long_description, url, image_url
            FROM topics
            ORDER BY name, id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(topics)
    }

    /// Topics with the given ids, ordered by name. Unknown ids are skipped.
    pub async fn get_topics_by_ids(&self, ids: &[String]) -> Result<Vec<Topic>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let topics = sqlx::query_as::<_, Topic>(
            r#"
            SELECT id, name, short_description, long_description, url, image_url
            FROM topics
            WHERE id IN (SELECT value FROM json_each(?))
            ORDER BY name, id
        "#,
        )
        .bind(json_id_list(ids))
        .fetch_all(&self.pool)
        .await?;
        Ok(topics)
    }

    pub async fn get_topic(&self, id: &str) -> Result<Option<Topic>, DatabaseError> {
        let topic = sqlx::query_as::<_, Topic>(
            r#"
            SELECT id, name, short_description, long_description, url, image_url
            FROM topics
            WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(topic)
    }

    pub async fn get_topic_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM topics ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Live version of [`Database::get_topics`].
    pub fn observe_topics(&self) -> BoxStream<'static, Result<Vec<Topic>, DatabaseError>> {
        self.observe(&[Table::Topics], |db| async move { db.get_topics().await })
    }

    /// Live version of [`Database::get_topics_by_ids`].
    pub fn observe_topics_by_ids(
        &self,
        ids: Vec<String>,
    ) -> BoxStream<'static, Result<Vec<Topic>, DatabaseError>> {
        self.observe(&[Table::Topics], move |db| {
            let ids = ids.clone();
            async move { db.get_topics_by_ids(&ids).await }
        })
    }

    /// Live version of [`Database::get_topic`].
    pub fn observe_topic(
        &self,
        id: String,
    ) -> BoxStream<'static, Result<Option<Topic>, DatabaseError>> {
        self.observe(&[Table::Topics], move |db| {
            let id = id.clone();
            async move { db.get_topic(&id).await }
        })
    }
}
