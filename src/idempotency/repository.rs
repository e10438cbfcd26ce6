use sqlx::{PgConnection, PgPool};

use crate::error::ApiError;
use crate::idempotency::models::IdempotencyRecord;

/// Key→response cache backed by a table with a primary-key uniqueness
/// constraint
#[derive(Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a previously cached response
    pub async fn get_by_key(&self, key: &str) -> Result<Option<IdempotencyRecord>, ApiError> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT idempotency_key, response_payload, created_at
            FROM idempotency_requests
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Store a response under a key unless one already exists.
    ///
    /// Runs on the caller's transaction connection so the cache write commits
    /// atomically with the redemption it records; a crash between execution
    /// and caching is therefore impossible.
    ///
    /// Returns whether this call won the key. `false` means another request
    /// with the same key committed first; the caller must discard its own
    /// execution and answer with the stored response. A concurrent insert on
    /// the same key blocks here until the holding transaction ends, so the
    /// loser always observes the winner's committed row.
    pub async fn put_if_absent(
        &self,
        conn: &mut PgConnection,
        key: &str,
        response_payload: &serde_json::Value,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_requests (idempotency_key, response_payload)
            VALUES ($1, $2)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(response_payload)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
