use sqlx::PgConnection;

use crate::error::ApiError;
use crate::events::models::EventCreate;

/// Append-only event sink. Events are never updated or deleted; the
/// redemption quota checks count them, analytics consumes them elsewhere.
///
/// Every method takes a transaction connection: event writes are only ever
/// part of a larger atomic unit.
#[derive(Clone)]
pub struct EventRepository;

impl EventRepository {
    pub fn new() -> Self {
        Self
    }

    /// Record one event. Takes the caller's transaction connection so the
    /// write commits or rolls back together with the business mutation.
    pub async fn record(
        &self,
        conn: &mut PgConnection,
        event: EventCreate,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO events (name, actor_type, actor_id, entity_type, entity_id, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.name.as_str())
        .bind(event.actor_type)
        .bind(event.actor_id)
        .bind(event.entity_type)
        .bind(event.entity_id)
        .bind(event.payload)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Count redemption events recorded against any coupon of a template.
    /// Must run inside the transaction that holds the template row lock,
    /// otherwise two concurrent redemptions could both pass a boundary check.
    pub async fn count_redemptions_for_template(
        &self,
        conn: &mut PgConnection,
        template_id: i64,
    ) -> Result<i64, ApiError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events
            WHERE name = 'coupon_redeemed'
              AND (payload ->> 'template_id')::BIGINT = $1
            "#,
        )
        .bind(template_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }

    /// Count redemption events for one client under one template
    pub async fn count_redemptions_for_client_and_template(
        &self,
        conn: &mut PgConnection,
        client_id: i64,
        template_id: i64,
    ) -> Result<i64, ApiError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events
            WHERE name = 'coupon_redeemed'
              AND (payload ->> 'client_id')::BIGINT = $1
              AND (payload ->> 'template_id')::BIGINT = $2
            "#,
        )
        .bind(client_id)
        .bind(template_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }
}
