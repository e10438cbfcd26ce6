use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A cached response for a caller-supplied idempotency key.
///
/// Invariant: a key maps to exactly one stored response, forever. The first
/// completed execution wins; later writes with the same key are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub response_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
