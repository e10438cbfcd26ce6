use serde::{Deserialize, Serialize};

/// Who performed the action an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Admin,
    Bot,
    Staff,
    Client,
}

/// Event names the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    CouponIssued,
    CouponRedeemed,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::CouponIssued => "coupon_issued",
            EventName::CouponRedeemed => "coupon_redeemed",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload for one append-only event write
#[derive(Debug, Clone)]
pub struct EventCreate {
    pub name: EventName,
    pub actor_type: ActorType,
    pub actor_id: Option<i64>,
    pub entity_type: &'static str,
    pub entity_id: i64,
    pub payload: serde_json::Value,
}
