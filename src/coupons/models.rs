use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::error::ApiError;
use crate::loyalty::ClientSummary;

/// Coupon status enum representing the lifecycle of a coupon
///
/// `Redeemed`, `Expired` and `Voided` are terminal for redemption. The engine
/// only ever writes the `Issued -> Redeemed` transition; expiry and voiding
/// happen outside this core and are honored read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CouponStatus {
    Draft,
    Active,
    Issued,
    Redeemed,
    Expired,
    Voided,
}

impl CouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponStatus::Draft => "draft",
            CouponStatus::Active => "active",
            CouponStatus::Issued => "issued",
            CouponStatus::Redeemed => "redeemed",
            CouponStatus::Expired => "expired",
            CouponStatus::Voided => "voided",
        }
    }

    /// Statuses a coupon may hold before redemption. Both `active` and
    /// `issued` are accepted.
    pub fn is_redeemable(&self) -> bool {
        matches!(self, CouponStatus::Active | CouponStatus::Issued)
    }
}

impl std::fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a template's discount value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percent,
    Fixed,
}

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Ended,
}

/// Reusable definition of a discount: type, value, limits and eligibility.
/// Immutable from the engine's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponTemplate {
    pub id: i64,
    pub name: String,
    pub code_pattern: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_purchase: Option<Decimal>,
    pub per_user_limit: Option<i32>,
    pub usage_limit: Option<i32>,
    pub expiration_days: Option<i32>,
    pub stacking_rules: serde_json::Value,
    pub conditions: serde_json::Value,
}

impl CouponTemplate {
    /// Templates without a global usage limit are single-use: redemption is
    /// a terminal state transition. A usage limit implies multi-use coupons
    /// drawn down against the event log.
    pub fn is_single_use(&self) -> bool {
        self.usage_limit.is_none()
    }

    /// Parse the stacking-rule JSONB into its typed form
    pub fn parsed_stacking_rules(&self) -> Result<StackingRules, ApiError> {
        serde_json::from_value(self.stacking_rules.clone()).map_err(|e| {
            ApiError::InvalidRuleConfig {
                reason: format!("template {}: bad stacking rules: {}", self.id, e),
            }
        })
    }

    /// Code prefix derived from the template's code pattern (the part before
    /// the dash)
    pub fn code_prefix(&self) -> &str {
        self.code_pattern
            .split('-')
            .next()
            .unwrap_or(&self.code_pattern)
    }
}

/// Configuration controlling whether a coupon discount may combine with
/// tier perks, and the resulting cap
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StackingRules {
    /// When false the coupon discount is final
    #[serde(default)]
    pub allow_sum: bool,
    /// Minimum tier rank required before perk discounts stack
    #[serde(default)]
    pub min_level: Option<i32>,
    /// Cap on the combined discount, as a percentage of the amount
    #[serde(default)]
    pub max_total_discount_percent: Option<Decimal>,
}

/// Marketing context supplying a code prefix for issuance attribution
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub template_id: Option<i64>,
    pub code_prefix: Option<String>,
    pub status: CampaignStatus,
}

/// A redeemable discount instance bound to a template and (usually) a client
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub template_id: i64,
    pub client_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub status: CouponStatus,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub redeemed_by_staff_id: Option<i64>,
    #[schema(value_type = Option<f64>)]
    pub redemption_amount: Option<Decimal>,
    pub fraud_flag: bool,
}

/// Insert payload for a freshly issued coupon
#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub code: String,
    pub template_id: i64,
    pub client_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub status: CouponStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request DTO for issuing a coupon to a client
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct IssueCouponRequest {
    #[validate(length(min = 1, message = "client_ref must not be empty"))]
    pub client_ref: String,
    pub template_id: i64,
    pub campaign_id: Option<i64>,
    /// Explicit expiry; wins over the template's expiration_days
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request DTO for redeeming a coupon at a staff terminal
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RedeemCouponRequest {
    #[validate(custom = "validate_code_format")]
    pub code: String,
    #[validate(length(min = 1, message = "client_ref must not be empty"))]
    pub client_ref: String,
    #[validate(custom = "validate_amount_positive")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    pub staff_id: i64,
    /// Caller-supplied token making retries of this request side-effect free
    pub idempotency_key: Option<String>,
}

fn validate_amount_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("amount_not_positive"))
    }
}

/// Coupon codes are two uppercase letters, a dash, and a five-digit suffix
fn validate_code_format(code: &str) -> Result<(), ValidationError> {
    let format = regex::Regex::new(r"^[A-Z]{2}-[0-9]{5}$")
        .map_err(|_| ValidationError::new("code_format"))?;
    if format.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError::new("code_format"))
    }
}

/// Result of a successful redemption, also the payload cached under the
/// idempotency key
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedemptionResult {
    pub code: String,
    #[schema(value_type = f64)]
    pub amount: Decimal,
    #[schema(value_type = f64)]
    pub discount: Decimal,
    #[schema(value_type = f64)]
    pub payable: Decimal,
    pub status: CouponStatus,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub client: ClientSummary,
}
