// Error handling module for the loyalty API
// Provides the domain error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::coupons::CouponStatus;

/// Main error type for the API
///
/// Domain errors are recoverable by the caller by correcting the request;
/// infrastructure errors (`LockTimeout`, `DatabaseError`) are safe to retry
/// as-is. Every error aborts the surrounding transaction with full rollback
/// before it reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request validation failed")]
    ValidationError(validator::ValidationErrors),

    #[error("Coupon not found: {code}")]
    CouponNotFound { code: String },

    #[error("Coupon is not redeemable in status {status}")]
    CouponInvalidStatus { status: CouponStatus },

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Coupon has already been redeemed")]
    CouponAlreadyRedeemed,

    #[error("Coupon does not belong to this client")]
    CouponClientMismatch,

    #[error("Minimum purchase amount of {min_purchase} not met")]
    CouponMinPurchaseNotMet {
        min_purchase: Decimal,
        amount: Decimal,
    },

    #[error("Coupon conditions not met: {reason}")]
    CouponConditionsNotMet { reason: String },

    #[error("Coupon usage limit exceeded")]
    CouponUsageLimitExceeded,

    #[error("Per-client usage limit exceeded")]
    CouponPerUserLimitExceeded,

    #[error("Client not found: {client_ref}")]
    ClientNotFound { client_ref: String },

    #[error("Coupon template not found: {template_id}")]
    TemplateNotFound { template_id: i64 },

    #[error("Campaign not found: {campaign_id}")]
    CampaignNotFound { campaign_id: i64 },

    #[error("Campaign {campaign_id} has no code prefix configured")]
    CampaignMissingCodePrefix { campaign_id: i64 },

    /// Malformed conditions or stacking rules on a template. This is an
    /// operator configuration problem, never silently ignored.
    #[error("Invalid rule configuration: {reason}")]
    InvalidRuleConfig { reason: String },

    /// Unique code generation gave up after the bounded retry count.
    #[error("Could not generate a unique coupon code")]
    CodeGenerationExhausted,

    /// Row lock acquisition exceeded the bounded wait. Retryable.
    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    #[error("Database error")]
    DatabaseError(sqlx::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Consistent error response body: `{code, message, details}`, suitable for
/// translation into any transport by the presentation layer.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Machine-readable error code for this variant
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ValidationError(_) => "E-VALIDATION",
            ApiError::CouponNotFound { .. } => "E-COUP-NOT-FOUND",
            ApiError::CouponInvalidStatus { .. } => "E-COUP-INVALID-STATUS",
            ApiError::CouponExpired => "E-COUP-EXPIRED",
            ApiError::CouponAlreadyRedeemed => "E-COUP-ALREADY-REDEEMED",
            ApiError::CouponClientMismatch => "E-COUP-CLIENT-MISMATCH",
            ApiError::CouponMinPurchaseNotMet { .. } => "E-COUP-MIN-PURCHASE",
            ApiError::CouponConditionsNotMet { .. } => "E-COUP-CONDITIONS",
            ApiError::CouponUsageLimitExceeded => "E-COUP-LIMIT",
            ApiError::CouponPerUserLimitExceeded => "E-COUP-USER-LIMIT",
            ApiError::ClientNotFound { .. } => "E-CLIENT-NOT-FOUND",
            ApiError::TemplateNotFound { .. } => "E-COUP-TPL-NOT-FOUND",
            ApiError::CampaignNotFound { .. } => "E-CAMPAIGN-NOT-FOUND",
            ApiError::CampaignMissingCodePrefix { .. } => "E-CAMPAIGN-NO-PREFIX",
            ApiError::InvalidRuleConfig { .. } => "E-RULE-CONFIG",
            ApiError::CodeGenerationExhausted => "E-CODE-GEN",
            ApiError::LockTimeout => "E-LOCK-TIMEOUT",
            ApiError::DatabaseError(_) => "E-DB",
            ApiError::InternalError(_) => "E-INTERNAL",
        }
    }

    /// True for errors the caller may retry without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::LockTimeout | ApiError::DatabaseError(_))
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::ValidationError(errors) => serde_json::to_value(errors).ok(),
            ApiError::CouponNotFound { code } => Some(json!({ "code": code })),
            ApiError::CouponInvalidStatus { status } => {
                Some(json!({ "status": status.as_str() }))
            }
            ApiError::CouponMinPurchaseNotMet {
                min_purchase,
                amount,
            } => Some(json!({ "min_purchase": min_purchase, "amount": amount })),
            ApiError::CouponConditionsNotMet { reason } => Some(json!({ "reason": reason })),
            ApiError::ClientNotFound { client_ref } => Some(json!({ "client_ref": client_ref })),
            ApiError::TemplateNotFound { template_id } => {
                Some(json!({ "template_id": template_id }))
            }
            ApiError::CampaignNotFound { campaign_id }
            | ApiError::CampaignMissingCodePrefix { campaign_id } => {
                Some(json!({ "campaign_id": campaign_id }))
            }
            ApiError::InvalidRuleConfig { reason } => Some(json!({ "reason": reason })),
            _ => None,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::CouponNotFound { .. }
            | ApiError::ClientNotFound { .. }
            | ApiError::TemplateNotFound { .. }
            | ApiError::CampaignNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::CouponInvalidStatus { .. }
            | ApiError::CouponExpired
            | ApiError::CouponClientMismatch
            | ApiError::CouponMinPurchaseNotMet { .. }
            | ApiError::CouponConditionsNotMet { .. }
            | ApiError::CampaignMissingCodePrefix { .. } => StatusCode::BAD_REQUEST,
            ApiError::CouponAlreadyRedeemed
            | ApiError::CouponUsageLimitExceeded
            | ApiError::CouponPerUserLimitExceeded => StatusCode::CONFLICT,
            ApiError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidRuleConfig { .. }
            | ApiError::CodeGenerationExhausted
            | ApiError::DatabaseError(_)
            | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_error_response(&self) -> (StatusCode, ErrorResponse) {
        let status = self.status_code();

        // Expected domain failures log at debug; conflicts and anything the
        // operator needs to act on log louder. Database details never reach
        // the client.
        let message = match self {
            ApiError::DatabaseError(db_error) => {
                error!("Database error: {:?}", db_error);
                "A database error occurred".to_string()
            }
            ApiError::InternalError(internal_msg) => {
                error!("Internal error: {}", internal_msg);
                "An internal server error occurred".to_string()
            }
            ApiError::InvalidRuleConfig { reason } => {
                error!("Invalid rule configuration: {}", reason);
                self.to_string()
            }
            ApiError::CodeGenerationExhausted => {
                error!("Coupon code generation exhausted its retry budget");
                self.to_string()
            }
            ApiError::LockTimeout => {
                warn!("Row lock wait exceeded the configured timeout");
                self.to_string()
            }
            other => {
                debug!("Domain error: {}", other);
                other.to_string()
            }
        };

        (
            status,
            ErrorResponse {
                code: self.code().to_string(),
                message,
                details: self.details(),
            },
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = self.to_error_response();
        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to ApiError, separating the retryable lock-timeout
/// condition (Postgres 55P03, raised when `lock_timeout` expires) from
/// ordinary database failures.
impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.code().as_deref() == Some("55P03") {
                return ApiError::LockTimeout;
            }
        }
        ApiError::DatabaseError(error)
    }
}

/// Convert validator errors to ApiError
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors)
    }
}
