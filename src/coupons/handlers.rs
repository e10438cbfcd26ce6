// HTTP handlers for coupon endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::coupons::{Coupon, IssueCouponRequest, RedeemCouponRequest, RedemptionResult};
use crate::error::ApiError;

/// Handler for POST /api/coupons/issue
/// Issues a new coupon to a client from a template (and optional campaign)
#[utoipa::path(
    post,
    path = "/api/coupons/issue",
    request_body = IssueCouponRequest,
    responses(
        (status = 201, description = "Coupon issued successfully", body = Coupon),
        (status = 400, description = "Eligibility conditions not met or invalid input", body = crate::error::ErrorResponse),
        (status = 404, description = "Client, template or campaign not found", body = crate::error::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn issue_coupon_handler(
    State(state): State<crate::AppState>,
    Json(request): Json<IssueCouponRequest>,
) -> Result<(StatusCode, Json<Coupon>), ApiError> {
    request.validate().map_err(ApiError::ValidationError)?;

    let coupon = state.coupon_service.issue_coupon(request).await?;

    Ok((StatusCode::CREATED, Json(coupon)))
}

/// Handler for POST /api/coupons/redeem
/// Redeems a coupon against a purchase at a staff terminal
#[utoipa::path(
    post,
    path = "/api/coupons/redeem",
    request_body = RedeemCouponRequest,
    responses(
        (status = 200, description = "Coupon redeemed successfully", body = RedemptionResult),
        (status = 400, description = "Validation failed (expired, min purchase, conditions)", body = crate::error::ErrorResponse),
        (status = 404, description = "Coupon or client not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Already redeemed or usage limit exceeded", body = crate::error::ErrorResponse),
        (status = 503, description = "Lock wait timed out, retry", body = crate::error::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn redeem_coupon_handler(
    State(state): State<crate::AppState>,
    Json(request): Json<RedeemCouponRequest>,
) -> Result<Json<RedemptionResult>, ApiError> {
    request.validate().map_err(ApiError::ValidationError)?;

    let result = state.redemption_service.redeem_coupon(request).await?;

    Ok(Json(result))
}

/// Handler for GET /api/coupons/{code}
/// Looks up a coupon by its code
#[utoipa::path(
    get,
    path = "/api/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code, e.g. SU-12345")),
    responses(
        (status = 200, description = "Coupon found", body = Coupon),
        (status = 404, description = "No coupon with this code", body = crate::error::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn get_coupon_handler(
    State(state): State<crate::AppState>,
    Path(code): Path<String>,
) -> Result<Json<Coupon>, ApiError> {
    let coupon = state
        .coupon_repo
        .find_by_code(&code)
        .await?
        .ok_or(ApiError::CouponNotFound { code })?;

    Ok(Json(coupon))
}
