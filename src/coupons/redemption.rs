//! The redemption engine: atomically redeems a coupon exactly once under
//! concurrent requests.
//!
//! One redemption request is one transaction. The coupon row lock taken in
//! the first step serializes concurrent attempts on the same code; the
//! template row lock serializes quota checks across coupons sharing a
//! template; the client row lock serializes spend mutation against the
//! purchase-recording path. Any failure before commit rolls everything back,
//! so partial state is never observable.

use chrono::Utc;
use sqlx::PgPool;

use crate::coupons::conditions::{self, ConditionContext};
use crate::coupons::discount::DiscountCalculator;
use crate::coupons::models::{
    Coupon, CouponTemplate, RedeemCouponRequest, RedemptionResult,
};
use crate::coupons::repository::{CouponRepository, TemplateRepository};
use crate::error::ApiError;
use crate::events::{ActorType, EventCreate, EventName, EventRepository};
use crate::idempotency::IdempotencyRepository;
use crate::loyalty::{Client, ClientRepository, ClientSummary, LevelRepository, LoyaltyService};

/// Bound on row-lock waits inside a redemption transaction. Exceeding it
/// surfaces as a retryable `LockTimeout` instead of blocking the terminal.
const LOCK_TIMEOUT: &str = "3s";

/// Orchestrates validation, locking, discount computation, state transition,
/// tier recalculation and idempotent response caching as one atomic unit
#[derive(Clone)]
pub struct RedemptionService {
    pool: PgPool,
    coupon_repo: CouponRepository,
    template_repo: TemplateRepository,
    client_repo: ClientRepository,
    level_repo: LevelRepository,
    loyalty_service: LoyaltyService,
    event_repo: EventRepository,
    idempotency_repo: IdempotencyRepository,
}

impl RedemptionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        coupon_repo: CouponRepository,
        template_repo: TemplateRepository,
        client_repo: ClientRepository,
        level_repo: LevelRepository,
        loyalty_service: LoyaltyService,
        event_repo: EventRepository,
        idempotency_repo: IdempotencyRepository,
    ) -> Self {
        Self {
            pool,
            coupon_repo,
            template_repo,
            client_repo,
            level_repo,
            loyalty_service,
            event_repo,
            idempotency_repo,
        }
    }

    /// Redeem a coupon.
    ///
    /// When an idempotency key is supplied and a cached response exists, the
    /// cached result is returned unchanged and no side effect executes, even
    /// if the request payload differs.
    /// Otherwise the redemption runs in a single transaction and, on
    /// success, the response is stored under the key inside that same
    /// transaction. Only successful redemptions are cached; a corrected
    /// retry after a validation failure re-executes.
    pub async fn redeem_coupon(
        &self,
        request: RedeemCouponRequest,
    ) -> Result<RedemptionResult, ApiError> {
        if let Some(key) = &request.idempotency_key {
            if let Some(cached) = self.cached_result(key).await? {
                tracing::debug!("Returning cached redemption response for key {}", key);
                return Ok(cached);
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("SET LOCAL lock_timeout = '{LOCK_TIMEOUT}'"))
            .execute(&mut *tx)
            .await?;

        // Step 1: exclusive lock on the coupon row.
        let coupon = self
            .coupon_repo
            .find_by_code_for_update(&mut tx, &request.code)
            .await?
            .ok_or_else(|| ApiError::CouponNotFound {
                code: request.code.clone(),
            })?;

        // Step 2: coupon state, each check a distinct failure, in order.
        self.validate_coupon_state(&coupon)?;

        // Step 3: resolve and lock the client row.
        let client = self
            .client_repo
            .lock_by_identifier(&mut tx, &request.client_ref)
            .await?
            .ok_or_else(|| ApiError::ClientNotFound {
                client_ref: request.client_ref.clone(),
            })?;

        if coupon.client_id.is_some() && coupon.client_id != Some(client.id) {
            return Err(ApiError::CouponClientMismatch);
        }

        let template = self
            .template_repo
            .find_by_id_in(&mut tx, coupon.template_id)
            .await?
            .ok_or(ApiError::TemplateNotFound {
                template_id: coupon.template_id,
            })?;

        // Step 4: template preconditions.
        if let Some(min_purchase) = template.min_purchase {
            if request.amount < min_purchase {
                return Err(ApiError::CouponMinPurchaseNotMet {
                    min_purchase,
                    amount: request.amount,
                });
            }
        }

        let levels = self.level_repo.find_all_in(&mut tx).await?;
        let current_level = client
            .level_id
            .and_then(|id| levels.iter().find(|l| l.id == id));

        conditions::evaluate(
            &template.conditions,
            &ConditionContext {
                level_order: current_level.map(|l| l.order),
                gender: client.gender,
                total_spent: client.total_spent,
                tags: &client.tags,
            },
        )?;

        // Step 5: usage quotas, counted from the event log under the
        // template row lock.
        self.check_usage_limits(&mut tx, &template, &client).await?;

        // Steps 6-7: discount arithmetic and stacking.
        let base_discount = DiscountCalculator::base_discount(
            template.discount_type,
            template.discount_value,
            request.amount,
        );
        let stacking_rules = template.parsed_stacking_rules()?;
        let perks = current_level
            .map(|l| {
                l.parsed_perks().map_err(|e| ApiError::InvalidRuleConfig {
                    reason: format!("level {}: bad perks: {}", l.id, e),
                })
            })
            .transpose()?;
        let discount = DiscountCalculator::apply_stacking(
            base_discount,
            &stacking_rules,
            current_level.map(|l| l.order),
            perks.as_ref(),
            request.amount,
        );
        let payable = DiscountCalculator::payable(request.amount, discount);

        // Step 8: coupon transition. Templates without a usage limit are
        // single-use; multi-use coupons only move their last-used timestamp.
        let now = Utc::now();
        let coupon = if template.is_single_use() {
            self.coupon_repo
                .mark_redeemed(&mut tx, coupon.id, request.staff_id, request.amount, now)
                .await?
        } else {
            self.coupon_repo.touch_last_use(&mut tx, coupon.id, now).await?
        };

        // Step 9: spend increment on the locked client row, then tier
        // recalculation.
        let client = self
            .client_repo
            .add_spend(&mut tx, client.id, request.amount)
            .await?;
        let level_id = self
            .loyalty_service
            .recalculate_level(&mut tx, &client, &levels)
            .await?;

        // Step 10: the redeem event. Its payload feeds the quota counts.
        self.event_repo
            .record(
                &mut tx,
                EventCreate {
                    name: EventName::CouponRedeemed,
                    actor_type: ActorType::Staff,
                    actor_id: Some(request.staff_id),
                    entity_type: "coupon",
                    entity_id: coupon.id,
                    payload: serde_json::json!({
                        "client_id": client.id,
                        "template_id": coupon.template_id,
                        "amount": request.amount,
                        "discount": discount,
                    }),
                },
            )
            .await?;

        let result = RedemptionResult {
            code: coupon.code.clone(),
            amount: request.amount,
            discount,
            payable,
            status: coupon.status,
            redeemed_at: coupon.redeemed_at,
            // The summary reflects the post-redemption client; the level id
            // comes from the recalculation, which may not be written back to
            // the row this `client` value was read from.
            client: ClientSummary {
                level_id,
                ..ClientSummary::from(&client)
            },
        };

        // Cache the response in the same transaction as the redemption so a
        // crash cannot leave an executed-but-unrecorded request behind.
        if let Some(key) = &request.idempotency_key {
            let payload = serde_json::to_value(&result)
                .map_err(|e| ApiError::InternalError(format!("serialize response: {}", e)))?;
            let won_key = self
                .idempotency_repo
                .put_if_absent(&mut tx, key, &payload)
                .await?;
            if !won_key {
                // A concurrent request with the same key committed while this
                // one was in flight (both missed the pre-check). The first
                // completed execution is the permanent answer: discard this
                // one and return the stored response.
                tx.rollback().await?;
                tracing::info!("Discarded duplicate redemption for key {}", key);
                return self.cached_result(key).await?.ok_or_else(|| {
                    ApiError::InternalError("idempotency record missing after key conflict".to_string())
                });
            }
        }

        // Step 11: commit. Everything above rolls back on any earlier error.
        tx.commit().await?;

        tracing::info!(
            "Redeemed coupon {} for client {}: amount {}, discount {}",
            result.code,
            result.client.id,
            result.amount,
            result.discount
        );
        Ok(result)
    }

    /// Decode the response stored under an idempotency key, if any
    async fn cached_result(&self, key: &str) -> Result<Option<RedemptionResult>, ApiError> {
        match self.idempotency_repo.get_by_key(key).await? {
            Some(record) => {
                let result = serde_json::from_value(record.response_payload).map_err(|e| {
                    ApiError::InternalError(format!("corrupt idempotency payload: {}", e))
                })?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    /// Ordered state validation: already redeemed, invalid status, expired.
    /// Client binding is checked after the client is resolved.
    fn validate_coupon_state(&self, coupon: &Coupon) -> Result<(), ApiError> {
        use crate::coupons::models::CouponStatus;

        if coupon.status == CouponStatus::Redeemed {
            return Err(ApiError::CouponAlreadyRedeemed);
        }
        if !coupon.status.is_redeemable() {
            return Err(ApiError::CouponInvalidStatus {
                status: coupon.status,
            });
        }
        if let Some(expires_at) = coupon.expires_at {
            if expires_at < Utc::now() {
                return Err(ApiError::CouponExpired);
            }
        }
        Ok(())
    }

    /// Enforce global and per-client usage quotas from the event log.
    ///
    /// Locks the template row first so two concurrent redemptions of
    /// different coupons under the same template cannot both pass a boundary
    /// check before either commits its event.
    async fn check_usage_limits(
        &self,
        conn: &mut sqlx::PgConnection,
        template: &CouponTemplate,
        client: &Client,
    ) -> Result<(), ApiError> {
        if template.usage_limit.is_none() && template.per_user_limit.is_none() {
            return Ok(());
        }

        self.template_repo.lock_row(&mut *conn, template.id).await?;

        if let Some(usage_limit) = template.usage_limit {
            let total_uses = self
                .event_repo
                .count_redemptions_for_template(&mut *conn, template.id)
                .await?;
            if total_uses >= usage_limit as i64 {
                return Err(ApiError::CouponUsageLimitExceeded);
            }
        }

        if let Some(per_user_limit) = template.per_user_limit {
            let client_uses = self
                .event_repo
                .count_redemptions_for_client_and_template(&mut *conn, client.id, template.id)
                .await?;
            if client_uses >= per_user_limit as i64 {
                return Err(ApiError::CouponPerUserLimitExceeded);
            }
        }

        Ok(())
    }
}
