use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::{PgConnection, PgPool};

use crate::coupons::conditions::{self, ConditionContext};
use crate::coupons::models::{Coupon, CouponStatus, CouponTemplate, IssueCouponRequest, NewCoupon};
use crate::coupons::repository::{CampaignRepository, CouponRepository, TemplateRepository};
use crate::error::ApiError;
use crate::events::{ActorType, EventCreate, EventName, EventRepository};
use crate::loyalty::{Client, ClientRepository, LevelRepository};

/// Retry budget for random-suffix code generation. Exhausting it means the
/// code space under this prefix is effectively full, which is an operational
/// problem rather than a caller mistake.
const MAX_CODE_ATTEMPTS: u32 = 16;

/// Service creating coupons for clients from templates and campaigns
#[derive(Clone)]
pub struct CouponService {
    pool: PgPool,
    coupon_repo: CouponRepository,
    template_repo: TemplateRepository,
    campaign_repo: CampaignRepository,
    client_repo: ClientRepository,
    level_repo: LevelRepository,
    event_repo: EventRepository,
}

impl CouponService {
    pub fn new(
        pool: PgPool,
        coupon_repo: CouponRepository,
        template_repo: TemplateRepository,
        campaign_repo: CampaignRepository,
        client_repo: ClientRepository,
        level_repo: LevelRepository,
        event_repo: EventRepository,
    ) -> Self {
        Self {
            pool,
            coupon_repo,
            template_repo,
            campaign_repo,
            client_repo,
            level_repo,
            event_repo,
        }
    }

    /// Issue a new coupon to a client.
    ///
    /// Resolves the template and client, derives the code prefix from the
    /// campaign (when given) or the template's code pattern, checks the
    /// template's eligibility conditions against the client, computes expiry
    /// precedence (explicit > expiration_days > never), then inserts the
    /// coupon and its `issue` event in one transaction.
    pub async fn issue_coupon(&self, request: IssueCouponRequest) -> Result<Coupon, ApiError> {
        let template = self
            .template_repo
            .find_by_id(request.template_id)
            .await?
            .ok_or(ApiError::TemplateNotFound {
                template_id: request.template_id,
            })?;

        let client = self
            .client_repo
            .find_by_identifier(&request.client_ref)
            .await?
            .ok_or_else(|| ApiError::ClientNotFound {
                client_ref: request.client_ref.clone(),
            })?;

        let prefix = match request.campaign_id {
            Some(campaign_id) => {
                let campaign = self
                    .campaign_repo
                    .find_by_id(campaign_id)
                    .await?
                    .ok_or(ApiError::CampaignNotFound { campaign_id })?;
                campaign
                    .code_prefix
                    .ok_or(ApiError::CampaignMissingCodePrefix { campaign_id })?
            }
            None => template.code_prefix().to_string(),
        };

        if prefix.len() != 2 || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ApiError::InvalidRuleConfig {
                reason: format!("code prefix '{}' is not two uppercase letters", prefix),
            });
        }

        self.check_conditions(&template, &client).await?;

        let expires_at = match request.expires_at {
            Some(explicit) => Some(explicit),
            None => template
                .expiration_days
                .map(|days| Utc::now() + Duration::days(days as i64)),
        };

        let mut tx = self.pool.begin().await?;

        let code = self.generate_unique_code(&mut tx, &prefix).await?;

        let coupon = self
            .coupon_repo
            .create(
                &mut tx,
                NewCoupon {
                    code,
                    template_id: template.id,
                    client_id: Some(client.id),
                    campaign_id: request.campaign_id,
                    status: CouponStatus::Issued,
                    issued_at: Utc::now(),
                    expires_at,
                },
            )
            .await?;

        self.event_repo
            .record(
                &mut tx,
                EventCreate {
                    name: EventName::CouponIssued,
                    actor_type: ActorType::Bot,
                    actor_id: None,
                    entity_type: "coupon",
                    entity_id: coupon.id,
                    payload: serde_json::json!({
                        "client_id": client.id,
                        "campaign_id": coupon.campaign_id,
                        "template_id": coupon.template_id,
                    }),
                },
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            "Issued coupon {} (template {}) to client {}",
            coupon.code,
            coupon.template_id,
            client.id
        );
        Ok(coupon)
    }

    /// Evaluate template eligibility conditions against the client
    async fn check_conditions(
        &self,
        template: &CouponTemplate,
        client: &Client,
    ) -> Result<(), ApiError> {
        let levels = self.level_repo.find_all().await?;
        let level_order = client
            .level_id
            .and_then(|id| levels.iter().find(|l| l.id == id))
            .map(|l| l.order);

        conditions::evaluate(
            &template.conditions,
            &ConditionContext {
                level_order,
                gender: client.gender,
                total_spent: client.total_spent,
                tags: &client.tags,
            },
        )
    }

    /// Generate a `XX-12345` code that is not yet taken, retrying the random
    /// suffix against the store a bounded number of times
    async fn generate_unique_code(
        &self,
        conn: &mut PgConnection,
        prefix: &str,
    ) -> Result<String, ApiError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
            let code = format!("{}-{:05}", prefix, suffix);
            if !self.coupon_repo.code_exists(conn, &code).await? {
                return Ok(code);
            }
        }

        Err(ApiError::CodeGenerationExhausted)
    }
}
