use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use crate::coupons::models::{Campaign, Coupon, CouponTemplate, NewCoupon};
use crate::error::ApiError;

const COUPON_COLUMNS: &str = "id, code, template_id, client_id, campaign_id, status, issued_at, \
     expires_at, redeemed_at, redeemed_by_staff_id, redemption_amount, fraud_flag";

const TEMPLATE_COLUMNS: &str = "id, name, code_pattern, discount_type, discount_value, \
     min_purchase, per_user_limit, usage_limit, expiration_days, stacking_rules, conditions";

/// Repository for coupon template reads
#[derive(Clone)]
pub struct TemplateRepository {
    pool: PgPool,
}

impl TemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<CouponTemplate>, ApiError> {
        let template = sqlx::query_as::<_, CouponTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM coupon_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    /// Transactional variant of `find_by_id`
    pub async fn find_by_id_in(
        &self,
        conn: &mut PgConnection,
        id: i64,
    ) -> Result<Option<CouponTemplate>, ApiError> {
        let template = sqlx::query_as::<_, CouponTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM coupon_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(template)
    }

    /// Take an exclusive lock on the template row. Quota checks for
    /// templates with usage limits run under this lock so that concurrent
    /// redemptions of different coupons sharing the template serialize.
    pub async fn lock_row(&self, conn: &mut PgConnection, id: i64) -> Result<(), ApiError> {
        sqlx::query("SELECT id FROM coupon_templates WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(())
    }
}

/// Repository for campaign reads
#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Campaign>, ApiError> {
        let campaign = sqlx::query_as::<_, Campaign>(
            "SELECT id, name, template_id, code_prefix, status FROM campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }
}

/// Repository for coupon rows
#[derive(Clone)]
pub struct CouponRepository {
    pool: PgPool,
}

impl CouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check whether a code is already taken. Used by the bounded retry loop
    /// in code generation.
    pub async fn code_exists(&self, conn: &mut PgConnection, code: &str) -> Result<bool, ApiError> {
        let exists: Option<bool> =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM coupons WHERE code = $1)")
                .bind(code)
                .fetch_one(&mut *conn)
                .await?;

        Ok(exists.unwrap_or(false))
    }

    /// Insert a freshly issued coupon
    pub async fn create(
        &self,
        conn: &mut PgConnection,
        new_coupon: NewCoupon,
    ) -> Result<Coupon, ApiError> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            r#"
            INSERT INTO coupons (code, template_id, client_id, campaign_id, status, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(&new_coupon.code)
        .bind(new_coupon.template_id)
        .bind(new_coupon.client_id)
        .bind(new_coupon.campaign_id)
        .bind(new_coupon.status)
        .bind(new_coupon.issued_at)
        .bind(new_coupon.expires_at)
        .fetch_one(&mut *conn)
        .await?;

        Ok(coupon)
    }

    /// Look up a coupon by code and take an exclusive lock on its row.
    /// Concurrent redemption attempts on the same code block here until the
    /// holding transaction ends; `lock_timeout` bounds the wait.
    pub async fn find_by_code_for_update(
        &self,
        conn: &mut PgConnection,
        code: &str,
    ) -> Result<Option<Coupon>, ApiError> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1 FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(coupon)
    }

    /// Terminal transition for a single-use coupon. Callers must hold the
    /// row lock.
    pub async fn mark_redeemed(
        &self,
        conn: &mut PgConnection,
        coupon_id: i64,
        staff_id: i64,
        amount: Decimal,
        redeemed_at: DateTime<Utc>,
    ) -> Result<Coupon, ApiError> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            r#"
            UPDATE coupons
            SET status = 'redeemed',
                redeemed_at = $1,
                redeemed_by_staff_id = $2,
                redemption_amount = $3
            WHERE id = $4
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(redeemed_at)
        .bind(staff_id)
        .bind(amount)
        .bind(coupon_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(coupon)
    }

    /// Multi-use coupons keep their status; only the last-used timestamp
    /// moves.
    pub async fn touch_last_use(
        &self,
        conn: &mut PgConnection,
        coupon_id: i64,
        used_at: DateTime<Utc>,
    ) -> Result<Coupon, ApiError> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            r#"
            UPDATE coupons
            SET redeemed_at = $1
            WHERE id = $2
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(used_at)
        .bind(coupon_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(coupon)
    }

    /// Find a coupon by code without locking
    pub async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, ApiError> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }
}
