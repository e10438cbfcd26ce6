use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::error::ApiError;
use crate::loyalty::models::{Client, Level};
use crate::loyalty::repository::ClientRepository;

/// Select the tier a given lifetime spend qualifies for: the level with the
/// highest threshold not exceeding `total_spent`. Ties are impossible since
/// thresholds and ranks are unique. Returns `None` when no threshold is met.
pub fn select_level(total_spent: Decimal, levels: &[Level]) -> Option<&Level> {
    levels
        .iter()
        .filter(|level| level.threshold_amount <= total_spent)
        .max_by_key(|level| level.threshold_amount)
}

/// Service recalculating a client's loyalty tier from lifetime spend.
///
/// Invoked by the redemption path after every spend mutation. Idempotent on
/// unchanged input: no write occurs when the selected tier equals the current
/// one. There is no downgrade special-casing; the selection rule alone
/// determines the tier.
#[derive(Clone)]
pub struct LoyaltyService {
    client_repo: ClientRepository,
}

impl LoyaltyService {
    pub fn new(client_repo: ClientRepository) -> Self {
        Self { client_repo }
    }

    /// Recalculate the client's level against the supplied tier table and
    /// persist it when it changed. Returns the effective level id.
    ///
    /// The caller is expected to hold the client row lock and to pass the
    /// transaction connection so the write commits atomically with the rest
    /// of the redemption.
    pub async fn recalculate_level(
        &self,
        conn: &mut PgConnection,
        client: &Client,
        levels: &[Level],
    ) -> Result<Option<i64>, ApiError> {
        let selected = select_level(client.total_spent, levels);

        match selected {
            Some(level) if Some(level.id) != client.level_id => {
                self.client_repo.set_level(conn, client.id, level.id).await?;
                tracing::info!(
                    "Client {} moved to level '{}' at total spend {}",
                    client.id,
                    level.name,
                    client.total_spent
                );
                Ok(Some(level.id))
            }
            Some(level) => Ok(Some(level.id)),
            None => Ok(client.level_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(id: i64, name: &str, threshold: Decimal, order: i32) -> Level {
        Level {
            id,
            name: name.to_string(),
            threshold_amount: threshold,
            perks: serde_json::json!({}),
            order,
        }
    }

    fn tiers() -> Vec<Level> {
        vec![
            level(1, "Bronze", dec!(0), 1),
            level(2, "Silver", dec!(1000), 2),
            level(3, "Gold", dec!(5000), 3),
        ]
    }

    #[test]
    fn test_select_level_below_first_paid_tier() {
        let levels = tiers();
        let selected = select_level(dec!(900), &levels).unwrap();
        assert_eq!(selected.name, "Bronze");
    }

    #[test]
    fn test_select_level_crossing_threshold() {
        let levels = tiers();
        let selected = select_level(dec!(1100), &levels).unwrap();
        assert_eq!(selected.name, "Silver");
    }

    #[test]
    fn test_select_level_exact_threshold() {
        let levels = tiers();
        let selected = select_level(dec!(1000), &levels).unwrap();
        assert_eq!(selected.name, "Silver");
    }

    #[test]
    fn test_select_level_top_tier_stays() {
        let levels = tiers();
        let selected = select_level(dec!(99999), &levels).unwrap();
        assert_eq!(selected.name, "Gold");
    }

    #[test]
    fn test_select_level_no_threshold_met() {
        let levels = vec![
            level(1, "Silver", dec!(1000), 1),
            level(2, "Gold", dec!(5000), 2),
        ];
        assert!(select_level(dec!(500), &levels).is_none());
    }

    #[test]
    fn test_select_level_empty_table() {
        assert!(select_level(dec!(100), &[]).is_none());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn tiers() -> Vec<Level> {
        vec![
            Level {
                id: 1,
                name: "Bronze".into(),
                threshold_amount: dec!(0),
                perks: serde_json::json!({}),
                order: 1,
            },
            Level {
                id: 2,
                name: "Silver".into(),
                threshold_amount: dec!(1000),
                perks: serde_json::json!({}),
                order: 2,
            },
            Level {
                id: 3,
                name: "Gold".into(),
                threshold_amount: dec!(5000),
                perks: serde_json::json!({}),
                order: 3,
            },
        ]
    }

    /// The selected tier never exceeds the spend, and spending more never
    /// selects a lower tier (no downgrade by spending).
    #[test]
    fn prop_tier_selection_is_monotonic() {
        proptest!(|(spent_cents in 0u64..=2_000_000u64, extra_cents in 0u64..=2_000_000u64)| {
            let levels = tiers();
            let spent = Decimal::from(spent_cents) / Decimal::from(100);
            let more = spent + Decimal::from(extra_cents) / Decimal::from(100);

            let before = select_level(spent, &levels).unwrap();
            let after = select_level(more, &levels).unwrap();

            prop_assert!(before.threshold_amount <= spent);
            prop_assert!(after.order >= before.order);
        });
    }
}
