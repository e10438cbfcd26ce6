use rust_decimal::Decimal;

use crate::coupons::models::{DiscountType, StackingRules};
use crate::loyalty::LevelPerks;

/// Service computing coupon discounts and stacking
pub struct DiscountCalculator;

impl DiscountCalculator {
    /// Base discount for a template applied to a purchase amount.
    ///
    /// Percentage templates yield `round(amount * value / 100, 2)`; fixed
    /// templates are capped at the amount so the discount never exceeds it.
    pub fn base_discount(
        discount_type: DiscountType,
        discount_value: Decimal,
        amount: Decimal,
    ) -> Decimal {
        match discount_type {
            DiscountType::Percent => (amount * discount_value / Decimal::ONE_HUNDRED).round_dp(2),
            DiscountType::Fixed => discount_value.min(amount),
        }
    }

    /// Combine the coupon discount with tier perks under the template's
    /// stacking rules.
    ///
    /// When summation is disallowed the coupon discount is final. Otherwise a
    /// perk discount (a percentage of the amount, when the tier defines one)
    /// is added, subject to the `min_level` gate, and the total is capped at
    /// `max_total_discount_percent` of the amount when configured.
    pub fn apply_stacking(
        coupon_discount: Decimal,
        rules: &StackingRules,
        level_order: Option<i32>,
        perks: Option<&LevelPerks>,
        amount: Decimal,
    ) -> Decimal {
        let mut total_discount = coupon_discount;

        if !rules.allow_sum {
            return total_discount;
        }

        if let Some(min_level) = rules.min_level {
            if level_order.map_or(true, |order| order < min_level) {
                return total_discount;
            }
        }

        if let Some(percent) = perks.and_then(|p| p.percent_discount) {
            total_discount += (amount * percent / Decimal::ONE_HUNDRED).round_dp(2);
        }

        if let Some(max_percent) = rules.max_total_discount_percent {
            let cap = (amount * max_percent / Decimal::ONE_HUNDRED).round_dp(2);
            total_discount = total_discount.min(cap);
        }

        total_discount
    }

    /// Amount left to pay after the discount, floored at zero
    pub fn payable(amount: Decimal, discount: Decimal) -> Decimal {
        (amount - discount).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_percent_discount() {
        let discount =
            DiscountCalculator::base_discount(DiscountType::Percent, dec!(10), dec!(100.00));
        assert_eq!(discount, dec!(10.00));
        assert_eq!(DiscountCalculator::payable(dec!(100.00), discount), dec!(90.00));
    }

    #[test]
    fn test_percent_discount_rounds_to_cents() {
        let discount =
            DiscountCalculator::base_discount(DiscountType::Percent, dec!(15), dec!(33.33));
        assert_eq!(discount, dec!(5.00));
    }

    #[test]
    fn test_fixed_discount_capped_at_amount() {
        let discount =
            DiscountCalculator::base_discount(DiscountType::Fixed, dec!(15.00), dec!(10.00));
        assert_eq!(discount, dec!(10.00));
        assert_eq!(DiscountCalculator::payable(dec!(10.00), discount), dec!(0.00));
    }

    #[test]
    fn test_fixed_discount_below_amount() {
        let discount =
            DiscountCalculator::base_discount(DiscountType::Fixed, dec!(5.00), dec!(20.00));
        assert_eq!(discount, dec!(5.00));
    }

    #[test]
    fn test_stacking_disallowed_keeps_base() {
        let rules = StackingRules::default();
        let perks = LevelPerks {
            percent_discount: Some(dec!(5)),
        };
        let total =
            DiscountCalculator::apply_stacking(dec!(10.00), &rules, Some(3), Some(&perks), dec!(100.00));
        assert_eq!(total, dec!(10.00));
    }

    #[test]
    fn test_stacking_adds_perk_discount() {
        let rules = StackingRules {
            allow_sum: true,
            min_level: None,
            max_total_discount_percent: None,
        };
        let perks = LevelPerks {
            percent_discount: Some(dec!(5)),
        };
        let total =
            DiscountCalculator::apply_stacking(dec!(10.00), &rules, Some(1), Some(&perks), dec!(100.00));
        assert_eq!(total, dec!(15.00));
    }

    #[test]
    fn test_stacking_min_level_gate() {
        let rules = StackingRules {
            allow_sum: true,
            min_level: Some(2),
            max_total_discount_percent: None,
        };
        let perks = LevelPerks {
            percent_discount: Some(dec!(5)),
        };

        // Below the gate, and with no level at all, the base discount stands.
        let total =
            DiscountCalculator::apply_stacking(dec!(10.00), &rules, Some(1), Some(&perks), dec!(100.00));
        assert_eq!(total, dec!(10.00));
        let total =
            DiscountCalculator::apply_stacking(dec!(10.00), &rules, None, Some(&perks), dec!(100.00));
        assert_eq!(total, dec!(10.00));

        let total =
            DiscountCalculator::apply_stacking(dec!(10.00), &rules, Some(2), Some(&perks), dec!(100.00));
        assert_eq!(total, dec!(15.00));
    }

    #[test]
    fn test_stacking_cap_applies() {
        let rules = StackingRules {
            allow_sum: true,
            min_level: None,
            max_total_discount_percent: Some(dec!(12)),
        };
        let perks = LevelPerks {
            percent_discount: Some(dec!(5)),
        };
        let total =
            DiscountCalculator::apply_stacking(dec!(10.00), &rules, Some(1), Some(&perks), dec!(100.00));
        assert_eq!(total, dec!(12.00));
    }

    #[test]
    fn test_payable_never_negative() {
        assert_eq!(DiscountCalculator::payable(dec!(10.00), dec!(15.00)), dec!(0.00));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    /// The base discount never exceeds the amount and is never negative,
    /// so payable stays within [0, amount].
    #[test]
    fn prop_discount_within_bounds() {
        proptest!(|(
            amount_cents in 1u64..=1_000_000u64,
            value_cents in 0u64..=20_000u64,
            percent in 0u64..=100u64
        )| {
            let amount = Decimal::from(amount_cents) / Decimal::from(100);

            let fixed = DiscountCalculator::base_discount(
                DiscountType::Fixed,
                Decimal::from(value_cents) / Decimal::from(100),
                amount,
            );
            prop_assert!(fixed >= Decimal::ZERO && fixed <= amount);

            let pct = DiscountCalculator::base_discount(
                DiscountType::Percent,
                Decimal::from(percent),
                amount,
            );
            prop_assert!(pct >= Decimal::ZERO);
            // Allow for cent rounding at the boundary.
            prop_assert!(pct <= amount + Decimal::new(1, 2));

            let payable = DiscountCalculator::payable(amount, pct);
            prop_assert!(payable >= Decimal::ZERO && payable <= amount);
        });
    }

    /// Stacking with a cap never yields more than the cap
    #[test]
    fn prop_stacking_respects_cap() {
        proptest!(|(
            amount_cents in 1u64..=1_000_000u64,
            base_percent in 0u64..=50u64,
            perk_percent in 0u64..=50u64,
            cap_percent in 0u64..=100u64
        )| {
            let amount = Decimal::from(amount_cents) / Decimal::from(100);
            let base = DiscountCalculator::base_discount(
                DiscountType::Percent,
                Decimal::from(base_percent),
                amount,
            );
            let rules = StackingRules {
                allow_sum: true,
                min_level: None,
                max_total_discount_percent: Some(Decimal::from(cap_percent)),
            };
            let perks = LevelPerks {
                percent_discount: Some(Decimal::from(perk_percent)),
            };

            let total = DiscountCalculator::apply_stacking(base, &rules, Some(1), Some(&perks), amount);
            let cap = (amount * Decimal::from(cap_percent) / Decimal::ONE_HUNDRED).round_dp(2);
            prop_assert!(total <= cap.max(base));
            prop_assert!(total >= Decimal::ZERO);
        });
    }
}
