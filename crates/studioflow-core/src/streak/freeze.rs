use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::storage::FreezeConfig;

/// Price list and cap for streak freezes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeEconomy {
    max_streak_freezes: u32,
    base_cost: i64,
}

/// What buying the missing freezes would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseQuote {
    pub available: u32,
    pub lost_days: u32,
    pub to_buy: u32,
    pub unit_cost: i64,
    pub total_cost: i64,
}

impl FreezeEconomy {
    pub fn new(config: &FreezeConfig) -> Self {
        Self {
            max_streak_freezes: config.max_streak_freezes,
            base_cost: config.base_cost,
        }
    }

    pub fn max_freezes(&self) -> u32 {
        self.max_streak_freezes
    }

    /// XP price of one freeze. A bigger daily goal costs more to protect.
    pub fn freeze_cost(&self, daily_goal_minutes: u32) -> i64 {
        match daily_goal_minutes {
            0..=15 => self.base_cost,
            16..=30 => self.base_cost * 2,
            31..=60 => self.base_cost * 7 / 2,
            _ => self.base_cost * 5,
        }
    }

    /// Quote the purchase that would cover `lost_days` given `available` freezes.
    pub fn quote(
        &self,
        available: u32,
        lost_days: u32,
        daily_goal_minutes: u32,
    ) -> Result<PurchaseQuote, ValidationError> {
        if lost_days == 0 {
            return Err(ValidationError::NothingToRecover);
        }
        let to_buy = lost_days.saturating_sub(available);
        // Nothing to buy means nothing to cap, even if the balance is already above it.
        if to_buy > 0 && available.saturating_add(to_buy) > self.max_streak_freezes {
            return Err(ValidationError::ExceedsFreezeCap {
                available,
                to_buy,
                cap: self.max_streak_freezes,
            });
        }
        let unit_cost = self.freeze_cost(daily_goal_minutes);
        Ok(PurchaseQuote {
            available,
            lost_days,
            to_buy,
            unit_cost,
            total_cost: unit_cost * i64::from(to_buy),
        })
    }
}

impl Default for FreezeEconomy {
    fn default() -> Self {
        Self::new(&FreezeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_with_goal() {
        let economy = FreezeEconomy::default();
        assert_eq!(economy.freeze_cost(10), 100);
        assert_eq!(economy.freeze_cost(30), 200);
        assert_eq!(economy.freeze_cost(45), 350);
        assert_eq!(economy.freeze_cost(120), 500);
    }

    #[test]
    fn quote_buys_only_the_shortfall() {
        let economy = FreezeEconomy::default();
        let quote = economy.quote(1, 3, 30).unwrap();
        assert_eq!(quote.to_buy, 2);
        assert_eq!(quote.total_cost, 400);
    }

    #[test]
    fn quote_rejects_totals_above_cap() {
        let economy = FreezeEconomy::new(&FreezeConfig {
            max_streak_freezes: 3,
            base_cost: 100,
        });
        assert_eq!(
            economy.quote(1, 4, 15),
            Err(ValidationError::ExceedsFreezeCap {
                available: 1,
                to_buy: 3,
                cap: 3
            })
        );
    }

    #[test]
    fn owned_freezes_above_cap_still_quote_without_buying() {
        let economy = FreezeEconomy::default();
        let quote = economy.quote(7, 2, 30).unwrap();
        assert_eq!(quote.to_buy, 0);
        assert_eq!(quote.total_cost, 0);
    }

    #[test]
    fn quote_needs_lost_days() {
        assert_eq!(
            FreezeEconomy::default().quote(2, 0, 15),
            Err(ValidationError::NothingToRecover)
        );
    }
}
