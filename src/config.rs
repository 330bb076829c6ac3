use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::interest::PeriodClock;

/// market-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// length of one accrual period in seconds
    pub period_length_secs: i64,
    /// shift applied to timestamps before bucketing into periods
    pub negative_time_offset_secs: i64,
    /// upper bound on sub-loans in one installment loan
    pub max_installment_count: u32,
    /// largest id the loan counter may hand out
    pub max_loan_id: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            period_length_secs: 86_400,
            negative_time_offset_secs: 3 * 3_600,
            max_installment_count: 180,
            max_loan_id: (1 << 40) - 1,
        }
    }
}

impl MarketConfig {
    /// load and validate from json
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MarketConfig = serde_json::from_str(json).map_err(|e| {
            LedgerError::InvalidConfiguration {
                message: e.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.period_length_secs <= 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "period length must be positive".to_string(),
            });
        }
        if self.max_installment_count == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "max installment count must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// period clock for this configuration
    pub fn clock(&self) -> PeriodClock {
        PeriodClock::new(self.period_length_secs, self.negative_time_offset_secs)
    }
}

/// late fee charged once when a loan crosses its due period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LateFeePolicy {
    /// fixed amount per loan
    Flat(Money),
    /// share of the balance at the due period
    RateOfBalance(Rate),
}

impl Default for LateFeePolicy {
    fn default() -> Self {
        LateFeePolicy::RateOfBalance(Rate::ZERO)
    }
}

/// terms granted by a credit line for one loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub token: String,
    pub addon_amount: Money,
    pub duration_in_periods: u32,
    pub interest_rate_primary: Rate,
    pub interest_rate_secondary: Rate,
}

/// static credit line configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLineTerms {
    pub token: String,
    pub duration_in_periods: u32,
    pub interest_rate_primary: Rate,
    pub interest_rate_secondary: Rate,
    /// addon charged as a share of the borrowed amount
    pub addon_rate: Rate,
    pub late_fee_policy: LateFeePolicy,
    pub min_borrowed_amount: Money,
    pub max_borrowed_amount: Money,
}

impl CreditLineTerms {
    /// plain terms without addon or late fee
    pub fn standard(
        token: &str,
        duration_in_periods: u32,
        interest_rate_primary: Rate,
        interest_rate_secondary: Rate,
    ) -> Self {
        Self {
            token: token.to_string(),
            duration_in_periods,
            interest_rate_primary,
            interest_rate_secondary,
            addon_rate: Rate::ZERO,
            late_fee_policy: LateFeePolicy::default(),
            min_borrowed_amount: Money::ZERO,
            max_borrowed_amount: Money::new(u64::MAX - 1),
        }
    }

    pub fn with_addon_rate(mut self, addon_rate: Rate) -> Self {
        self.addon_rate = addon_rate;
        self
    }

    pub fn with_late_fee(mut self, policy: LateFeePolicy) -> Self {
        self.late_fee_policy = policy;
        self
    }

    pub fn with_borrow_limits(mut self, min: Money, max: Money) -> Self {
        self.min_borrowed_amount = min;
        self.max_borrowed_amount = max;
        self
    }

    /// addon for a borrowed amount, rounded to the accuracy factor
    pub fn addon_for(&self, borrowed_amount: Money) -> Result<Money> {
        if self.addon_rate.is_zero() {
            return Ok(Money::ZERO);
        }
        let raw = borrowed_amount.as_decimal() * self.addon_rate.as_decimal();
        Money::from_decimal(raw)
            .map(|m| m.round_to_accuracy())
            .ok_or(LedgerError::ArithmeticOverflow {
                context: "addon amount",
            })
    }
}
