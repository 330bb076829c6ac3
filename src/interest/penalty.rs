use chrono::{DateTime, Utc};

use crate::config::LateFeePolicy;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::interest::compound::compound_balance;
use crate::interest::period::PeriodClock;
use crate::state::Loan;

/// decides whether and how much late fee applies at the due boundary
#[derive(Debug, Clone, Copy)]
pub struct LateFeeEngine {
    pub clock: PeriodClock,
}

impl LateFeeEngine {
    pub fn new(clock: PeriodClock) -> Self {
        Self { clock }
    }

    /// fee for a balance evaluated exactly at the due period
    fn fee_for_balance(policy: &LateFeePolicy, balance_at_due: Money) -> Result<Money> {
        match policy {
            LateFeePolicy::Flat(amount) => Ok(*amount),
            LateFeePolicy::RateOfBalance(rate) => {
                if rate.is_zero() {
                    return Ok(Money::ZERO);
                }
                Money::from_decimal(balance_at_due.as_decimal() * rate.as_decimal()).ok_or(
                    LedgerError::ArithmeticOverflow {
                        context: "late fee",
                    },
                )
            }
        }
    }

    /// true when a settlement at this timestamp is the first to cross the due period
    pub fn crosses_due(&self, loan: &Loan, timestamp: DateTime<Utc>) -> bool {
        let eval_index = self.clock.period_index(self.clock.effective_timestamp(loan, timestamp));
        let tracked_index = self.clock.period_index(loan.tracked_timestamp);
        let due_index = self.clock.due_index(loan);
        eval_index > due_index && tracked_index <= due_index
    }

    /// late fee a settlement at this timestamp would lock in, zero if none
    pub fn late_fee(&self, loan: &Loan, timestamp: DateTime<Utc>) -> Result<Money> {
        if loan.tracked_balance.is_zero() || !self.crosses_due(loan, timestamp) {
            return Ok(Money::ZERO);
        }
        let tracked_index = self.clock.period_index(loan.tracked_timestamp);
        let primary_periods = (self.clock.due_index(loan) - tracked_index) as u64;
        let balance_at_due = compound_balance(
            loan.tracked_balance,
            loan.interest_rate_primary,
            primary_periods,
        )?;
        Self::fee_for_balance(&loan.late_fee_policy, balance_at_due)
    }
}
