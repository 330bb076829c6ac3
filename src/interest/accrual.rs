use chrono::{DateTime, Utc};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::interest::compound::compound_balance;
use crate::interest::penalty::LateFeeEngine;
use crate::interest::period::PeriodClock;
use crate::state::{Loan, LoanPreview};

/// split of an accrual span around the due period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualSpan {
    /// periods accrued at the primary rate
    pub primary: u64,
    /// periods accrued at the secondary rate
    pub secondary: u64,
}

impl AccrualSpan {
    /// the regime is decided relative to the previous settlement, not the loan's age
    pub fn split(tracked_index: i64, eval_index: i64, due_index: i64) -> Self {
        let total = (eval_index - tracked_index).max(0);
        if tracked_index > due_index {
            return Self {
                primary: 0,
                secondary: total as u64,
            };
        }
        let secondary = (eval_index - due_index).max(0).min(total);
        Self {
            primary: (total - secondary) as u64,
            secondary: secondary as u64,
        }
    }
}

/// computes a loan's balance at an arbitrary timestamp
#[derive(Debug, Clone, Copy)]
pub struct AccrualEngine {
    pub clock: PeriodClock,
    late_fee: LateFeeEngine,
}

impl AccrualEngine {
    pub fn new(clock: PeriodClock) -> Self {
        Self {
            clock,
            late_fee: LateFeeEngine::new(clock),
        }
    }

    /// accrual from the last settlement to the timestamp, pure in the loan snapshot
    pub fn preview(&self, loan: &Loan, timestamp: DateTime<Utc>) -> Result<LoanPreview> {
        let eval_index = self.clock.period_index(self.clock.effective_timestamp(loan, timestamp));
        let tracked_index = self.clock.period_index(loan.tracked_timestamp);
        let due_index = self.clock.due_index(loan);

        let mut balance = loan.tracked_balance;
        let mut pending_late_fee = Money::ZERO;

        if !balance.is_zero() && eval_index > tracked_index {
            let span = AccrualSpan::split(tracked_index, eval_index, due_index);
            balance = compound_balance(balance, loan.interest_rate_primary, span.primary)?;
            // zero unless this span is the first to leave the due period
            pending_late_fee = self.late_fee.late_fee(loan, timestamp)?;
            balance = balance
                .checked_add(pending_late_fee)
                .ok_or(LedgerError::ArithmeticOverflow {
                    context: "late fee injection",
                })?;
            balance = compound_balance(balance, loan.interest_rate_secondary, span.secondary)?;
        }

        Ok(LoanPreview {
            period_index: eval_index,
            tracked_balance: balance,
            outstanding_balance: balance.round_to_accuracy(),
            pending_late_fee,
        })
    }
}
