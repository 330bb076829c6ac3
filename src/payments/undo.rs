use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LateFeePolicy;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::interest::{AccrualEngine, PeriodClock};
use crate::state::{FrozenWindow, Loan};
use crate::types::LoanId;

/// effect of reversing one recorded repayment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoOutcome {
    pub loan_id: LoanId,
    pub amount: Money,
    pub repayment_timestamp: DateTime<Utc>,
    /// undone amount grown to the loan's settlement point
    pub restored_balance: Money,
    pub late_fee_restored: Money,
    /// the loan was terminal before the undo
    pub reopened: bool,
}

/// reverses repayments by replaying accrual on the undone amount
///
/// No repayment history is kept. The undone amount is treated as a separate
/// balance settled at the repayment timestamp and accrued forward to the point
/// the loan was last settled, so any number of repayments can be reversed in
/// any order. Freezes lifted since the repayment are replayed too: the amount
/// stands still over each frozen window and sees the due date as it was before
/// that window extended it.
#[derive(Debug, Clone, Copy)]
pub struct UndoEngine {
    accrual: AccrualEngine,
}

impl UndoEngine {
    pub fn new(clock: PeriodClock) -> Self {
        Self {
            accrual: AccrualEngine::new(clock),
        }
    }

    pub fn validate(&self, loan: &Loan, amount: Money, timestamp: DateTime<Utc>) -> Result<()> {
        if timestamp < loan.start_timestamp || timestamp > loan.tracked_timestamp {
            return Err(LedgerError::RepaymentTimestampInvalid { timestamp });
        }
        if amount.is_zero() || !amount.is_rounded() || amount > loan.repaid_amount {
            return Err(LedgerError::InvalidAmount { amount });
        }
        Ok(())
    }

    /// where the loan's accrual currently stands
    fn settlement_point(loan: &Loan) -> DateTime<Utc> {
        match loan.freeze_timestamp {
            Some(frozen) if frozen < loan.tracked_timestamp => frozen,
            _ => loan.tracked_timestamp,
        }
    }

    /// compute the undo without touching the loan
    pub fn preview(&self, loan: &Loan, amount: Money, timestamp: DateTime<Utc>) -> Result<UndoOutcome> {
        self.validate(loan, amount, timestamp)?;

        let mut replay = loan.clone();
        replay.tracked_balance = amount;
        replay.tracked_timestamp = timestamp;
        replay.late_fee_amount = Money::ZERO;
        replay.freeze_timestamp = None;
        replay.frozen_windows.clear();
        // a flat fee is charged once per loan, not per restored amount
        if matches!(loan.late_fee_policy, LateFeePolicy::Flat(_)) && !loan.late_fee_amount.is_zero() {
            replay.late_fee_policy = LateFeePolicy::Flat(Money::ZERO);
        }

        let add_fee = |total: Money, fee: Money| {
            total.checked_add(fee).ok_or(LedgerError::ArithmeticOverflow {
                context: "undo late fee",
            })
        };
        let windows: Vec<&FrozenWindow> = loan
            .frozen_windows
            .iter()
            .filter(|window| window.unfreeze_timestamp > timestamp)
            .collect();
        let mut extension = windows
            .iter()
            .fold(0u32, |total, window| total.saturating_add(window.frozen_periods));
        let mut late_fee_restored = Money::ZERO;

        for window in windows {
            replay.duration_in_periods = loan.duration_in_periods.saturating_sub(extension);
            if window.freeze_timestamp > replay.tracked_timestamp {
                let segment = self.accrual.preview(&replay, window.freeze_timestamp)?;
                replay.tracked_balance = segment.tracked_balance;
                late_fee_restored = add_fee(late_fee_restored, segment.pending_late_fee)?;
            }
            replay.tracked_timestamp = replay.tracked_timestamp.max(window.unfreeze_timestamp);
            extension = extension.saturating_sub(window.frozen_periods);
        }

        replay.duration_in_periods = loan.duration_in_periods;
        let replayed = self.accrual.preview(&replay, Self::settlement_point(loan))?;
        Ok(UndoOutcome {
            loan_id: loan.id,
            amount,
            repayment_timestamp: timestamp,
            restored_balance: replayed.tracked_balance,
            late_fee_restored: add_fee(late_fee_restored, replayed.pending_late_fee)?,
            reopened: loan.is_terminal(),
        })
    }

    /// reverse a repayment of `amount` recorded at `timestamp`
    pub fn undo_repayment(&self, loan: &mut Loan, amount: Money, timestamp: DateTime<Utc>) -> Result<UndoOutcome> {
        let outcome = self.preview(loan, amount, timestamp)?;
        let tracked_balance = loan
            .tracked_balance
            .checked_add(outcome.restored_balance)
            .ok_or(LedgerError::ArithmeticOverflow {
                context: "undo restored balance",
            })?;

        let late_fee_amount = loan
            .late_fee_amount
            .checked_add(outcome.late_fee_restored)
            .ok_or(LedgerError::ArithmeticOverflow {
                context: "undo late fee",
            })?;

        loan.repaid_amount -= amount;
        loan.tracked_balance = tracked_balance;
        loan.late_fee_amount = late_fee_amount;
        loan.revoked = false;

        debug!(
            loan_id = loan.id,
            amount = %amount,
            restored = %outcome.restored_balance,
            reopened = outcome.reopened,
            "repayment undone"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoanTerms;
    use crate::decimal::Rate;
    use crate::ledger::LedgerMutator;
    use chrono::Duration;

    const START: i64 = 19_723;

    fn setup(policy: LateFeePolicy) -> (LedgerMutator, UndoEngine, Loan) {
        let clock = PeriodClock::default();
        let terms = LoanTerms {
            token: "USDT".to_string(),
            addon_amount: Money::new(100_000),
            duration_in_periods: 10,
            interest_rate_primary: Rate::from_percentage(10),
            interest_rate_secondary: Rate::from_percentage(20),
        };
        let start = clock.period_start(START).unwrap();
        let loan = Loan::new(0, 1, "borrower", Money::new(100_000_000_000), &terms, policy, start).unwrap();
        (LedgerMutator::new(clock), UndoEngine::new(clock), loan)
    }

    fn at(offset: i64, hours: i64) -> DateTime<Utc> {
        PeriodClock::default().period_start(START + offset).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn test_undo_in_same_period_is_exact_inverse() {
        let (mutator, undo, mut loan) = setup(LateFeePolicy::default());
        let reference = mutator.accrual.preview(&loan, at(3, 1)).unwrap();

        mutator.repay(&mut loan, Money::new(50_000_000_000), at(3, 1)).unwrap();
        let outcome = undo.undo_repayment(&mut loan, Money::new(50_000_000_000), at(3, 1)).unwrap();

        assert_eq!(outcome.restored_balance, Money::new(50_000_000_000));
        assert!(!outcome.reopened);
        assert_eq!(loan.tracked_balance, reference.tracked_balance);
        assert_eq!(loan.repaid_amount, Money::ZERO);
    }

    #[test]
    fn test_out_of_order_undos_converge() {
        let (mutator, undo, original) = setup(LateFeePolicy::default());
        let mut loan = original.clone();
        mutator.repay(&mut loan, Money::new(20_000_000_000), at(2, 1)).unwrap();
        mutator.repay(&mut loan, Money::new(30_000_000_000), at(5, 1)).unwrap();

        let mut ascending = loan.clone();
        undo.undo_repayment(&mut ascending, Money::new(20_000_000_000), at(2, 1)).unwrap();
        undo.undo_repayment(&mut ascending, Money::new(30_000_000_000), at(5, 1)).unwrap();

        let mut descending = loan.clone();
        undo.undo_repayment(&mut descending, Money::new(30_000_000_000), at(5, 1)).unwrap();
        undo.undo_repayment(&mut descending, Money::new(20_000_000_000), at(2, 1)).unwrap();

        // 100_000_100_000 * 1.1^5
        assert_eq!(ascending.tracked_balance, Money::new(161_051_161_051));
        assert_eq!(descending.tracked_balance, ascending.tracked_balance);
        assert_eq!(ascending.repaid_amount, Money::ZERO);

        let never_repaid = mutator.accrual.preview(&original, at(8, 0)).unwrap();
        let undone = mutator.accrual.preview(&ascending, at(8, 0)).unwrap();
        assert_eq!(undone.outstanding_balance, never_repaid.outstanding_balance);
    }

    #[test]
    fn test_undo_reopens_repaid_loan_with_late_fee() {
        let (mutator, undo, mut loan) = setup(LateFeePolicy::RateOfBalance(Rate::from_percentage(2)));
        mutator.repay(&mut loan, Money::new(50_000_000_000), at(0, 1)).unwrap();
        mutator.repay(&mut loan, Money::FULL_REPAYMENT, at(11, 1)).unwrap();
        assert!(loan.is_terminal());

        let outcome = undo.undo_repayment(&mut loan, Money::new(50_000_000_000), at(0, 1)).unwrap();

        // 50_000_000_000 * 1.1^10, plus 2% fee, then one period at 20%
        assert!(outcome.reopened);
        assert_eq!(outcome.late_fee_restored, Money::new(2_593_742_460));
        assert_eq!(loan.tracked_balance, Money::new(158_737_038_558));
        assert_eq!(loan.late_fee_amount, Money::new(5_187_490_108));
        assert_eq!(loan.repaid_amount, Money::new(158_737_360_000));
        assert!(!loan.is_terminal());
    }

    #[test]
    fn test_undo_full_repayment_same_period() {
        let (mutator, undo, mut loan) = setup(LateFeePolicy::default());
        let original = loan.clone();
        let update = mutator.repay(&mut loan, Money::FULL_REPAYMENT, at(0, 2)).unwrap();

        undo.undo_repayment(&mut loan, update.amount, at(0, 2)).unwrap();
        assert_eq!(loan.tracked_balance, original.tracked_balance);
        assert_eq!(loan.repaid_amount, Money::ZERO);
    }

    #[test]
    fn test_undo_clears_revocation() {
        let (mutator, undo, mut loan) = setup(LateFeePolicy::default());
        mutator.repay(&mut loan, Money::new(10_000_000_000), at(1, 0)).unwrap();
        mutator.revoke(&mut loan, at(2, 0)).unwrap();

        let outcome = undo.undo_repayment(&mut loan, Money::new(10_000_000_000), at(1, 0)).unwrap();
        assert!(outcome.reopened);
        assert!(!loan.revoked);
        assert_eq!(loan.tracked_balance, Money::new(11_000_000_000));
    }

    #[test]
    fn test_flat_fee_not_charged_twice() {
        let (mutator, undo, mut loan) = setup(LateFeePolicy::Flat(Money::new(500_000)));
        mutator.repay(&mut loan, Money::new(10_000_000_000), at(0, 1)).unwrap();
        mutator.repay(&mut loan, Money::new(10_000_000_000), at(12, 0)).unwrap();
        assert_eq!(loan.late_fee_amount, Money::new(500_000));

        let outcome = undo.undo_repayment(&mut loan, Money::new(10_000_000_000), at(0, 1)).unwrap();
        assert_eq!(outcome.late_fee_restored, Money::ZERO);
        assert_eq!(loan.late_fee_amount, Money::new(500_000));
    }

    #[test]
    fn test_undo_while_frozen_replays_to_freeze_point() {
        let (mutator, undo, original) = setup(LateFeePolicy::default());

        let mut reference = original.clone();
        mutator.freeze(&mut reference, at(3, 1)).unwrap();
        mutator.repay(&mut reference, Money::new(10_000_000_000), at(5, 1)).unwrap();

        let mut loan = original.clone();
        mutator.repay(&mut loan, Money::new(50_000_000_000), at(1, 1)).unwrap();
        mutator.freeze(&mut loan, at(3, 1)).unwrap();
        mutator.repay(&mut loan, Money::new(10_000_000_000), at(5, 1)).unwrap();

        let outcome = undo.undo_repayment(&mut loan, Money::new(50_000_000_000), at(1, 1)).unwrap();

        // two periods from the repayment to the freeze, none after it
        assert_eq!(outcome.restored_balance, Money::new(60_500_000_000));
        assert_eq!(loan.tracked_balance, Money::new(123_100_133_100));
        assert_eq!(loan.tracked_balance, reference.tracked_balance);

        mutator.unfreeze(&mut reference, at(8, 1)).unwrap();
        mutator.unfreeze(&mut loan, at(8, 1)).unwrap();
        assert_eq!(
            mutator.accrual.preview(&loan, at(9, 0)).unwrap(),
            mutator.accrual.preview(&reference, at(9, 0)).unwrap()
        );
    }

    #[test]
    fn test_undo_skips_lifted_freeze() {
        let (mutator, undo, original) = setup(LateFeePolicy::default());

        let mut reference = original.clone();
        mutator.freeze(&mut reference, at(3, 1)).unwrap();
        mutator.unfreeze(&mut reference, at(8, 1)).unwrap();

        let mut loan = original.clone();
        mutator.repay(&mut loan, Money::new(50_000_000_000), at(1, 1)).unwrap();
        mutator.freeze(&mut loan, at(3, 1)).unwrap();
        mutator.unfreeze(&mut loan, at(8, 1)).unwrap();

        let outcome = undo.undo_repayment(&mut loan, Money::new(50_000_000_000), at(1, 1)).unwrap();

        assert_eq!(outcome.restored_balance, Money::new(60_500_000_000));
        assert_eq!(loan.tracked_balance, Money::new(133_100_133_100));
        assert_eq!(loan.tracked_balance, reference.tracked_balance);
        assert_eq!(loan.duration_in_periods, 15);

        let undone = mutator.accrual.preview(&loan, at(9, 0)).unwrap();
        assert_eq!(undone.tracked_balance, Money::new(146_410_146_410));
        assert_eq!(undone, mutator.accrual.preview(&reference, at(9, 0)).unwrap());
    }

    #[test]
    fn test_undo_after_lifted_freeze_uses_extended_due() {
        let (mutator, undo, original) = setup(LateFeePolicy::RateOfBalance(Rate::from_percentage(2)));

        let mut reference = original.clone();
        mutator.freeze(&mut reference, at(3, 1)).unwrap();
        mutator.unfreeze(&mut reference, at(8, 1)).unwrap();
        mutator.repay(&mut reference, Money::new(10_000_000_000), at(17, 1)).unwrap();

        let mut loan = original.clone();
        mutator.repay(&mut loan, Money::new(50_000_000_000), at(1, 1)).unwrap();
        mutator.freeze(&mut loan, at(3, 1)).unwrap();
        mutator.unfreeze(&mut loan, at(8, 1)).unwrap();
        mutator.repay(&mut loan, Money::new(10_000_000_000), at(17, 1)).unwrap();

        undo.undo_repayment(&mut loan, Money::new(50_000_000_000), at(1, 1)).unwrap();

        // due moved from period 10 to 15; the fee is charged on the balance at 15
        assert_eq!(loan.tracked_balance, Money::new(370_969_273_508));
        assert_eq!(loan.late_fee_amount, Money::new(5_187_490_108));
        assert_eq!(loan.tracked_balance, reference.tracked_balance);
        assert_eq!(loan.late_fee_amount, reference.late_fee_amount);
        assert_eq!(loan.repaid_amount, reference.repaid_amount);
    }

    #[test]
    fn test_undo_preconditions() {
        let (mutator, undo, mut loan) = setup(LateFeePolicy::default());
        mutator.repay(&mut loan, Money::new(10_000_000_000), at(2, 0)).unwrap();
        let before = loan.clone();

        assert!(matches!(
            undo.undo_repayment(&mut loan, Money::new(10_000_000_000), at(-1, 0)),
            Err(LedgerError::RepaymentTimestampInvalid { .. })
        ));
        assert!(matches!(
            undo.undo_repayment(&mut loan, Money::new(10_000_000_000), at(4, 0)),
            Err(LedgerError::RepaymentTimestampInvalid { .. })
        ));
        assert!(matches!(
            undo.undo_repayment(&mut loan, Money::new(20_000_000_000), at(2, 0)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            undo.undo_repayment(&mut loan, Money::ZERO, at(2, 0)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            undo.undo_repayment(&mut loan, Money::new(10_001), at(2, 0)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert_eq!(loan, before);
    }
}
