use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::interest::{AccrualEngine, PeriodClock};
use crate::state::{FrozenWindow, Loan};
use crate::types::{BorrowerSettlement, LoanId, LoanKind, SettlementKind};

/// outcome of a settlement on one loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerUpdate {
    pub loan_id: LoanId,
    pub kind: SettlementKind,
    pub timestamp: DateTime<Utc>,
    /// amount credited to the repaid or discount counter
    pub amount: Money,
    pub outstanding_before: Money,
    pub tracked_balance: Money,
    pub late_fee_locked: Money,
    pub fully_settled: bool,
    /// timestamp not after the last settlement; the loan was left untouched
    pub stale: bool,
}

impl LedgerUpdate {
    fn stale(loan: &Loan, kind: SettlementKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            loan_id: loan.id,
            kind,
            timestamp,
            amount: Money::ZERO,
            outstanding_before: loan.tracked_balance.round_to_accuracy(),
            tracked_balance: loan.tracked_balance,
            late_fee_locked: Money::ZERO,
            fully_settled: false,
            stale: true,
        }
    }
}

/// outcome of an unfreeze
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unfreeze {
    pub loan_id: LoanId,
    pub frozen_periods: u32,
    pub new_duration_in_periods: u32,
    pub settlement: LedgerUpdate,
}

/// outcome of a revocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub loan_id: LoanId,
    pub timestamp: DateTime<Utc>,
    pub borrower_settlement: BorrowerSettlement,
    /// addon handed back from the addon treasury to the pool
    pub addon_refund: Money,
    /// outstanding balance written off by the revocation
    pub outstanding_forgiven: Money,
}

impl Revocation {
    /// true when nothing has to move between the parties
    pub fn moves_no_tokens(&self) -> bool {
        self.addon_refund.is_zero() && self.borrower_settlement == BorrowerSettlement::Even
    }
}

pub fn ensure_not_repaid(loan: &Loan) -> Result<()> {
    if loan.is_terminal() {
        return Err(LedgerError::LoanAlreadyRepaid { loan_id: loan.id });
    }
    Ok(())
}

pub fn ensure_kind(loan: &Loan, expected: LoanKind) -> Result<()> {
    let actual = loan.kind();
    if actual != expected {
        return Err(LedgerError::LoanTypeUnexpected {
            loan_id: loan.id,
            expected,
            actual,
        });
    }
    Ok(())
}

/// non-zero and rounded, or the full repayment sentinel
pub fn validate_amount(amount: Money) -> Result<()> {
    if amount.is_full_repayment() {
        return Ok(());
    }
    if amount.is_zero() || !amount.is_rounded() {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(())
}

/// applies balance-changing transitions to a single loan
#[derive(Debug, Clone, Copy)]
pub struct LedgerMutator {
    pub accrual: AccrualEngine,
}

impl LedgerMutator {
    pub fn new(clock: PeriodClock) -> Self {
        Self {
            accrual: AccrualEngine::new(clock),
        }
    }

    pub fn clock(&self) -> &PeriodClock {
        &self.accrual.clock
    }

    /// token-moving repayment
    pub fn repay(&self, loan: &mut Loan, amount: Money, timestamp: DateTime<Utc>) -> Result<LedgerUpdate> {
        self.settle(loan, SettlementKind::Repayment, amount, timestamp)
    }

    /// balance reduction granted by the lender
    pub fn discount(&self, loan: &mut Loan, amount: Money, timestamp: DateTime<Utc>) -> Result<LedgerUpdate> {
        self.settle(loan, SettlementKind::Discount, amount, timestamp)
    }

    /// lock in accrual and late fee up to the timestamp without crediting anything
    pub fn settle_accrual(&self, loan: &mut Loan, timestamp: DateTime<Utc>) -> Result<LedgerUpdate> {
        self.settle(loan, SettlementKind::Accrual, Money::ZERO, timestamp)
    }

    fn settle(
        &self,
        loan: &mut Loan,
        kind: SettlementKind,
        amount: Money,
        timestamp: DateTime<Utc>,
    ) -> Result<LedgerUpdate> {
        ensure_not_repaid(loan)?;
        if kind != SettlementKind::Accrual {
            validate_amount(amount)?;
        }

        // replayed or out-of-order submissions are accepted and ignored
        if timestamp <= loan.tracked_timestamp {
            debug!(loan_id = loan.id, %timestamp, "stale settlement ignored");
            return Ok(LedgerUpdate::stale(loan, kind, timestamp));
        }

        let preview = self.accrual.preview(loan, timestamp)?;
        let outstanding = preview.outstanding_balance;

        let (credited, tracked_balance) = if kind == SettlementKind::Accrual {
            (Money::ZERO, preview.tracked_balance)
        } else if amount.is_full_repayment() || amount == outstanding {
            (outstanding, Money::ZERO)
        } else if amount > outstanding {
            return Err(LedgerError::InvalidAmount { amount });
        } else {
            (amount, preview.tracked_balance.saturating_sub(amount))
        };

        let overflow = |context: &'static str| LedgerError::ArithmeticOverflow { context };
        let late_fee_amount = loan
            .late_fee_amount
            .checked_add(preview.pending_late_fee)
            .ok_or(overflow("late fee total"))?;
        let (repaid_amount, discount_amount) = match kind {
            SettlementKind::Repayment => (
                loan.repaid_amount.checked_add(credited).ok_or(overflow("repaid total"))?,
                loan.discount_amount,
            ),
            SettlementKind::Discount => (
                loan.repaid_amount,
                loan.discount_amount.checked_add(credited).ok_or(overflow("discount total"))?,
            ),
            SettlementKind::Accrual => (loan.repaid_amount, loan.discount_amount),
        };

        loan.late_fee_amount = late_fee_amount;
        loan.tracked_balance = tracked_balance;
        loan.tracked_timestamp = timestamp;
        loan.repaid_amount = repaid_amount;
        loan.discount_amount = discount_amount;

        debug!(
            loan_id = loan.id,
            ?kind,
            credited = %credited,
            tracked_balance = %tracked_balance,
            "loan settled"
        );

        Ok(LedgerUpdate {
            loan_id: loan.id,
            kind,
            timestamp,
            amount: credited,
            outstanding_before: outstanding,
            tracked_balance,
            late_fee_locked: preview.pending_late_fee,
            fully_settled: tracked_balance.is_zero(),
            stale: false,
        })
    }

    /// pin accrual at the timestamp
    pub fn freeze(&self, loan: &mut Loan, timestamp: DateTime<Utc>) -> Result<()> {
        ensure_not_repaid(loan)?;
        if loan.is_frozen() {
            return Err(LedgerError::LoanAlreadyFrozen { loan_id: loan.id });
        }
        loan.freeze_timestamp = Some(timestamp);
        Ok(())
    }

    /// settle up to the freeze point and extend the duration by the frozen periods
    pub fn unfreeze(&self, loan: &mut Loan, timestamp: DateTime<Utc>) -> Result<Unfreeze> {
        ensure_not_repaid(loan)?;
        let freeze_timestamp = loan
            .freeze_timestamp
            .ok_or(LedgerError::LoanNotFrozen { loan_id: loan.id })?;

        let frozen_periods = u32::try_from(self.clock().periods_between(freeze_timestamp, timestamp))
            .map_err(|_| LedgerError::DurationOutOfRange)?;
        let new_duration = loan
            .duration_in_periods
            .checked_add(frozen_periods)
            .ok_or(LedgerError::DurationOutOfRange)?;

        let settlement = self.settle_accrual(loan, freeze_timestamp)?;

        // the frozen interval must not accrue once the freeze is lifted
        loan.tracked_timestamp = loan.tracked_timestamp.max(timestamp);
        loan.duration_in_periods = new_duration;
        loan.freeze_timestamp = None;
        loan.frozen_windows.push(FrozenWindow {
            freeze_timestamp,
            unfreeze_timestamp: loan.tracked_timestamp,
            frozen_periods,
        });

        Ok(Unfreeze {
            loan_id: loan.id,
            frozen_periods,
            new_duration_in_periods: new_duration,
            settlement,
        })
    }

    /// force the loan terminal and reconcile principal and addon
    pub fn revoke(&self, loan: &mut Loan, timestamp: DateTime<Utc>) -> Result<Revocation> {
        ensure_not_repaid(loan)?;
        let preview = self.accrual.preview(loan, timestamp)?;

        let revocation = Revocation {
            loan_id: loan.id,
            timestamp,
            borrower_settlement: BorrowerSettlement::from_amounts(loan.repaid_amount, loan.borrowed_amount),
            addon_refund: loan.addon_amount,
            outstanding_forgiven: preview.outstanding_balance,
        };

        loan.tracked_balance = Money::ZERO;
        loan.tracked_timestamp = loan.tracked_timestamp.max(timestamp);
        loan.revoked = true;

        debug!(loan_id = loan.id, settlement = ?revocation.borrower_settlement, "loan revoked");
        Ok(revocation)
    }

    /// duration may only grow
    pub fn update_duration(&self, loan: &mut Loan, new_duration: u32) -> Result<u32> {
        ensure_not_repaid(loan)?;
        let current = loan.duration_in_periods;
        if new_duration <= current {
            return Err(LedgerError::InappropriateLoanDuration {
                current,
                requested: new_duration,
            });
        }
        loan.duration_in_periods = new_duration;
        Ok(current)
    }

    /// primary rate may only fall
    pub fn update_interest_rate_primary(&self, loan: &mut Loan, new_rate: Rate) -> Result<Rate> {
        ensure_not_repaid(loan)?;
        let current = loan.interest_rate_primary;
        if new_rate >= current {
            return Err(LedgerError::InappropriateInterestRate {
                current,
                requested: new_rate,
            });
        }
        loan.interest_rate_primary = new_rate;
        Ok(current)
    }

    /// secondary rate may only fall
    pub fn update_interest_rate_secondary(&self, loan: &mut Loan, new_rate: Rate) -> Result<Rate> {
        ensure_not_repaid(loan)?;
        let current = loan.interest_rate_secondary;
        if new_rate >= current {
            return Err(LedgerError::InappropriateInterestRate {
                current,
                requested: new_rate,
            });
        }
        loan.interest_rate_secondary = new_rate;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LateFeePolicy, LoanTerms};
    use chrono::Duration;

    const START: i64 = 19_723;

    fn setup(policy: LateFeePolicy) -> (LedgerMutator, Loan) {
        let mutator = LedgerMutator::new(PeriodClock::default());
        let terms = LoanTerms {
            token: "USDT".to_string(),
            addon_amount: Money::new(100_000),
            duration_in_periods: 10,
            interest_rate_primary: Rate::from_percentage(10),
            interest_rate_secondary: Rate::from_percentage(20),
        };
        let start = mutator.clock().period_start(START).unwrap();
        let loan = Loan::new(0, 1, "borrower", Money::new(100_000_000_000), &terms, policy, start).unwrap();
        (mutator, loan)
    }

    fn at(mutator: &LedgerMutator, offset: i64, hours: i64) -> DateTime<Utc> {
        mutator.clock().period_start(START + offset).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn test_partial_repayment_same_period() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        let update = mutator.repay(&mut loan, Money::new(50_000_000_000), at(&mutator, 0, 1)).unwrap();

        assert_eq!(loan.tracked_balance, Money::new(50_000_100_000));
        assert_eq!(loan.repaid_amount, Money::new(50_000_000_000));
        assert_eq!(loan.tracked_timestamp, at(&mutator, 0, 1));
        assert!(!update.fully_settled);
        assert!(!update.stale);
    }

    #[test]
    fn test_scenario_overdue_full_repayment() {
        let (mutator, mut loan) = setup(LateFeePolicy::RateOfBalance(Rate::from_percentage(2)));
        mutator.repay(&mut loan, Money::new(50_000_000_000), at(&mutator, 0, 1)).unwrap();

        let update = mutator.repay(&mut loan, Money::FULL_REPAYMENT, at(&mutator, 11, 1)).unwrap();

        assert_eq!(update.late_fee_locked, Money::new(2_593_747_648));
        assert_eq!(update.amount, Money::new(158_737_360_000));
        assert!(update.fully_settled);
        assert_eq!(loan.late_fee_amount, Money::new(2_593_747_648));
        assert_eq!(loan.repaid_amount, Money::new(50_000_000_000 + 158_737_360_000));
        assert!(loan.is_terminal());
    }

    #[test]
    fn test_stale_repayment_is_noop() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        mutator.repay(&mut loan, Money::new(10_000_000), at(&mutator, 2, 5)).unwrap();
        let before = loan.clone();

        let update = mutator.repay(&mut loan, Money::new(10_000_000), at(&mutator, 2, 5)).unwrap();
        assert!(update.stale);
        assert_eq!(loan, before);

        let update = mutator.repay(&mut loan, Money::new(10_000_000), at(&mutator, 1, 0)).unwrap();
        assert!(update.stale);
        assert_eq!(loan, before);
    }

    #[test]
    fn test_sentinel_and_exact_full_repayment_match() {
        let (mutator, mut exact) = setup(LateFeePolicy::RateOfBalance(Rate::from_percentage(3)));
        let mut sentinel = exact.clone();
        let ts = at(&mutator, 13, 2);

        let outstanding = mutator.accrual.preview(&exact, ts).unwrap().outstanding_balance;
        mutator.repay(&mut exact, outstanding, ts).unwrap();
        mutator.repay(&mut sentinel, Money::FULL_REPAYMENT, ts).unwrap();

        assert_eq!(exact, sentinel);
        assert!(exact.is_terminal());
    }

    #[test]
    fn test_invalid_amounts_rejected() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        let ts = at(&mutator, 1, 0);
        let before = loan.clone();

        assert!(matches!(
            mutator.repay(&mut loan, Money::ZERO, ts),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            mutator.repay(&mut loan, Money::new(10_001), ts),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            mutator.repay(&mut loan, Money::new(900_000_000_000), ts),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert_eq!(loan, before);
    }

    #[test]
    fn test_counter_overflow_leaves_loan_untouched() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        loan.repaid_amount = Money::new(u64::MAX - 5_000);
        let before = loan.clone();

        assert_eq!(
            mutator.repay(&mut loan, Money::new(10_000), at(&mutator, 1, 0)),
            Err(LedgerError::ArithmeticOverflow {
                context: "repaid total",
            })
        );
        assert_eq!(loan, before);
    }

    #[test]
    fn test_repaid_loan_rejects_operations() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        mutator.repay(&mut loan, Money::FULL_REPAYMENT, at(&mutator, 1, 0)).unwrap();

        assert!(matches!(
            mutator.repay(&mut loan, Money::new(10_000), at(&mutator, 2, 0)),
            Err(LedgerError::LoanAlreadyRepaid { .. })
        ));
        assert!(matches!(
            mutator.freeze(&mut loan, at(&mutator, 2, 0)),
            Err(LedgerError::LoanAlreadyRepaid { .. })
        ));
        assert!(matches!(
            mutator.revoke(&mut loan, at(&mutator, 2, 0)),
            Err(LedgerError::LoanAlreadyRepaid { .. })
        ));
    }

    #[test]
    fn test_discount_credits_discount_counter() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        let update = mutator.discount(&mut loan, Money::new(100_000), at(&mutator, 0, 2)).unwrap();

        assert_eq!(update.kind, SettlementKind::Discount);
        assert_eq!(loan.discount_amount, Money::new(100_000));
        assert_eq!(loan.repaid_amount, Money::ZERO);
        assert_eq!(loan.tracked_balance, Money::new(100_000_000_000));
    }

    #[test]
    fn test_freeze_then_immediate_unfreeze_is_neutral() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        let ts = at(&mutator, 0, 4);
        let before = loan.clone();

        mutator.freeze(&mut loan, ts).unwrap();
        let unfreeze = mutator.unfreeze(&mut loan, ts).unwrap();

        assert_eq!(unfreeze.frozen_periods, 0);
        assert_eq!(loan.tracked_balance, before.tracked_balance);
        assert_eq!(loan.duration_in_periods, before.duration_in_periods);
        assert!(!loan.is_frozen());
    }

    #[test]
    fn test_frozen_interval_does_not_accrue() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        let reference = loan.clone();

        mutator.freeze(&mut loan, at(&mutator, 2, 1)).unwrap();
        assert_eq!(
            mutator.accrual.preview(&loan, at(&mutator, 6, 0)).unwrap(),
            mutator.accrual.preview(&loan, at(&mutator, 2, 1)).unwrap()
        );

        let unfreeze = mutator.unfreeze(&mut loan, at(&mutator, 7, 1)).unwrap();
        assert_eq!(unfreeze.frozen_periods, 5);
        assert_eq!(loan.duration_in_periods, 15);
        assert_eq!(
            loan.frozen_windows,
            vec![FrozenWindow {
                freeze_timestamp: at(&mutator, 2, 1),
                unfreeze_timestamp: at(&mutator, 7, 1),
                frozen_periods: 5,
            }]
        );

        // three accruing periods after unfreeze equal five for the reference loan
        let frozen_path = mutator.accrual.preview(&loan, at(&mutator, 10, 0)).unwrap();
        let plain_path = mutator.accrual.preview(&reference, at(&mutator, 5, 0)).unwrap();
        assert_eq!(frozen_path.outstanding_balance, plain_path.outstanding_balance);
    }

    #[test]
    fn test_freeze_state_errors() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        assert!(matches!(
            mutator.unfreeze(&mut loan, at(&mutator, 1, 0)),
            Err(LedgerError::LoanNotFrozen { .. })
        ));
        mutator.freeze(&mut loan, at(&mutator, 1, 0)).unwrap();
        assert!(matches!(
            mutator.freeze(&mut loan, at(&mutator, 1, 1)),
            Err(LedgerError::LoanAlreadyFrozen { .. })
        ));
    }

    #[test]
    fn test_unfreeze_duration_overflow() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        loan.duration_in_periods = u32::MAX - 1;
        mutator.freeze(&mut loan, at(&mutator, 0, 1)).unwrap();
        let before = loan.clone();

        assert!(matches!(
            mutator.unfreeze(&mut loan, at(&mutator, 5, 0)),
            Err(LedgerError::DurationOutOfRange)
        ));
        assert_eq!(loan, before);
    }

    #[test]
    fn test_revoke_settlement_directions() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        mutator.repay(&mut loan, Money::new(30_000_000_000), at(&mutator, 0, 1)).unwrap();
        let revocation = mutator.revoke(&mut loan, at(&mutator, 1, 0)).unwrap();

        assert_eq!(
            revocation.borrower_settlement,
            BorrowerSettlement::Collect(Money::new(70_000_000_000))
        );
        assert_eq!(revocation.addon_refund, Money::new(100_000));
        assert!(loan.is_terminal());
        assert!(loan.revoked);
    }

    #[test]
    fn test_revoke_even_without_addon_moves_nothing() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());
        loan.addon_amount = Money::ZERO;
        mutator.repay(&mut loan, Money::new(100_000_000_000), at(&mutator, 0, 1)).unwrap();
        assert!(!loan.is_terminal());

        let revocation = mutator.revoke(&mut loan, at(&mutator, 3, 0)).unwrap();
        assert_eq!(revocation.borrower_settlement, BorrowerSettlement::Even);
        assert!(revocation.moves_no_tokens());
    }

    #[test]
    fn test_monotonic_term_updates() {
        let (mutator, mut loan) = setup(LateFeePolicy::default());

        assert!(matches!(
            mutator.update_duration(&mut loan, 10),
            Err(LedgerError::InappropriateLoanDuration { .. })
        ));
        assert_eq!(mutator.update_duration(&mut loan, 12).unwrap(), 10);

        assert!(matches!(
            mutator.update_interest_rate_primary(&mut loan, Rate::from_percentage(11)),
            Err(LedgerError::InappropriateInterestRate { .. })
        ));
        mutator.update_interest_rate_primary(&mut loan, Rate::from_percentage(8)).unwrap();
        mutator.update_interest_rate_secondary(&mut loan, Rate::from_percentage(15)).unwrap();
        assert_eq!(loan.interest_rate_primary, Rate::from_percentage(8));
        assert_eq!(loan.interest_rate_secondary, Rate::from_percentage(15));
    }
}
