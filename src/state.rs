use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::config::{LateFeePolicy, LoanTerms};
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::{LoanId, LoanKind, LoanStatus, ProgramId};

/// persisted loan record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub id: LoanId,
    pub program_id: ProgramId,
    pub borrower: String,
    pub token: String,

    // terms
    pub borrowed_amount: Money,
    pub addon_amount: Money,
    pub start_timestamp: DateTime<Utc>,
    pub duration_in_periods: u32,
    pub interest_rate_primary: Rate,
    pub interest_rate_secondary: Rate,
    pub late_fee_policy: LateFeePolicy,

    // ledger
    pub repaid_amount: Money,
    pub discount_amount: Money,
    /// unrounded accrual accumulator
    pub tracked_balance: Money,
    /// last settlement point
    pub tracked_timestamp: DateTime<Utc>,
    pub freeze_timestamp: Option<DateTime<Utc>>,
    /// completed freezes, oldest first
    #[serde(default)]
    pub frozen_windows: Vec<FrozenWindow>,
    /// late fee already realized into the tracked balance
    pub late_fee_amount: Money,
    pub revoked: bool,

    // installment linkage, count is zero for ordinary loans
    pub first_installment_id: LoanId,
    pub installment_count: u32,
}

impl Loan {
    /// originate a loan; the tracked balance starts at borrowed plus addon
    pub fn new(
        id: LoanId,
        program_id: ProgramId,
        borrower: &str,
        borrowed_amount: Money,
        terms: &LoanTerms,
        late_fee_policy: LateFeePolicy,
        start_timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let tracked_balance = borrowed_amount
            .checked_add(terms.addon_amount)
            .ok_or(LedgerError::ArithmeticOverflow {
                context: "borrowed plus addon",
            })?;
        Ok(Self {
            id,
            program_id,
            borrower: borrower.to_string(),
            token: terms.token.clone(),
            borrowed_amount,
            addon_amount: terms.addon_amount,
            start_timestamp,
            duration_in_periods: terms.duration_in_periods,
            interest_rate_primary: terms.interest_rate_primary,
            interest_rate_secondary: terms.interest_rate_secondary,
            late_fee_policy,
            repaid_amount: Money::ZERO,
            discount_amount: Money::ZERO,
            tracked_balance,
            tracked_timestamp: start_timestamp,
            freeze_timestamp: None,
            frozen_windows: Vec::new(),
            late_fee_amount: Money::ZERO,
            revoked: false,
            first_installment_id: id,
            installment_count: 0,
        })
    }

    /// link this loan into an installment group
    pub fn with_installment(mut self, first_installment_id: LoanId, installment_count: u32) -> Self {
        self.first_installment_id = first_installment_id;
        self.installment_count = installment_count;
        self
    }

    pub fn kind(&self) -> LoanKind {
        if self.installment_count == 0 {
            LoanKind::Ordinary
        } else {
            LoanKind::Installment
        }
    }

    pub fn status(&self) -> LoanStatus {
        if self.revoked {
            LoanStatus::Revoked
        } else if self.tracked_balance.is_zero() {
            LoanStatus::Repaid
        } else if self.freeze_timestamp.is_some() {
            LoanStatus::Frozen
        } else {
            LoanStatus::Active
        }
    }

    /// repaid or revoked
    pub fn is_terminal(&self) -> bool {
        self.tracked_balance.is_zero()
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_timestamp.is_some()
    }

    /// ids of every loan in this loan's installment group, or just this loan
    pub fn group_ids(&self) -> Range<LoanId> {
        match self.kind() {
            LoanKind::Ordinary => self.id..self.id + 1,
            LoanKind::Installment => {
                self.first_installment_id..self.first_installment_id + u64::from(self.installment_count)
            }
        }
    }
}

/// a freeze that has been lifted
///
/// Accrual stood still from `freeze_timestamp` until `unfreeze_timestamp`, and
/// the duration was extended by `frozen_periods` when it was lifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenWindow {
    pub freeze_timestamp: DateTime<Utc>,
    /// where accrual resumed
    pub unfreeze_timestamp: DateTime<Utc>,
    pub frozen_periods: u32,
}

/// accrual result at a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPreview {
    pub period_index: i64,
    pub tracked_balance: Money,
    pub outstanding_balance: Money,
    /// late fee that a settlement at this timestamp would lock in
    pub pending_late_fee: Money,
}

/// preview plus the loan's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedLoanPreview {
    pub loan_id: LoanId,
    pub program_id: ProgramId,
    pub borrower: String,
    pub preview_timestamp: DateTime<Utc>,
    pub period_index: i64,
    pub due_period_index: i64,
    pub tracked_balance: Money,
    pub outstanding_balance: Money,
    pub borrowed_amount: Money,
    pub addon_amount: Money,
    pub repaid_amount: Money,
    pub discount_amount: Money,
    /// locked plus pending late fee
    pub late_fee_amount: Money,
    pub status: LoanStatus,
    pub first_installment_id: LoanId,
    pub installment_count: u32,
}

/// aggregate preview over an installment group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentLoanPreview {
    pub first_installment_id: LoanId,
    pub installment_count: u32,
    pub period_index: i64,
    pub total_tracked_balance: Money,
    pub total_outstanding_balance: Money,
    pub total_borrowed_amount: Money,
    pub total_addon_amount: Money,
    pub total_repaid_amount: Money,
    pub total_discount_amount: Money,
    pub total_late_fee_amount: Money,
    pub installment_previews: Vec<ExtendedLoanPreview>,
}

impl InstallmentLoanPreview {
    /// sum a group of sub-loan previews, `None` for an empty group
    pub fn aggregate(previews: Vec<ExtendedLoanPreview>) -> Result<Option<Self>> {
        let Some(first) = previews.first() else {
            return Ok(None);
        };
        let mut aggregate = Self {
            first_installment_id: first.first_installment_id,
            installment_count: first.installment_count,
            period_index: first.period_index,
            total_tracked_balance: Money::ZERO,
            total_outstanding_balance: Money::ZERO,
            total_borrowed_amount: Money::ZERO,
            total_addon_amount: Money::ZERO,
            total_repaid_amount: Money::ZERO,
            total_discount_amount: Money::ZERO,
            total_late_fee_amount: Money::ZERO,
            installment_previews: Vec::new(),
        };
        let add = |total: Money, value: Money| {
            total.checked_add(value).ok_or(LedgerError::ArithmeticOverflow {
                context: "installment preview totals",
            })
        };
        for preview in &previews {
            aggregate.total_tracked_balance = add(aggregate.total_tracked_balance, preview.tracked_balance)?;
            aggregate.total_outstanding_balance =
                add(aggregate.total_outstanding_balance, preview.outstanding_balance)?;
            aggregate.total_borrowed_amount = add(aggregate.total_borrowed_amount, preview.borrowed_amount)?;
            aggregate.total_addon_amount = add(aggregate.total_addon_amount, preview.addon_amount)?;
            aggregate.total_repaid_amount = add(aggregate.total_repaid_amount, preview.repaid_amount)?;
            aggregate.total_discount_amount = add(aggregate.total_discount_amount, preview.discount_amount)?;
            aggregate.total_late_fee_amount = add(aggregate.total_late_fee_amount, preview.late_fee_amount)?;
        }
        aggregate.installment_previews = previews;
        Ok(Some(aggregate))
    }
}
