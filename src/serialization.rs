/// serialization support for loans
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LateFeePolicy;
use crate::decimal::{Money, Rate};
use crate::state::{Loan, LoanPreview};
use crate::types::{LoanId, LoanKind, LoanStatus, ProgramId};

/// serializable view of a loan's state at a point in time
#[derive(Debug, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub program_id: ProgramId,
    pub borrower: String,
    pub token: String,
    pub kind: LoanKind,
    pub status: LoanStatus,
    pub terms: TermsView,
    pub ledger: LedgerView,
    pub preview: PreviewView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TermsView {
    pub borrowed_amount: Money,
    pub addon_amount: Money,
    pub start_timestamp: DateTime<Utc>,
    pub duration_in_periods: u32,
    pub interest_rate_primary: Rate,
    pub interest_rate_secondary: Rate,
    pub late_fee_policy: LateFeePolicy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerView {
    pub repaid_amount: Money,
    pub discount_amount: Money,
    pub tracked_balance: Money,
    pub tracked_timestamp: DateTime<Utc>,
    pub freeze_timestamp: Option<DateTime<Utc>>,
    pub late_fee_amount: Money,
    pub first_installment_id: LoanId,
    pub installment_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewView {
    pub timestamp: DateTime<Utc>,
    pub period_index: i64,
    pub outstanding_balance: Money,
    pub pending_late_fee: Money,
}

impl LoanView {
    pub fn from_loan(loan: &Loan, preview: &LoanPreview, timestamp: DateTime<Utc>) -> Self {
        LoanView {
            id: loan.id,
            program_id: loan.program_id,
            borrower: loan.borrower.clone(),
            token: loan.token.clone(),
            kind: loan.kind(),
            status: loan.status(),
            terms: TermsView {
                borrowed_amount: loan.borrowed_amount,
                addon_amount: loan.addon_amount,
                start_timestamp: loan.start_timestamp,
                duration_in_periods: loan.duration_in_periods,
                interest_rate_primary: loan.interest_rate_primary,
                interest_rate_secondary: loan.interest_rate_secondary,
                late_fee_policy: loan.late_fee_policy,
            },
            ledger: LedgerView {
                repaid_amount: loan.repaid_amount,
                discount_amount: loan.discount_amount,
                tracked_balance: loan.tracked_balance,
                tracked_timestamp: loan.tracked_timestamp,
                freeze_timestamp: loan.freeze_timestamp,
                late_fee_amount: loan.late_fee_amount,
                first_installment_id: loan.first_installment_id,
                installment_count: loan.installment_count,
            },
            preview: PreviewView {
                timestamp,
                period_index: preview.period_index,
                outstanding_balance: preview.outstanding_balance,
                pending_late_fee: preview.pending_late_fee,
            },
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
