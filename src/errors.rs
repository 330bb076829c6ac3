use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::decimal::{Money, Rate};
use crate::types::{LoanId, LoanKind, ProgramId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // state errors
    #[error("loan does not exist: {loan_id}")]
    LoanNotExist {
        loan_id: LoanId,
    },

    #[error("loan already repaid: {loan_id}")]
    LoanAlreadyRepaid {
        loan_id: LoanId,
    },

    #[error("loan already frozen: {loan_id}")]
    LoanAlreadyFrozen {
        loan_id: LoanId,
    },

    #[error("loan not frozen: {loan_id}")]
    LoanNotFrozen {
        loan_id: LoanId,
    },

    #[error("unexpected loan type for {loan_id}: expected {expected:?}, found {actual:?}")]
    LoanTypeUnexpected {
        loan_id: LoanId,
        expected: LoanKind,
        actual: LoanKind,
    },

    #[error("program not found: {program_id}")]
    ProgramNotFound {
        program_id: ProgramId,
    },

    #[error("program {program_id} has no addon treasury configured")]
    AddonTreasuryMissing {
        program_id: ProgramId,
    },

    #[error("hook rejected operation: {message}")]
    HookRejected {
        message: String,
    },

    // validation errors
    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("array length mismatch: expected {expected}, found {actual}")]
    ArrayLengthMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("inappropriate loan duration: current {current}, requested {requested}")]
    InappropriateLoanDuration {
        current: u32,
        requested: u32,
    },

    #[error("inappropriate interest rate: current {current}, requested {requested}")]
    InappropriateInterestRate {
        current: Rate,
        requested: Rate,
    },

    #[error("repayment timestamp invalid: {timestamp}")]
    RepaymentTimestampInvalid {
        timestamp: DateTime<Utc>,
    },

    #[error("installment durations must be non-decreasing")]
    DurationArrayInvalid,

    #[error("installment count {count} outside 1..={max}")]
    InstallmentCountExcess {
        count: usize,
        max: u32,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    // arithmetic bound errors
    #[error("loan duration out of range")]
    DurationOutOfRange,

    #[error("loan id counter exceeds {max}")]
    LoanIdExcess {
        max: u64,
    },

    #[error("arithmetic overflow in {context}")]
    ArithmeticOverflow {
        context: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
