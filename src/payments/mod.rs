pub mod batch;
pub mod undo;

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::LoanId;

pub use batch::{BatchCoordinator, BatchOperation, BatchOutcome};
pub use undo::{UndoEngine, UndoOutcome};

/// one loan and the amount to settle against it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub loan_id: LoanId,
    pub amount: Money,
}

impl PaymentRequest {
    pub fn new(loan_id: LoanId, amount: Money) -> Self {
        Self { loan_id, amount }
    }

    /// pair parallel id and amount arrays
    pub fn zip(loan_ids: &[LoanId], amounts: &[Money]) -> Result<Vec<Self>> {
        if loan_ids.len() != amounts.len() {
            return Err(LedgerError::ArrayLengthMismatch {
                expected: loan_ids.len(),
                actual: amounts.len(),
            });
        }
        Ok(loan_ids
            .iter()
            .zip(amounts)
            .map(|(&loan_id, &amount)| Self::new(loan_id, amount))
            .collect())
    }

    pub fn is_full_repayment(&self) -> bool {
        self.amount.is_full_repayment()
    }
}
