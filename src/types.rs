use serde::{Deserialize, Serialize};

use crate::decimal::Money;

/// monotonically assigned loan identifier
pub type LoanId = u64;

/// lending program identifier
pub type ProgramId = u32;

/// loan type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanKind {
    /// single loan, not part of an installment group
    Ordinary,
    /// sub-loan of an installment group
    Installment,
}

/// loan status, derived from the ledger fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// accruing
    Active,
    /// accrual suspended at the freeze timestamp
    Frozen,
    /// tracked balance settled to zero by repayment or discount
    Repaid,
    /// tracked balance forced to zero by revocation
    Revoked,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Repaid | LoanStatus::Revoked)
    }
}

/// which ledger counter a settlement credits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    /// token-moving repayment, credits repaid amount
    Repayment,
    /// lender-granted reduction, credits discount amount
    Discount,
    /// zero-amount settlement that only locks in accrual
    Accrual,
}

/// net principal reconciliation with the borrower on revocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorrowerSettlement {
    /// borrower repaid more than borrowed and gets the excess back
    Refund(Money),
    /// borrower still owes the uncovered principal
    Collect(Money),
    /// repaid amount equals borrowed amount
    Even,
}

impl BorrowerSettlement {
    /// repaid minus borrowed
    pub fn from_amounts(repaid: Money, borrowed: Money) -> Self {
        if repaid > borrowed {
            BorrowerSettlement::Refund(repaid - borrowed)
        } else if repaid < borrowed {
            BorrowerSettlement::Collect(borrowed - repaid)
        } else {
            BorrowerSettlement::Even
        }
    }

    /// signed view: positive is owed to the borrower
    pub fn net(&self) -> i128 {
        match self {
            BorrowerSettlement::Refund(m) => i128::from(m.units()),
            BorrowerSettlement::Collect(m) => -i128::from(m.units()),
            BorrowerSettlement::Even => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrower_settlement_direction() {
        let borrowed = Money::new(1_000_000);
        assert_eq!(
            BorrowerSettlement::from_amounts(Money::new(1_200_000), borrowed),
            BorrowerSettlement::Refund(Money::new(200_000))
        );
        assert_eq!(
            BorrowerSettlement::from_amounts(Money::new(300_000), borrowed),
            BorrowerSettlement::Collect(Money::new(700_000))
        );
        assert_eq!(BorrowerSettlement::from_amounts(borrowed, borrowed), BorrowerSettlement::Even);
        assert_eq!(BorrowerSettlement::Collect(Money::new(5)).net(), -5);
    }
}
