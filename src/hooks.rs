use crate::config::{CreditLineTerms, LateFeePolicy, LoanTerms};
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::state::Loan;

/// source of loan terms for a program
pub trait CreditLine {
    /// terms for a borrower requesting an amount, may reject
    fn loan_terms(&self, borrower: &str, borrowed_amount: Money) -> Result<LoanTerms>;

    /// late fee policy snapshotted into every loan at origination
    fn late_fee_policy(&self) -> LateFeePolicy;
}

/// credit line that grants the same terms to every borrower
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedTermsCreditLine {
    pub terms: CreditLineTerms,
}

impl FixedTermsCreditLine {
    pub fn new(terms: CreditLineTerms) -> Self {
        Self { terms }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let terms: CreditLineTerms =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        Ok(Self::new(terms))
    }
}

impl CreditLine for FixedTermsCreditLine {
    fn loan_terms(&self, _borrower: &str, borrowed_amount: Money) -> Result<LoanTerms> {
        if borrowed_amount < self.terms.min_borrowed_amount
            || borrowed_amount > self.terms.max_borrowed_amount
        {
            return Err(LedgerError::InvalidAmount {
                amount: borrowed_amount,
            });
        }
        Ok(LoanTerms {
            token: self.terms.token.clone(),
            addon_amount: self.terms.addon_for(borrowed_amount)?,
            duration_in_periods: self.terms.duration_in_periods,
            interest_rate_primary: self.terms.interest_rate_primary,
            interest_rate_secondary: self.terms.interest_rate_secondary,
        })
    }

    fn late_fee_policy(&self) -> LateFeePolicy {
        self.terms.late_fee_policy
    }
}

/// callbacks around loan lifecycle transitions
///
/// before-hooks can veto the operation; after-hooks observe committed state.
pub trait LoanHooks {
    fn on_before_loan_taken(&mut self, _loan: &Loan) -> Result<()> {
        Ok(())
    }

    fn on_after_loan_payment(&mut self, _loan: &Loan, _amount: Money) {}

    fn on_after_loan_revocation(&mut self, _loan: &Loan) {}

    fn on_before_loan_reopened(&mut self, _loan: &Loan) -> Result<()> {
        Ok(())
    }
}

/// hooks that accept everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl LoanHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;

    #[test]
    fn test_fixed_terms_grants_addon() {
        let line = FixedTermsCreditLine::new(
            CreditLineTerms::standard("USDT", 10, Rate::from_percentage(10), Rate::from_percentage(20))
                .with_addon_rate(Rate::from_raw(1_000)),
        );
        let terms = line.loan_terms("alice", Money::new(100_000_000_000)).unwrap();
        assert_eq!(terms.addon_amount, Money::new(100_000));
        assert_eq!(terms.duration_in_periods, 10);
        assert_eq!(terms.token, "USDT");
    }

    #[test]
    fn test_fixed_terms_enforces_limits() {
        let line = FixedTermsCreditLine::new(
            CreditLineTerms::standard("USDT", 10, Rate::from_percentage(10), Rate::from_percentage(20))
                .with_borrow_limits(Money::new(10_000), Money::new(1_000_000)),
        );
        assert!(matches!(
            line.loan_terms("alice", Money::new(2_000_000)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(line.loan_terms("alice", Money::new(1_000_000)).is_ok());
    }

    #[test]
    fn test_credit_line_from_json() {
        let json = serde_json::to_string(
            &CreditLineTerms::standard("USDC", 30, Rate::from_percentage(1), Rate::from_percentage(2))
                .with_late_fee(LateFeePolicy::Flat(Money::new(50_000))),
        )
        .unwrap();
        let line = FixedTermsCreditLine::from_json(&json).unwrap();
        assert_eq!(line.late_fee_policy(), LateFeePolicy::Flat(Money::new(50_000)));

        assert!(matches!(
            FixedTermsCreditLine::from_json("{"),
            Err(LedgerError::InvalidConfiguration { .. })
        ));
    }
}
