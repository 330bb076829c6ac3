use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::debug;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::ledger::{ensure_kind, LedgerMutator, LedgerUpdate, Revocation};
use crate::payments::PaymentRequest;
use crate::state::Loan;
use crate::types::{LoanId, LoanKind, SettlementKind};

/// settlement applied to every element of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOperation {
    Repay,
    Discount,
}

/// committed result of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub updates: Vec<LedgerUpdate>,
    pub total_repaid: Money,
    pub total_discounted: Money,
}

impl BatchOutcome {
    fn new(timestamp: DateTime<Utc>, updates: Vec<LedgerUpdate>) -> Result<Self> {
        let total_for = |kind: SettlementKind| {
            Money::checked_sum(updates.iter().filter(|u| u.kind == kind).map(|u| u.amount))
                .ok_or(LedgerError::ArithmeticOverflow { context: "batch totals" })
        };
        Ok(Self {
            batch_id: Uuid::new_v4(),
            timestamp,
            total_repaid: total_for(SettlementKind::Repayment)?,
            total_discounted: total_for(SettlementKind::Discount)?,
            updates,
        })
    }
}

/// fans ledger operations out over several loans, all or nothing
///
/// Every touched loan is cloned into a staging map and mutated there. The
/// loan table is only written once every element has succeeded, so a failing
/// element leaves no trace. A loan id repeated within one batch operates on
/// its already staged copy.
#[derive(Debug, Clone, Copy)]
pub struct BatchCoordinator {
    mutator: LedgerMutator,
}

impl BatchCoordinator {
    pub fn new(mutator: LedgerMutator) -> Self {
        Self { mutator }
    }

    fn stage<'a>(
        staged: &'a mut BTreeMap<LoanId, Loan>,
        loans: &BTreeMap<LoanId, Loan>,
        loan_id: LoanId,
    ) -> Result<&'a mut Loan> {
        match staged.entry(loan_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let loan = loans.get(&loan_id).ok_or(LedgerError::LoanNotExist { loan_id })?;
                Ok(entry.insert(loan.clone()))
            }
        }
    }

    /// stage a settlement batch without committing it
    pub fn prepare(
        &self,
        loans: &BTreeMap<LoanId, Loan>,
        operation: BatchOperation,
        requests: &[PaymentRequest],
        timestamp: DateTime<Utc>,
    ) -> Result<(BTreeMap<LoanId, Loan>, BatchOutcome)> {
        let mut staged = BTreeMap::new();
        let mut updates = Vec::with_capacity(requests.len());

        for request in requests {
            let loan = Self::stage(&mut staged, loans, request.loan_id)?;
            let update = match operation {
                BatchOperation::Repay => self.mutator.repay(loan, request.amount, timestamp)?,
                BatchOperation::Discount => self.mutator.discount(loan, request.amount, timestamp)?,
            };
            updates.push(update);
        }

        Ok((staged, BatchOutcome::new(timestamp, updates)?))
    }

    /// apply a settlement to every request, committing only if all succeed
    pub fn settle(
        &self,
        loans: &mut BTreeMap<LoanId, Loan>,
        operation: BatchOperation,
        requests: &[PaymentRequest],
        timestamp: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let (staged, outcome) = self.prepare(loans, operation, requests, timestamp)?;
        loans.extend(staged);
        debug!(
            batch_id = %outcome.batch_id,
            ?operation,
            loans = requests.len(),
            "batch committed"
        );
        Ok(outcome)
    }

    /// revoke every open sub-loan of an installment group
    ///
    /// Sub-loans that are already terminal are left as they are. The group as
    /// a whole must still have at least one open sub-loan.
    pub fn revoke_group(
        &self,
        loans: &mut BTreeMap<LoanId, Loan>,
        group: Range<LoanId>,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Revocation>> {
        let first_installment_id = group.start;
        let mut staged = BTreeMap::new();
        let mut revocations = Vec::new();

        for loan_id in group {
            let loan = Self::stage(&mut staged, loans, loan_id)?;
            ensure_kind(loan, LoanKind::Installment)?;
            if loan.is_terminal() {
                continue;
            }
            revocations.push(self.mutator.revoke(loan, timestamp)?);
        }

        if revocations.is_empty() {
            return Err(LedgerError::LoanAlreadyRepaid {
                loan_id: first_installment_id,
            });
        }

        loans.extend(staged);
        Ok(revocations)
    }
}
