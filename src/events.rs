use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::types::{BorrowerSettlement, LoanId, ProgramId};

/// all events that can be emitted by the lending market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // origination events
    LoanTaken {
        loan_id: LoanId,
        program_id: ProgramId,
        borrower: String,
        borrowed_amount: Money,
        addon_amount: Money,
        duration_in_periods: u32,
        timestamp: DateTime<Utc>,
    },
    InstallmentLoanTaken {
        first_installment_id: LoanId,
        installment_count: u32,
        program_id: ProgramId,
        borrower: String,
        total_borrowed_amount: Money,
        total_addon_amount: Money,
        timestamp: DateTime<Utc>,
    },

    // settlement events
    LoanRepayment {
        loan_id: LoanId,
        repayer: String,
        amount: Money,
        outstanding_balance: Money,
        timestamp: DateTime<Utc>,
    },
    LoanDiscounted {
        loan_id: LoanId,
        amount: Money,
        outstanding_balance: Money,
        timestamp: DateTime<Utc>,
    },
    LateFeeApplied {
        loan_id: LoanId,
        fee_amount: Money,
        timestamp: DateTime<Utc>,
    },
    BatchSettled {
        batch_id: Uuid,
        loan_count: usize,
        total_repaid: Money,
        total_discounted: Money,
        timestamp: DateTime<Utc>,
    },

    // freeze events
    LoanFrozen {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    LoanUnfrozen {
        loan_id: LoanId,
        frozen_periods: u32,
        new_duration_in_periods: u32,
        timestamp: DateTime<Utc>,
    },

    // term events
    LoanDurationUpdated {
        loan_id: LoanId,
        old_duration: u32,
        new_duration: u32,
    },
    InterestRatePrimaryUpdated {
        loan_id: LoanId,
        old_rate: Rate,
        new_rate: Rate,
    },
    InterestRateSecondaryUpdated {
        loan_id: LoanId,
        old_rate: Rate,
        new_rate: Rate,
    },

    // revocation and undo
    LoanRevoked {
        loan_id: LoanId,
        borrower_settlement: BorrowerSettlement,
        addon_refund: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentLoanRevoked {
        first_installment_id: LoanId,
        installment_count: u32,
        timestamp: DateTime<Utc>,
    },
    RepaymentUndone {
        loan_id: LoanId,
        amount: Money,
        repayment_timestamp: DateTime<Utc>,
        receiver: String,
        restored_balance: Money,
    },
    LoanReopened {
        loan_id: LoanId,
    },

    // token movements the market computed; execution is up to the caller
    TokenTransfer {
        token: String,
        from: String,
        to: String,
        amount: Money,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// record a transfer, zero amounts are dropped
    pub fn transfer(&mut self, token: &str, from: &str, to: &str, amount: Money) {
        if amount.is_zero() {
            return;
        }
        self.emit(Event::TokenTransfer {
            token: token.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount,
        });
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Event> {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::TokenTransfer { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_transfer_is_dropped() {
        let mut store = EventStore::new();
        store.transfer("USDT", "pool", "borrower", Money::ZERO);
        store.transfer("USDT", "pool", "borrower", Money::new(10_000));
        assert_eq!(store.transfers().count(), 1);
    }

    #[test]
    fn test_take_events_drains() {
        let mut store = EventStore::new();
        store.emit(Event::LoanReopened { loan_id: 3 });
        store.emit(Event::LoanFrozen {
            loan_id: 3,
            timestamp: Utc::now(),
        });
        assert_eq!(store.take_events().len(), 2);
        assert!(store.events().is_empty());
    }
}
