use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{info, instrument};

use crate::config::{LoanTerms, MarketConfig};
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::hooks::{CreditLine, LoanHooks, NoopHooks};
use crate::ledger::{ensure_kind, LedgerMutator, LedgerUpdate, Revocation, Unfreeze};
use crate::payments::{BatchCoordinator, BatchOperation, BatchOutcome, PaymentRequest, UndoEngine, UndoOutcome};
use crate::serialization::LoanView;
use crate::state::{ExtendedLoanPreview, InstallmentLoanPreview, Loan, LoanPreview};
use crate::types::{BorrowerSettlement, LoanId, LoanKind, ProgramId, SettlementKind};

/// where a program's tokens come from and where addons go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub liquidity_pool: String,
    pub addon_treasury: Option<String>,
}

impl ProgramConfig {
    pub fn new(liquidity_pool: &str) -> Self {
        Self {
            liquidity_pool: liquidity_pool.to_string(),
            addon_treasury: None,
        }
    }

    pub fn with_addon_treasury(mut self, addon_treasury: &str) -> Self {
        self.addon_treasury = Some(addon_treasury.to_string());
        self
    }
}

struct Program {
    config: ProgramConfig,
    credit_line: Box<dyn CreditLine>,
}

/// loan table plus the programs and collaborators around it
pub struct LendingMarket {
    config: MarketConfig,
    mutator: LedgerMutator,
    undo: UndoEngine,
    batch: BatchCoordinator,
    loans: BTreeMap<LoanId, Loan>,
    next_loan_id: LoanId,
    programs: BTreeMap<ProgramId, Program>,
    events: EventStore,
    hooks: Box<dyn LoanHooks>,
}

impl LendingMarket {
    pub fn new(config: MarketConfig) -> Result<Self> {
        config.validate()?;
        let clock = config.clock();
        let mutator = LedgerMutator::new(clock);
        Ok(Self {
            config,
            mutator,
            undo: UndoEngine::new(clock),
            batch: BatchCoordinator::new(mutator),
            loans: BTreeMap::new(),
            next_loan_id: 0,
            programs: BTreeMap::new(),
            events: EventStore::new(),
            hooks: Box::new(NoopHooks),
        })
    }

    pub fn with_hooks(mut self, hooks: Box<dyn LoanHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    /// recorded token movements, in order
    pub fn transfers(&self) -> impl Iterator<Item = &Event> {
        self.events.transfers()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    pub fn loan_count(&self) -> u64 {
        self.next_loan_id
    }

    pub fn register_program(
        &mut self,
        program_id: ProgramId,
        credit_line: impl CreditLine + 'static,
        config: ProgramConfig,
    ) -> Result<()> {
        if self.programs.contains_key(&program_id) {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("program {} already registered", program_id),
            });
        }
        self.programs.insert(
            program_id,
            Program {
                config,
                credit_line: Box::new(credit_line),
            },
        );
        Ok(())
    }

    fn program(&self, program_id: ProgramId) -> Result<&Program> {
        self.programs
            .get(&program_id)
            .ok_or(LedgerError::ProgramNotFound { program_id })
    }

    fn loan(&self, loan_id: LoanId) -> Result<&Loan> {
        self.loans.get(&loan_id).ok_or(LedgerError::LoanNotExist { loan_id })
    }

    /// first of `count` fresh ids, checked against the id bound
    fn reserve_ids(&self, count: u64) -> Result<LoanId> {
        let max = self.config.max_loan_id;
        let last = self
            .next_loan_id
            .checked_add(count.saturating_sub(1))
            .ok_or(LedgerError::LoanIdExcess { max })?;
        if last > max {
            return Err(LedgerError::LoanIdExcess { max });
        }
        Ok(self.next_loan_id)
    }

    fn validate_borrowed(amount: Money) -> Result<()> {
        if amount.is_zero() || !amount.is_rounded() || amount.is_full_repayment() {
            return Err(LedgerError::InvalidAmount { amount });
        }
        Ok(())
    }

    fn validate_addon(program_id: ProgramId, program: &Program, addon: Money) -> Result<()> {
        if !addon.is_rounded() {
            return Err(LedgerError::InvalidAmount { amount: addon });
        }
        if !addon.is_zero() && program.config.addon_treasury.is_none() {
            return Err(LedgerError::AddonTreasuryMissing { program_id });
        }
        Ok(())
    }

    // origination

    #[instrument(name = "market.take_loan", skip(self, time), err)]
    pub fn take_loan(
        &mut self,
        borrower: &str,
        program_id: ProgramId,
        borrowed_amount: Money,
        time: &SafeTimeProvider,
    ) -> Result<LoanId> {
        let now = time.now();
        let program = self.program(program_id)?;
        Self::validate_borrowed(borrowed_amount)?;
        let terms = program.credit_line.loan_terms(borrower, borrowed_amount)?;
        Self::validate_addon(program_id, program, terms.addon_amount)?;
        let late_fee_policy = program.credit_line.late_fee_policy();
        let config = program.config.clone();
        let loan_id = self.reserve_ids(1)?;

        let loan = Loan::new(loan_id, program_id, borrower, borrowed_amount, &terms, late_fee_policy, now)?;
        self.hooks.on_before_loan_taken(&loan)?;

        self.events.emit(Event::LoanTaken {
            loan_id,
            program_id,
            borrower: borrower.to_string(),
            borrowed_amount,
            addon_amount: terms.addon_amount,
            duration_in_periods: terms.duration_in_periods,
            timestamp: now,
        });
        self.events.transfer(&terms.token, &config.liquidity_pool, borrower, borrowed_amount);
        if let Some(treasury) = &config.addon_treasury {
            self.events.transfer(&terms.token, &config.liquidity_pool, treasury, terms.addon_amount);
        }

        self.loans.insert(loan_id, loan);
        self.next_loan_id += 1;
        info!(loan_id, "loan taken");
        Ok(loan_id)
    }

    /// originate one sub-loan per element, sharing the credit line's rates
    #[instrument(name = "market.take_installment_loan", skip(self, time), err)]
    pub fn take_installment_loan(
        &mut self,
        borrower: &str,
        program_id: ProgramId,
        borrowed_amounts: &[Money],
        addon_amounts: &[Money],
        durations_in_periods: &[u32],
        time: &SafeTimeProvider,
    ) -> Result<Range<LoanId>> {
        let now = time.now();
        let count = borrowed_amounts.len();
        for len in [addon_amounts.len(), durations_in_periods.len()] {
            if len != count {
                return Err(LedgerError::ArrayLengthMismatch {
                    expected: count,
                    actual: len,
                });
            }
        }
        let max = self.config.max_installment_count;
        if count == 0 || count > max as usize {
            return Err(LedgerError::InstallmentCountExcess { count, max });
        }
        if durations_in_periods.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(LedgerError::DurationArrayInvalid);
        }

        let program = self.program(program_id)?;
        let mut total_borrowed = Money::ZERO;
        let mut total_addon = Money::ZERO;
        for (&borrowed, &addon) in borrowed_amounts.iter().zip(addon_amounts) {
            Self::validate_borrowed(borrowed)?;
            Self::validate_addon(program_id, program, addon)?;
            let overflow = LedgerError::ArithmeticOverflow {
                context: "installment totals",
            };
            total_borrowed = total_borrowed.checked_add(borrowed).ok_or(overflow.clone())?;
            total_addon = total_addon.checked_add(addon).ok_or(overflow)?;
        }

        let group_terms = program.credit_line.loan_terms(borrower, total_borrowed)?;
        let late_fee_policy = program.credit_line.late_fee_policy();
        let config = program.config.clone();
        let first_installment_id = self.reserve_ids(count as u64)?;
        let installment_count = count as u32;

        let mut staged = Vec::with_capacity(count);
        for (index, ((&borrowed, &addon), &duration)) in borrowed_amounts
            .iter()
            .zip(addon_amounts)
            .zip(durations_in_periods)
            .enumerate()
        {
            let terms = LoanTerms {
                addon_amount: addon,
                duration_in_periods: duration,
                ..group_terms.clone()
            };
            let loan = Loan::new(
                first_installment_id + index as u64,
                program_id,
                borrower,
                borrowed,
                &terms,
                late_fee_policy,
                now,
            )?
            .with_installment(first_installment_id, installment_count);
            self.hooks.on_before_loan_taken(&loan)?;
            staged.push(loan);
        }

        self.events.emit(Event::InstallmentLoanTaken {
            first_installment_id,
            installment_count,
            program_id,
            borrower: borrower.to_string(),
            total_borrowed_amount: total_borrowed,
            total_addon_amount: total_addon,
            timestamp: now,
        });
        self.events.transfer(&group_terms.token, &config.liquidity_pool, borrower, total_borrowed);
        if let Some(treasury) = &config.addon_treasury {
            self.events.transfer(&group_terms.token, &config.liquidity_pool, treasury, total_addon);
        }

        self.loans.extend(staged.into_iter().map(|loan| (loan.id, loan)));
        self.next_loan_id += count as u64;
        info!(first_installment_id, installment_count, "installment loan taken");
        Ok(first_installment_id..first_installment_id + count as u64)
    }

    // settlement

    /// events, transfers and hooks for a committed settlement
    fn record_update(&mut self, update: &LedgerUpdate, repayer: &str) {
        if update.stale {
            return;
        }
        let Some(loan) = self.loans.get(&update.loan_id) else {
            return;
        };
        if !update.late_fee_locked.is_zero() {
            self.events.emit(Event::LateFeeApplied {
                loan_id: loan.id,
                fee_amount: update.late_fee_locked,
                timestamp: update.timestamp,
            });
        }
        match update.kind {
            SettlementKind::Repayment => {
                self.events.emit(Event::LoanRepayment {
                    loan_id: loan.id,
                    repayer: repayer.to_string(),
                    amount: update.amount,
                    outstanding_balance: update.tracked_balance.round_to_accuracy(),
                    timestamp: update.timestamp,
                });
                if let Some(program) = self.programs.get(&loan.program_id) {
                    self.events
                        .transfer(&loan.token, repayer, &program.config.liquidity_pool, update.amount);
                }
                self.hooks.on_after_loan_payment(loan, update.amount);
            }
            SettlementKind::Discount => {
                self.events.emit(Event::LoanDiscounted {
                    loan_id: loan.id,
                    amount: update.amount,
                    outstanding_balance: update.tracked_balance.round_to_accuracy(),
                    timestamp: update.timestamp,
                });
            }
            SettlementKind::Accrual => {}
        }
    }

    /// repay a loan at the current time; stale submissions are accepted and ignored
    #[instrument(name = "market.repay_loan", skip(self, time), err)]
    pub fn repay_loan(
        &mut self,
        loan_id: LoanId,
        amount: Money,
        repayer: &str,
        time: &SafeTimeProvider,
    ) -> Result<LedgerUpdate> {
        let now = time.now();
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        let update = self.mutator.repay(loan, amount, now)?;
        self.record_update(&update, repayer);
        Ok(update)
    }

    fn settle_batch(
        &mut self,
        operation: BatchOperation,
        loan_ids: &[LoanId],
        amounts: &[Money],
        repayer: &str,
        time: &SafeTimeProvider,
    ) -> Result<BatchOutcome> {
        let requests = PaymentRequest::zip(loan_ids, amounts)?;
        let outcome = self.batch.settle(&mut self.loans, operation, &requests, time.now())?;
        for update in &outcome.updates {
            self.record_update(update, repayer);
        }
        self.events.emit(Event::BatchSettled {
            batch_id: outcome.batch_id,
            loan_count: requests.len(),
            total_repaid: outcome.total_repaid,
            total_discounted: outcome.total_discounted,
            timestamp: outcome.timestamp,
        });
        Ok(outcome)
    }

    #[instrument(name = "market.repay_loan_for_batch", skip(self, time), err)]
    pub fn repay_loan_for_batch(
        &mut self,
        loan_ids: &[LoanId],
        amounts: &[Money],
        repayer: &str,
        time: &SafeTimeProvider,
    ) -> Result<BatchOutcome> {
        self.settle_batch(BatchOperation::Repay, loan_ids, amounts, repayer, time)
    }

    #[instrument(name = "market.discount_loan_for_batch", skip(self, time), err)]
    pub fn discount_loan_for_batch(
        &mut self,
        loan_ids: &[LoanId],
        amounts: &[Money],
        time: &SafeTimeProvider,
    ) -> Result<BatchOutcome> {
        self.settle_batch(BatchOperation::Discount, loan_ids, amounts, "", time)
    }

    // freezing and terms

    #[instrument(name = "market.freeze", skip(self, time), err)]
    pub fn freeze(&mut self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<()> {
        let now = time.now();
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        self.mutator.freeze(loan, now)?;
        self.events.emit(Event::LoanFrozen {
            loan_id,
            timestamp: now,
        });
        Ok(())
    }

    #[instrument(name = "market.unfreeze", skip(self, time), err)]
    pub fn unfreeze(&mut self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Unfreeze> {
        let now = time.now();
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        let unfreeze = self.mutator.unfreeze(loan, now)?;
        if !unfreeze.settlement.late_fee_locked.is_zero() {
            self.events.emit(Event::LateFeeApplied {
                loan_id,
                fee_amount: unfreeze.settlement.late_fee_locked,
                timestamp: unfreeze.settlement.timestamp,
            });
        }
        self.events.emit(Event::LoanUnfrozen {
            loan_id,
            frozen_periods: unfreeze.frozen_periods,
            new_duration_in_periods: unfreeze.new_duration_in_periods,
            timestamp: now,
        });
        Ok(unfreeze)
    }

    #[instrument(name = "market.update_loan_duration", skip(self), err)]
    pub fn update_loan_duration(&mut self, loan_id: LoanId, new_duration: u32) -> Result<()> {
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        let old_duration = self.mutator.update_duration(loan, new_duration)?;
        self.events.emit(Event::LoanDurationUpdated {
            loan_id,
            old_duration,
            new_duration,
        });
        Ok(())
    }

    #[instrument(name = "market.update_loan_interest_rate_primary", skip(self), err)]
    pub fn update_loan_interest_rate_primary(&mut self, loan_id: LoanId, new_rate: Rate) -> Result<()> {
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        let old_rate = self.mutator.update_interest_rate_primary(loan, new_rate)?;
        self.events.emit(Event::InterestRatePrimaryUpdated {
            loan_id,
            old_rate,
            new_rate,
        });
        Ok(())
    }

    #[instrument(name = "market.update_loan_interest_rate_secondary", skip(self), err)]
    pub fn update_loan_interest_rate_secondary(&mut self, loan_id: LoanId, new_rate: Rate) -> Result<()> {
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        let old_rate = self.mutator.update_interest_rate_secondary(loan, new_rate)?;
        self.events.emit(Event::InterestRateSecondaryUpdated {
            loan_id,
            old_rate,
            new_rate,
        });
        Ok(())
    }

    // revocation

    /// transfers reconciling principal and addon after revocation
    fn record_revocation_transfers(
        &mut self,
        token: &str,
        borrower: &str,
        config: &ProgramConfig,
        settlement: BorrowerSettlement,
        addon_refund: Money,
    ) {
        match settlement {
            BorrowerSettlement::Refund(amount) => {
                self.events.transfer(token, &config.liquidity_pool, borrower, amount)
            }
            BorrowerSettlement::Collect(amount) => {
                self.events.transfer(token, borrower, &config.liquidity_pool, amount)
            }
            BorrowerSettlement::Even => {}
        }
        if let Some(treasury) = &config.addon_treasury {
            self.events.transfer(token, treasury, &config.liquidity_pool, addon_refund);
        }
    }

    #[instrument(name = "market.revoke_loan", skip(self, time), err)]
    pub fn revoke_loan(&mut self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Revocation> {
        let now = time.now();
        let loan = self.loan(loan_id)?;
        ensure_kind(loan, LoanKind::Ordinary)?;
        let config = self.program(loan.program_id)?.config.clone();

        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        let revocation = self.mutator.revoke(loan, now)?;
        let (token, borrower) = (loan.token.clone(), loan.borrower.clone());

        self.events.emit(Event::LoanRevoked {
            loan_id,
            borrower_settlement: revocation.borrower_settlement,
            addon_refund: revocation.addon_refund,
            timestamp: now,
        });
        self.record_revocation_transfers(
            &token,
            &borrower,
            &config,
            revocation.borrower_settlement,
            revocation.addon_refund,
        );
        if let Some(loan) = self.loans.get(&loan_id) {
            self.hooks.on_after_loan_revocation(loan);
        }
        Ok(revocation)
    }

    /// revoke every open sub-loan of the group `loan_id` belongs to
    ///
    /// Borrower settlements are netted across the revoked sub-loans only. A
    /// sub-loan that is already repaid or revoked is left out, so principal the
    /// borrower repaid beyond it is not refunded here.
    #[instrument(name = "market.revoke_installment_loan", skip(self, time), err)]
    pub fn revoke_installment_loan(&mut self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Vec<Revocation>> {
        let now = time.now();
        let loan = self.loan(loan_id)?;
        ensure_kind(loan, LoanKind::Installment)?;
        let group = loan.group_ids();
        let (token, borrower) = (loan.token.clone(), loan.borrower.clone());
        let config = self.program(loan.program_id)?.config.clone();

        let revocations = self.batch.revoke_group(&mut self.loans, group.clone(), now)?;

        let net: i128 = revocations.iter().map(|r| r.borrower_settlement.net()).sum();
        let settlement = match u64::try_from(net.unsigned_abs()) {
            Ok(0) => BorrowerSettlement::Even,
            Ok(amount) if net > 0 => BorrowerSettlement::Refund(Money::new(amount)),
            Ok(amount) => BorrowerSettlement::Collect(Money::new(amount)),
            Err(_) => {
                return Err(LedgerError::ArithmeticOverflow {
                    context: "installment revocation",
                })
            }
        };
        let addon_refund = Money::checked_sum(revocations.iter().map(|r| r.addon_refund)).ok_or(
            LedgerError::ArithmeticOverflow {
                context: "installment addon refund",
            },
        )?;

        for revocation in &revocations {
            self.events.emit(Event::LoanRevoked {
                loan_id: revocation.loan_id,
                borrower_settlement: revocation.borrower_settlement,
                addon_refund: revocation.addon_refund,
                timestamp: now,
            });
        }
        self.events.emit(Event::InstallmentLoanRevoked {
            first_installment_id: group.start,
            installment_count: (group.end - group.start) as u32,
            timestamp: now,
        });
        self.record_revocation_transfers(&token, &borrower, &config, settlement, addon_refund);
        for revocation in &revocations {
            if let Some(loan) = self.loans.get(&revocation.loan_id) {
                self.hooks.on_after_loan_revocation(loan);
            }
        }
        Ok(revocations)
    }

    // undo

    /// reverse a repayment of `amount` recorded at `repayment_timestamp`, paying it back to `receiver`
    #[instrument(name = "market.undo_repayment_for", skip(self), err)]
    pub fn undo_repayment_for(
        &mut self,
        loan_id: LoanId,
        amount: Money,
        repayment_timestamp: DateTime<Utc>,
        receiver: &str,
    ) -> Result<UndoOutcome> {
        let loan = self.loan(loan_id)?;
        let config = self.program(loan.program_id)?.config.clone();

        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotExist { loan_id })?;
        self.undo.validate(loan, amount, repayment_timestamp)?;
        if loan.is_terminal() {
            self.hooks.on_before_loan_reopened(loan)?;
        }
        let outcome = self.undo.undo_repayment(loan, amount, repayment_timestamp)?;
        let token = loan.token.clone();

        self.events.emit(Event::RepaymentUndone {
            loan_id,
            amount,
            repayment_timestamp,
            receiver: receiver.to_string(),
            restored_balance: outcome.restored_balance,
        });
        if outcome.reopened {
            self.events.emit(Event::LoanReopened { loan_id });
        }
        self.events.transfer(&token, &config.liquidity_pool, receiver, amount);
        Ok(outcome)
    }

    // reads

    pub fn get_loan_state(&self, loan_id: LoanId) -> Result<&Loan> {
        self.loan(loan_id)
    }

    pub fn get_loan_preview(&self, loan_id: LoanId, timestamp: DateTime<Utc>) -> Result<LoanPreview> {
        self.mutator.accrual.preview(self.loan(loan_id)?, timestamp)
    }

    fn extended_preview(&self, loan: &Loan, timestamp: DateTime<Utc>) -> Result<ExtendedLoanPreview> {
        let preview = self.mutator.accrual.preview(loan, timestamp)?;
        let late_fee_amount = loan
            .late_fee_amount
            .checked_add(preview.pending_late_fee)
            .ok_or(LedgerError::ArithmeticOverflow {
                context: "late fee total",
            })?;
        Ok(ExtendedLoanPreview {
            loan_id: loan.id,
            program_id: loan.program_id,
            borrower: loan.borrower.clone(),
            preview_timestamp: timestamp,
            period_index: preview.period_index,
            due_period_index: self.mutator.clock().due_index(loan),
            tracked_balance: preview.tracked_balance,
            outstanding_balance: preview.outstanding_balance,
            borrowed_amount: loan.borrowed_amount,
            addon_amount: loan.addon_amount,
            repaid_amount: loan.repaid_amount,
            discount_amount: loan.discount_amount,
            late_fee_amount,
            status: loan.status(),
            first_installment_id: loan.first_installment_id,
            installment_count: loan.installment_count,
        })
    }

    pub fn get_loan_preview_extended_batch(
        &self,
        loan_ids: &[LoanId],
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<ExtendedLoanPreview>> {
        loan_ids
            .iter()
            .map(|&loan_id| self.extended_preview(self.loan(loan_id)?, timestamp))
            .collect()
    }

    /// aggregate preview of the installment group `loan_id` belongs to
    pub fn get_installment_loan_preview(
        &self,
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    ) -> Result<InstallmentLoanPreview> {
        let ids: Vec<LoanId> = self.loan(loan_id)?.group_ids().collect();
        let previews = self.get_loan_preview_extended_batch(&ids, timestamp)?;
        InstallmentLoanPreview::aggregate(previews)?.ok_or(LedgerError::LoanNotExist { loan_id })
    }

    /// pretty json of a loan and its preview at the timestamp
    pub fn loan_json(&self, loan_id: LoanId, timestamp: DateTime<Utc>) -> Result<String> {
        let loan = self.loan(loan_id)?;
        let preview = self.mutator.accrual.preview(loan, timestamp)?;
        Ok(LoanView::from_loan(loan, &preview, timestamp)
            .to_json_pretty()
            .unwrap_or_else(|e| format!("JSON error: {}", e)))
    }
}
