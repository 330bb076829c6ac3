pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod hooks;
pub mod interest;
pub mod ledger;
pub mod market;
pub mod payments;
pub mod serialization;
pub mod state;
pub mod types;

// re-export key types
pub use config::{CreditLineTerms, LateFeePolicy, LoanTerms, MarketConfig};
pub use decimal::{Money, Rate, ACCURACY_FACTOR, INTEREST_RATE_FACTOR};
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore};
pub use hooks::{CreditLine, FixedTermsCreditLine, LoanHooks, NoopHooks};
pub use interest::{AccrualEngine, AccrualSpan, LateFeeEngine, PeriodClock};
pub use ledger::{LedgerMutator, LedgerUpdate, Revocation, Unfreeze};
pub use market::{LendingMarket, ProgramConfig};
pub use payments::{BatchCoordinator, BatchOperation, BatchOutcome, PaymentRequest, UndoEngine, UndoOutcome};
pub use serialization::LoanView;
pub use state::{ExtendedLoanPreview, FrozenWindow, InstallmentLoanPreview, Loan, LoanPreview};
pub use types::{BorrowerSettlement, LoanId, LoanKind, LoanStatus, ProgramId, SettlementKind};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
