pub mod accrual;
pub mod compound;
pub mod penalty;
pub mod period;

pub use accrual::{AccrualEngine, AccrualSpan};
pub use compound::{compound_balance, compound_factor};
pub use penalty::LateFeeEngine;
pub use period::PeriodClock;
