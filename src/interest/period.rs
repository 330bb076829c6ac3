use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::state::Loan;

/// maps wall-clock timestamps onto discrete accrual periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodClock {
    pub period_length_secs: i64,
    pub negative_time_offset_secs: i64,
}

impl Default for PeriodClock {
    fn default() -> Self {
        Self::new(86_400, 3 * 3_600)
    }
}

impl PeriodClock {
    pub fn new(period_length_secs: i64, negative_time_offset_secs: i64) -> Self {
        Self {
            period_length_secs,
            negative_time_offset_secs,
        }
    }

    /// floor((timestamp - offset) / period length)
    pub fn period_index(&self, timestamp: DateTime<Utc>) -> i64 {
        (timestamp.timestamp() - self.negative_time_offset_secs).div_euclid(self.period_length_secs)
    }

    /// period at which the loan's stated duration elapses
    pub fn due_index(&self, loan: &Loan) -> i64 {
        self.period_index(loan.start_timestamp) + i64::from(loan.duration_in_periods)
    }

    /// the freeze timestamp replaces the caller's timestamp while frozen
    pub fn effective_timestamp(&self, loan: &Loan, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        loan.freeze_timestamp.unwrap_or(timestamp)
    }

    /// whole periods from one timestamp to another, never negative
    pub fn periods_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        (self.period_index(to) - self.period_index(from)).max(0)
    }

    /// first second of a period
    pub fn period_start(&self, period_index: i64) -> Option<DateTime<Utc>> {
        let secs = period_index
            .checked_mul(self.period_length_secs)?
            .checked_add(self.negative_time_offset_secs)?;
        Utc.timestamp_opt(secs, 0).single()
    }
}
