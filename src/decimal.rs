use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Sub, SubAssign};

/// rounding granularity of every externally visible amount
pub const ACCURACY_FACTOR: u64 = 10_000;

/// denominator of all interest and late fee rates
pub const INTEREST_RATE_FACTOR: u64 = 1_000_000_000;

/// Token amount in the token's smallest unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// sentinel meaning "repay whatever is outstanding"
    pub const FULL_REPAYMENT: Money = Money(u64::MAX);

    pub const fn new(units: u64) -> Self {
        Money(units)
    }

    /// get raw units
    pub fn units(&self) -> u64 {
        self.0
    }

    /// get as decimal for rate math
    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }

    /// create from decimal, rounding half away from zero to whole units
    pub fn from_decimal(d: Decimal) -> Option<Self> {
        d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
            .map(Money)
    }

    /// check if zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// check for the full repayment sentinel
    pub fn is_full_repayment(&self) -> bool {
        *self == Self::FULL_REPAYMENT
    }

    /// check if a multiple of the accuracy factor
    pub fn is_rounded(&self) -> bool {
        self.0 % ACCURACY_FACTOR == 0
    }

    /// round half away from zero to the nearest multiple of the accuracy factor
    pub fn round_to_accuracy(&self) -> Self {
        let remainder = self.0 % ACCURACY_FACTOR;
        let floor = self.0 - remainder;
        if remainder >= ACCURACY_FACTOR - ACCURACY_FACTOR / 2 {
            Money(floor.saturating_add(ACCURACY_FACTOR))
        } else {
            Money(floor)
        }
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// total of `amounts`, or `None` on overflow
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts.into_iter().try_fold(Money::ZERO, Money::checked_add)
    }

    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Money {
    fn from(units: u64) -> Self {
        Money(units)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}


/// rate per period, expressed in units of INTEREST_RATE_FACTOR
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Rate(u64);

impl Rate {
    pub const ZERO: Rate = Rate(0);

    /// create from raw factor units (100_000_000 is 10%)
    pub const fn from_raw(raw: u64) -> Self {
        Rate(raw)
    }

    /// create from percentage (e.g., 5 for 5%)
    pub fn from_percentage(p: u32) -> Self {
        Rate(u64::from(p) * (INTEREST_RATE_FACTOR / 100))
    }

    /// create from basis points (e.g., 500 for 5%)
    pub fn from_bps(bps: u32) -> Self {
        Rate(u64::from(bps) * (INTEREST_RATE_FACTOR / 10_000))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// get as decimal fraction (0.1 for 10%)
    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(INTEREST_RATE_FACTOR)
    }

    /// get as percentage
    pub fn as_percentage(&self) -> Decimal {
        self.as_decimal() * Decimal::from(100)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().normalize())
    }
}
