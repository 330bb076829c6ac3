use rust_decimal::Decimal;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};

/// (1 + rate)^periods by repeated squaring, None on overflow
pub fn compound_factor(rate: Rate, periods: u64) -> Option<Decimal> {
    let mut base = Decimal::ONE + rate.as_decimal();
    let mut factor = Decimal::ONE;
    let mut remaining = periods;
    while remaining > 0 {
        if remaining & 1 == 1 {
            factor = factor.checked_mul(base)?;
        }
        remaining >>= 1;
        if remaining > 0 {
            base = base.checked_mul(base)?;
        }
    }
    Some(factor)
}

/// compound a balance per period and round to whole units
pub fn compound_balance(balance: Money, rate: Rate, periods: u64) -> Result<Money> {
    if periods == 0 || rate.is_zero() || balance.is_zero() {
        return Ok(balance);
    }
    let overflow = LedgerError::ArithmeticOverflow {
        context: "interest compounding",
    };
    let factor = compound_factor(rate, periods).ok_or(overflow.clone())?;
    let grown = balance.as_decimal().checked_mul(factor).ok_or(overflow.clone())?;
    Money::from_decimal(grown).ok_or(overflow)
}
