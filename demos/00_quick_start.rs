/// quick start - take a loan, repay part of it, print the state
use chrono::{Duration, TimeZone, Utc};
use lending_ledger_rs::{
    CreditLineTerms, FixedTermsCreditLine, LendingMarket, MarketConfig, Money, ProgramConfig, Rate,
    SafeTimeProvider, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let control = time.test_control().unwrap();

    let mut market = LendingMarket::new(MarketConfig::default())?;
    market.register_program(
        1,
        FixedTermsCreditLine::new(CreditLineTerms::standard(
            "USDT",
            30,
            Rate::from_bps(50),
            Rate::from_percentage(1),
        )),
        ProgramConfig::new("liquidity-pool"),
    )?;

    // borrow 1,000 USDT (6 decimals)
    let loan_id = market.take_loan("alice", 1, Money::new(1_000_000_000), &time)?;

    // a week later, repay 200
    control.advance(Duration::days(7));
    let update = market.repay_loan(loan_id, Money::new(200_000_000), "alice", &time)?;
    println!("repaid {}, outstanding before {}", update.amount, update.outstanding_before);

    println!("{}", market.loan_json(loan_id, time.now())?);
    Ok(())
}
