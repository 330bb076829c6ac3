/// overdue loan - late fee at the due boundary, then undo the early repayment
use chrono::{Duration, TimeZone, Utc};
use lending_ledger_rs::{
    CreditLineTerms, Event, FixedTermsCreditLine, LateFeePolicy, LendingMarket, MarketConfig, Money,
    ProgramConfig, Rate, SafeTimeProvider, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== overdue and undo example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let control = time.test_control().unwrap();

    let mut market = LendingMarket::new(MarketConfig::default())?;
    market.register_program(
        1,
        FixedTermsCreditLine::new(
            CreditLineTerms::standard("USDT", 10, Rate::from_percentage(10), Rate::from_percentage(20))
                .with_addon_rate(Rate::from_raw(1_000))
                .with_late_fee(LateFeePolicy::RateOfBalance(Rate::from_percentage(2))),
        ),
        ProgramConfig::new("liquidity-pool").with_addon_treasury("addon-treasury"),
    )?;

    let loan_id = market.take_loan("alice", 1, Money::new(100_000_000_000), &time)?;

    control.advance(Duration::hours(1));
    let early_repayment_at = time.now();
    market.repay_loan(loan_id, Money::new(50_000_000_000), "alice", &time)?;
    println!("repaid 50,000 on {}", early_repayment_at.format("%Y-%m-%d %H:%M"));

    // one period past due
    control.advance(Duration::days(11));
    let preview = market.get_loan_preview(loan_id, time.now())?;
    println!("outstanding on {}: {}", time.now().format("%Y-%m-%d"), preview.outstanding_balance);
    println!("late fee pending: {}", preview.pending_late_fee);

    let update = market.repay_loan(loan_id, Money::FULL_REPAYMENT, "alice", &time)?;
    println!("full repayment: {} (late fee locked {})", update.amount, update.late_fee_locked);

    // the early repayment bounced; reverse it and pay it back
    let outcome = market.undo_repayment_for(loan_id, Money::new(50_000_000_000), early_repayment_at, "alice")?;
    println!("\nundo restored {} (reopened: {})", outcome.restored_balance, outcome.reopened);

    let state = market.get_loan_state(loan_id)?;
    println!("status: {:?}, tracked balance: {}", state.status(), state.tracked_balance);

    println!("\ntoken transfers:");
    for event in market.transfers() {
        if let Event::TokenTransfer { from, to, amount, .. } = event {
            println!("  {} -> {}: {}", from, to, amount);
        }
    }
    Ok(())
}
