/// installment loans - three sub-loans repaid and revoked as a group
use chrono::{Duration, TimeZone, Utc};
use lending_ledger_rs::{
    CreditLineTerms, FixedTermsCreditLine, LendingMarket, MarketConfig, Money, ProgramConfig, Rate,
    SafeTimeProvider, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== installment loan example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let control = time.test_control().unwrap();

    let mut market = LendingMarket::new(MarketConfig::default())?;
    market.register_program(
        7,
        FixedTermsCreditLine::new(CreditLineTerms::standard(
            "BRLC",
            30,
            Rate::from_bps(10),
            Rate::from_bps(30),
        )),
        ProgramConfig::new("liquidity-pool").with_addon_treasury("addon-treasury"),
    )?;

    let ids = market.take_installment_loan(
        "carol",
        7,
        &[Money::new(300_000_000); 3],
        &[Money::new(3_000_000); 3],
        &[30, 60, 90],
        &time,
    )?;
    println!("sub-loans {:?}", ids);

    control.advance(Duration::days(30));
    let outcome = market.repay_loan_for_batch(
        &[ids.start],
        &[Money::FULL_REPAYMENT],
        "carol",
        &time,
    )?;
    println!("batch {} repaid {}", outcome.batch_id, outcome.total_repaid);

    control.advance(Duration::days(15));
    let preview = market.get_installment_loan_preview(ids.start, time.now())?;
    println!(
        "group outstanding: {} across {} installments",
        preview.total_outstanding_balance, preview.installment_count
    );

    let revocations = market.revoke_installment_loan(ids.start, &time)?;
    for revocation in &revocations {
        println!("revoked {}: {:?}", revocation.loan_id, revocation.borrower_settlement);
    }
    Ok(())
}
