//! Monthly VAT settlement example

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;
use vat_ledger_core::utils::MemoryStorage;
use vat_ledger_core::{
    AccountingEngine, AmountType, EngineConfig, EngineError, Period, SaleFact, TreasuryChallan,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🧾 VAT Ledger Core - Settlement Example\n");

    // Settings come from config/vat_engine.toml and VAT_ENGINE_* if present
    let config = EngineConfig::load(None)?;
    println!("⚙️  VAT rate {} with {:?} rounding\n", config.vat_rate, config.rounding.mode);
    let engine = AccountingEngine::with_config(MemoryStorage::new(), config)?;

    engine.seed_opening_balance(BigDecimal::from(20_000)).await?;

    // 1. Sales over two months, mixed inclusive and exclusive
    let sales = [
        ("INV-101", (2024, 1, 8), AmountType::Inclusive, 115_000),
        ("INV-102", (2024, 1, 20), AmountType::Exclusive, 40_000),
        ("INV-201", (2024, 2, 3), AmountType::Inclusive, 230_000),
    ];
    for (id, (y, m, d), kind, total) in sales {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        engine
            .record_sale(SaleFact::new(id.to_string(), date, kind, BigDecimal::from(total), vec![]))
            .await?;
    }

    // 2. Compute both months in order
    println!("📊 Period settlements:");
    for report in engine.compute_range((2024, 1), (2024, 2)).await? {
        let entry = &report.entry;
        println!("  {}:", entry.period);
        println!("    Gross sales:        ৳{}", entry.gross_sales);
        println!("    Net of VAT:         ৳{}", entry.net_sales_ex_vat);
        println!("    VAT payable:        ৳{}", entry.vat_payable);
        println!("    From credit:        ৳{}", entry.used_from_closing_balance);
        println!("    Treasury needed:    ৳{}", entry.treasury_needed);
        println!("    Closing credit:     ৳{}", report.closing_balance);
    }
    println!();

    // 3. Pay February into the treasury
    let february = Period::new(2024, 2)?;
    engine
        .record_challan(TreasuryChallan::new(
            "TR-2024-0311".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
            BigDecimal::from(25_000),
            february,
            "Sonali Bank".to_string(),
            "1-1133-0010-0311".to_string(),
        ))
        .await?;

    let reconciliation = engine.reconcile(2024, 2).await?;
    println!("🏦 Treasury for {}:", reconciliation.period);
    println!("  Needed:    ৳{}", reconciliation.treasury_needed);
    println!("  Deposited: ৳{}", reconciliation.deposited);
    println!("  Shortfall: ৳{} ({:?})\n", reconciliation.shortfall, reconciliation.status);

    // 4. Lock January and show that it is frozen
    engine.lock_period(2024, 1).await?;
    match engine.compute_period(2024, 1).await {
        Err(EngineError::PeriodLocked { period, .. }) => {
            println!("🔒 {period} is locked; recompute refused")
        }
        other => println!("unexpected result: {other:?}"),
    }

    engine.verify_closing_balances().await?;
    println!("✅ Closing-balance chain verified");

    Ok(())
}
