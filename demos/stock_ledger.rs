//! Stock ledger usage example

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;
use vat_ledger_core::utils::MemoryStorage;
use vat_ledger_core::{patterns, AccountingEngine, AmountType, SaleFact, SaleLine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("📦 VAT Ledger Core - Stock Ledger Example\n");

    let engine = AccountingEngine::new(MemoryStorage::new());

    // 1. Register products and bring in opening stock
    println!("🗂  Registering products...");
    for (id, name) in [("tea-500", "Tea 500g"), ("oil-5l", "Soybean oil 5L")] {
        let product = engine.register_product(id.to_string(), name.to_string()).await?;
        println!("  ✓ {} - {}", product.id, product.name);
    }
    println!();

    let jan = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();

    engine
        .record_opening_stock("tea-500".to_string(), jan(1), BigDecimal::from(40), None)
        .await?;

    // 2. Imports arrive through customs
    println!("🚢 Recording imports...");
    let imports = vec![
        patterns::import_receipt(
            "oil-5l".to_string(),
            jan(3),
            "BOE-2024-0113".to_string(),
            BigDecimal::from(10),
            BigDecimal::from(820),
        )?,
        patterns::import_receipt(
            "tea-500".to_string(),
            jan(4),
            "BOE-2024-0118".to_string(),
            BigDecimal::from(60),
            BigDecimal::from(210),
        )?,
    ];
    let report = engine.record_imports(imports).await?;
    println!(
        "  ✓ {} accepted, {} skipped\n",
        report.accepted_count(),
        report.skipped_count()
    );

    // 3. A sale that oversells the oil
    println!("🧾 Recording sales...");
    let sale = SaleFact::new(
        "INV-0001".to_string(),
        jan(10),
        AmountType::Inclusive,
        BigDecimal::from(16_330),
        vec![
            SaleLine::new("oil-5l".to_string(), BigDecimal::from(12), BigDecimal::from(1_150)),
            SaleLine::new("tea-500".to_string(), BigDecimal::from(10), BigDecimal::from(253)),
        ],
    );
    let recorded = engine.record_sale(sale).await?;
    println!("  ✓ {} issued {} lines", recorded.sale.sale_id, recorded.movements.len());
    println!("  Oil on hand: {}", engine.on_hand("oil-5l", None).await?);
    println!();

    // 4. Correct the oversell with a reasoned adjustment
    println!("🔧 Adjusting stock...");
    engine
        .adjust_stock(
            "oil-5l".to_string(),
            jan(11),
            BigDecimal::from(2),
            "Two cartons found in the back store".to_string(),
        )
        .await?;

    // 5. Trace the movement history
    for product in ["tea-500", "oil-5l"] {
        let trace = engine.trace(product).await?;
        println!("\n📜 Movement trace for {}:", trace.product_id());
        for line in &trace {
            println!(
                "  {} #{:<3} {:<8} in {:>4} out {:>4} → {:>4}",
                line.movement.date,
                line.movement.sequence,
                line.movement.reference_type,
                line.movement.quantity_in,
                line.movement.quantity_out,
                line.running_balance
            );
        }
    }

    let integrity = engine.validate_integrity().await?;
    println!(
        "\n🔍 Integrity: {} ({} products checked)",
        if integrity.is_valid { "OK" } else { "FAILED" },
        integrity.products_checked
    );

    Ok(())
}
