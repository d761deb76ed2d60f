//! # VAT Ledger Core
//!
//! A stock ledger and monthly VAT settlement engine for an importing trader.
//!
//! ## Features
//!
//! - **Stock ledger**: Append-only movement log with replayable on-hand quantities
//! - **VAT settlement**: Monthly computation with OPEN, COMPUTED and LOCKED periods
//! - **Closing balance**: Carried-forward VAT credit consumed before treasury payment
//! - **Treasury reconciliation**: Deposit challans matched against each period's need
//! - **Storage abstraction**: Database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use vat_ledger_core::{utils::MemoryStorage, AccountingEngine, AmountType, SaleFact};
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = AccountingEngine::new(MemoryStorage::new());
//! let sale = SaleFact::new(
//!     "inv-1".to_string(),
//!     NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
//!     AmountType::Inclusive,
//!     BigDecimal::from(115000),
//!     vec![],
//! );
//! engine.record_sale(sale).await.unwrap();
//!
//! let report = engine.compute_period(2024, 1).await.unwrap();
//! assert_eq!(report.entry.vat_payable, BigDecimal::from(15000));
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod settlement;
pub mod stock;
pub mod tax;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::{EngineConfig, RoundingMode, RoundingPolicy};
pub use ledger::{AccountingEngine, IntegrityReport, RecordedSale};
pub use reconciliation::{PaymentStatus, ReconciliationReport, TreasuryReconciliation};
pub use settlement::{ClosingBalanceLedger, LockRegistry, SettlementReport, VatSettlementEngine};
pub use stock::{MovementBuilder, MovementTrace, StockLedger, TraceLine};
pub use tax::vat::*;
pub use traits::*;
pub use types::*;

// Re-export movement patterns for convenience
pub use stock::movement::patterns;
