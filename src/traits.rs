//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::*;

/// Storage abstraction for the engine
///
/// Backends (PostgreSQL, SQLite, in-memory, ...) implement these methods.
/// Every method is one atomic unit: it either fully commits or leaves no
/// visible partial state. Methods that persist several rows take them
/// together so the backend can wrap them in a single transaction.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Save a product
    async fn save_product(&self, product: &Product) -> EngineResult<()>;

    /// Get a product by ID
    async fn get_product(&self, product_id: &str) -> EngineResult<Option<Product>>;

    /// List all products
    async fn list_products(&self) -> EngineResult<Vec<Product>>;

    /// Append movements, assigning each a monotonic sequence, and fold them
    /// into the products' cached on-hand figures
    async fn append_movements(
        &self,
        movements: &[StockMovement],
    ) -> EngineResult<Vec<StockMovement>>;

    /// Movements for a product dated on or before `until`, in any order
    async fn get_movements(
        &self,
        product_id: &str,
        until: Option<NaiveDate>,
    ) -> EngineResult<Vec<StockMovement>>;

    /// Persist a sale together with its SALE movements
    async fn save_sale(
        &self,
        sale: &SaleFact,
        movements: &[StockMovement],
    ) -> EngineResult<Vec<StockMovement>>;

    /// Get a sale by ID
    async fn get_sale(&self, sale_id: &str) -> EngineResult<Option<SaleFact>>;

    /// Sales dated within `[start_date, end_date]`
    async fn get_sales(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> EngineResult<Vec<SaleFact>>;

    /// Get the VAT entry for a period
    async fn get_vat_entry(&self, period: Period) -> EngineResult<Option<VatPeriodEntry>>;

    /// All VAT entries in period order
    async fn list_vat_entries(&self) -> EngineResult<Vec<VatPeriodEntry>>;

    /// Persist a computed VAT entry and the period's closing-balance snapshot
    async fn save_settlement(
        &self,
        entry: &VatPeriodEntry,
        snapshot: &ClosingBalanceSnapshot,
    ) -> EngineResult<()>;

    /// Overwrite a VAT entry's lock flag, recording the audit event with it
    async fn save_vat_entry(
        &self,
        entry: &VatPeriodEntry,
        audit: &PeriodAuditEvent,
    ) -> EngineResult<()>;

    /// Get the seeded opening balance
    async fn get_opening_balance(&self) -> EngineResult<Option<OpeningBalance>>;

    /// Seed the opening balance
    async fn save_opening_balance(
        &self,
        opening: &OpeningBalance,
        audit: &PeriodAuditEvent,
    ) -> EngineResult<()>;

    /// Get the snapshot closing a period
    async fn get_snapshot(&self, period: Period) -> EngineResult<Option<ClosingBalanceSnapshot>>;

    /// The snapshot of the most recent period strictly before `period`
    async fn latest_snapshot_before(
        &self,
        period: Period,
    ) -> EngineResult<Option<ClosingBalanceSnapshot>>;

    /// All snapshots in period order
    async fn list_snapshots(&self) -> EngineResult<Vec<ClosingBalanceSnapshot>>;

    /// Persist an adjustment with the snapshot it produces
    async fn save_adjustment(
        &self,
        adjustment: &BalanceAdjustment,
        snapshot: &ClosingBalanceSnapshot,
        audit: &PeriodAuditEvent,
    ) -> EngineResult<()>;

    /// Adjustments booked to a period, or all adjustments when `None`
    async fn list_adjustments(&self, period: Option<Period>) -> EngineResult<Vec<BalanceAdjustment>>;

    /// Administrative actions in the order they were recorded
    async fn list_audit_events(&self) -> EngineResult<Vec<PeriodAuditEvent>>;

    /// Save a treasury challan
    async fn save_challan(&self, challan: &TreasuryChallan) -> EngineResult<()>;

    /// Get a challan by token number
    async fn get_challan(&self, token_no: &str) -> EngineResult<Option<TreasuryChallan>>;

    /// Challans funding a period
    async fn get_challans(&self, period: Period) -> EngineResult<Vec<TreasuryChallan>>;
}

/// Trait for implementing custom movement validation rules
pub trait MovementValidator: Send + Sync {
    /// Validate a movement before it is appended
    fn validate_movement(&self, movement: &StockMovement) -> EngineResult<()>;
}

/// Trait for implementing custom sale validation rules
pub trait SaleValidator: Send + Sync {
    /// Validate a sale before it is recorded or counted in a settlement
    fn validate_sale(&self, sale: &SaleFact) -> EngineResult<()>;
}

/// Default movement validator with the ledger's structural rules
pub struct DefaultMovementValidator;

impl MovementValidator for DefaultMovementValidator {
    fn validate_movement(&self, movement: &StockMovement) -> EngineResult<()> {
        movement.validate()
    }
}

/// Default sale validator
pub struct DefaultSaleValidator;

impl SaleValidator for DefaultSaleValidator {
    fn validate_sale(&self, sale: &SaleFact) -> EngineResult<()> {
        sale.validate()
    }
}
