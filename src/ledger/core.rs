//! Main engine orchestrator that coordinates the stock ledger, VAT settlement,
//! closing balance and treasury reconciliation

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::reconciliation::{ReconciliationReport, TreasuryReconciliation};
use crate::settlement::engine::ensure_period_unlocked;
use crate::settlement::{LockRegistry, SettlementReport, VatSettlementEngine};
use crate::stock::{patterns, MovementTrace, StockLedger};
use crate::tax::vat::VatRate;
use crate::traits::*;
use crate::types::*;

/// A sale as committed, with the stock it issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSale {
    pub sale: SaleFact,
    pub movements: Vec<StockMovement>,
    /// Fresh figures when the sale landed in an already computed period
    pub recomputed: Option<VatPeriodEntry>,
}

/// Accounting engine exposing ingestion, query and administrative operations
pub struct AccountingEngine<S: LedgerStorage> {
    storage: S,
    config: EngineConfig,
    locks: Arc<LockRegistry>,
    stock: StockLedger<S>,
    settlement: VatSettlementEngine<S>,
    treasury: TreasuryReconciliation<S>,
}

impl<S: LedgerStorage + Clone> AccountingEngine<S> {
    /// Create a new engine with default settings
    pub fn new(storage: S) -> Self {
        Self::build(
            storage,
            EngineConfig::default(),
            Box::new(DefaultMovementValidator),
            Box::new(DefaultSaleValidator),
        )
    }

    /// Create a new engine with explicit settings
    pub fn with_config(storage: S, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self::build(
            storage,
            config,
            Box::new(DefaultMovementValidator),
            Box::new(DefaultSaleValidator),
        ))
    }

    /// Create a new engine with custom validators
    pub fn with_validators(
        storage: S,
        config: EngineConfig,
        movement_validator: Box<dyn MovementValidator>,
        sale_validator: Box<dyn SaleValidator>,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self::build(storage, config, movement_validator, sale_validator))
    }

    fn build(
        storage: S,
        config: EngineConfig,
        movement_validator: Box<dyn MovementValidator>,
        sale_validator: Box<dyn SaleValidator>,
    ) -> Self {
        let locks = Arc::new(LockRegistry::new(config.lock_timeout));
        // Config is validated before we get here, so the rate is in range.
        let rate = VatRate::new(config.vat_rate.clone()).unwrap_or_default();

        Self {
            stock: StockLedger::with_validator(storage.clone(), locks.clone(), movement_validator),
            settlement: VatSettlementEngine::with_validator(
                storage.clone(),
                locks.clone(),
                rate,
                config.rounding,
                sale_validator,
            ),
            treasury: TreasuryReconciliation::new(storage.clone()),
            storage,
            config,
            locks,
        }
    }
}

impl<S: LedgerStorage> AccountingEngine<S> {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stock(&self) -> &StockLedger<S> {
        &self.stock
    }

    pub fn settlement(&self) -> &VatSettlementEngine<S> {
        &self.settlement
    }

    pub fn treasury(&self) -> &TreasuryReconciliation<S> {
        &self.treasury
    }

    // Master data
    /// Register a product
    pub async fn register_product(&self, id: String, name: String) -> EngineResult<Product> {
        self.stock.register_product(id, name).await
    }

    /// Get a product by ID
    pub async fn get_product(&self, product_id: &str) -> EngineResult<Option<Product>> {
        self.stock.get_product(product_id).await
    }

    // Fact ingestion
    /// Record opening stock for a product
    pub async fn record_opening_stock(
        &self,
        product_id: String,
        date: NaiveDate,
        quantity: BigDecimal,
        unit_cost: Option<BigDecimal>,
    ) -> EngineResult<StockMovement> {
        let movement = patterns::opening_stock(product_id, date, quantity, unit_cost)?;
        self.stock.append(movement).await
    }

    /// Record goods received through customs
    pub async fn record_import(&self, movement: StockMovement) -> EngineResult<StockMovement> {
        require_reference(&movement, ReferenceType::Import)?;
        self.stock.append(movement).await
    }

    /// Record a batch of imports, skipping malformed records
    pub async fn record_imports(
        &self,
        movements: Vec<StockMovement>,
    ) -> EngineResult<IngestReport<StockMovement>> {
        let mut skipped = Vec::new();
        let mut imports = Vec::with_capacity(movements.len());
        for movement in movements {
            match require_reference(&movement, ReferenceType::Import) {
                Ok(()) => imports.push(movement),
                Err(e) => {
                    warn!(movement_id = %movement.id, error = %e, "skipping import");
                    skipped.push(SkippedRecord::new(movement.id.clone(), &e));
                }
            }
        }

        let mut report = self.stock.append_batch(imports).await?;
        skipped.append(&mut report.skipped);
        report.skipped = skipped;

        info!(
            accepted = report.accepted_count(),
            skipped = report.skipped_count(),
            "recorded import batch"
        );
        Ok(report)
    }

    /// Record a stock correction. The movement must carry a reason.
    pub async fn record_adjustment(&self, movement: StockMovement) -> EngineResult<StockMovement> {
        require_reference(&movement, ReferenceType::Adjust)?;
        self.stock.append(movement).await
    }

    /// Record a signed stock correction
    pub async fn adjust_stock(
        &self,
        product_id: String,
        date: NaiveDate,
        delta: BigDecimal,
        reason: String,
    ) -> EngineResult<StockMovement> {
        let reference_id = format!("adj-{}", uuid::Uuid::new_v4());
        let movement = patterns::adjustment(product_id, date, reference_id, delta, reason)?;
        self.stock.append(movement).await
    }

    /// Record a sale: persist it, issue its stock, and refresh the period
    /// figures if the period was already computed
    pub async fn record_sale(&self, sale: SaleFact) -> EngineResult<RecordedSale> {
        self.settlement.validate_sale(&sale)?;
        let movements = patterns::sale_issues(&sale)?;
        let period = sale.period();

        let stored = {
            let _period_guard = self.locks.read_period(period).await?;
            ensure_period_unlocked(&self.storage, period, "record a sale").await?;

            if self.storage.get_sale(&sale.sale_id).await?.is_some() {
                return Err(EngineError::Validation(format!(
                    "Sale {} already recorded",
                    sale.sale_id
                )));
            }

            let products: BTreeSet<&str> =
                sale.lines.iter().map(|l| l.product_id.as_str()).collect();
            let mut product_guards = Vec::with_capacity(products.len());
            for product_id in products {
                product_guards.push(self.locks.lock_product(product_id).await?);
                if self.storage.get_product(product_id).await?.is_none() {
                    return Err(EngineError::Validation(format!(
                        "Sale {} references unknown product '{product_id}'",
                        sale.sale_id
                    )));
                }
            }

            self.storage.save_sale(&sale, &movements).await?
        };

        // The sale is committed; nothing below may fail the call.
        for line in &sale.lines {
            if let Err(e) = self.stock.warn_if_oversold(&line.product_id).await {
                warn!(product_id = %line.product_id, error = %e, "could not check on-hand after sale");
            }
        }

        info!(
            sale_id = %sale.sale_id,
            period = %period,
            total = %sale.total_value,
            lines = stored.len(),
            "recorded sale"
        );

        let recomputed = self.refresh_after_sale(period).await;

        Ok(RecordedSale {
            sale,
            movements: stored,
            recomputed,
        })
    }

    /// Recompute a COMPUTED period after a late sale. Failures are logged and
    /// leave the stored figures stale until the next explicit compute.
    async fn refresh_after_sale(&self, period: Period) -> Option<VatPeriodEntry> {
        let refreshed = match self.settlement.status(period).await {
            Ok(PeriodStatus::Computed) => self
                .settlement
                .compute_period(period)
                .await
                .map(|report| Some(report.entry)),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        };

        refreshed.unwrap_or_else(|e| {
            warn!(period = %period, error = %e, "sale recorded but period not recomputed");
            None
        })
    }

    /// Record many sales, skipping invalid ones
    pub async fn record_sales(&self, sales: Vec<SaleFact>) -> EngineResult<IngestReport<RecordedSale>> {
        let mut report = IngestReport::default();
        for sale in sales {
            let sale_id = sale.sale_id.clone();
            match self.record_sale(sale).await {
                Ok(recorded) => report.accepted.push(recorded),
                Err(e @ EngineError::Validation(_)) => {
                    warn!(sale_id = %sale_id, error = %e, "skipping sale");
                    report.skipped.push(SkippedRecord::new(sale_id, &e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Record a treasury deposit
    pub async fn record_challan(&self, challan: TreasuryChallan) -> EngineResult<TreasuryChallan> {
        self.treasury.record_challan(challan).await
    }

    // Queries
    /// On-hand quantity as of a date (now when `None`)
    pub async fn on_hand(
        &self,
        product_id: &str,
        as_of: Option<NaiveDate>,
    ) -> EngineResult<BigDecimal> {
        self.stock.on_hand(product_id, as_of).await
    }

    /// On-hand quantity with read-after-write consistency for the product
    pub async fn on_hand_strict(
        &self,
        product_id: &str,
        as_of: Option<NaiveDate>,
    ) -> EngineResult<BigDecimal> {
        self.stock.on_hand_strict(product_id, as_of).await
    }

    /// Ordered movement history for a product
    pub async fn trace(&self, product_id: &str) -> EngineResult<MovementTrace> {
        self.stock.trace(product_id).await
    }

    /// Get the VAT entry for a period
    pub async fn vat_entry(&self, year: i32, month: u32) -> EngineResult<Option<VatPeriodEntry>> {
        self.settlement.vat_entry(Period::new(year, month)?).await
    }

    /// Settlement state of a period
    pub async fn period_status(&self, year: i32, month: u32) -> EngineResult<PeriodStatus> {
        self.settlement.status(Period::new(year, month)?).await
    }

    /// Credit carried out of a period
    pub async fn closing_balance(&self, year: i32, month: u32) -> EngineResult<BigDecimal> {
        self.settlement
            .balances()
            .closing_balance(Period::new(year, month)?)
            .await
    }

    /// Credit available at the start of a period
    pub async fn available_balance(&self, year: i32, month: u32) -> EngineResult<BigDecimal> {
        self.settlement
            .balances()
            .available(Period::new(year, month)?)
            .await
    }

    /// Amount still owed to the treasury for a period; negative when paid ahead
    pub async fn treasury_shortfall(&self, year: i32, month: u32) -> EngineResult<BigDecimal> {
        self.treasury.shortfall(Period::new(year, month)?).await
    }

    /// Full reconciliation of a period's deposits
    pub async fn reconcile(&self, year: i32, month: u32) -> EngineResult<ReconciliationReport> {
        self.treasury.reconcile(Period::new(year, month)?).await
    }

    /// Administrative actions in the order they were taken
    pub async fn audit_trail(&self) -> EngineResult<Vec<PeriodAuditEvent>> {
        self.storage.list_audit_events().await
    }

    // Settlement and administration
    /// Compute or recompute a period
    pub async fn compute_period(&self, year: i32, month: u32) -> EngineResult<SettlementReport> {
        self.settlement
            .compute_period(Period::new(year, month)?)
            .await
    }

    /// Compute a run of periods in chronological order
    pub async fn compute_range(
        &self,
        from: (i32, u32),
        to: (i32, u32),
    ) -> EngineResult<Vec<SettlementReport>> {
        self.settlement
            .compute_range(Period::new(from.0, from.1)?, Period::new(to.0, to.1)?)
            .await
    }

    /// Seed the opening credit balance (once)
    pub async fn seed_opening_balance(&self, amount: BigDecimal) -> EngineResult<OpeningBalance> {
        self.settlement
            .balances()
            .seed_opening_balance(amount)
            .await
    }

    pub async fn lock_period(&self, year: i32, month: u32) -> EngineResult<VatPeriodEntry> {
        self.settlement
            .lock_period(Period::new(year, month)?)
            .await
    }

    pub async fn unlock_period(
        &self,
        year: i32,
        month: u32,
        reason: String,
    ) -> EngineResult<VatPeriodEntry> {
        self.settlement
            .unlock_period(Period::new(year, month)?, reason)
            .await
    }

    /// Administrative top-up or correction of the carried-forward credit
    pub async fn adjust_closing_balance(
        &self,
        year: i32,
        month: u32,
        delta: BigDecimal,
        reason: String,
    ) -> EngineResult<ClosingBalanceSnapshot> {
        self.settlement
            .balances()
            .adjust(Period::new(year, month)?, delta, reason)
            .await
    }

    /// Replay the closing-balance chain; fails with a consistency error on mismatch
    pub async fn verify_closing_balances(&self) -> EngineResult<Vec<ClosingBalanceSnapshot>> {
        self.settlement.balances().verify_chain().await
    }

    /// Check cached stock against the movement log and replay the
    /// closing-balance chain
    pub async fn validate_integrity(&self) -> EngineResult<IntegrityReport> {
        let mut issues = Vec::new();

        let products = self.stock.list_products().await?;
        for product in &products {
            let replayed = self.stock.on_hand(&product.id, None).await?;
            if replayed != product.on_hand {
                issues.push(format!(
                    "Product '{}' caches on-hand {} but its movements sum to {}",
                    product.id, product.on_hand, replayed
                ));
            }
        }

        let snapshots_checked = match self.verify_closing_balances().await {
            Ok(snapshots) => snapshots.len(),
            Err(EngineError::Consistency(message)) => {
                issues.push(message);
                0
            }
            Err(e) => return Err(e),
        };

        if !issues.is_empty() {
            error!(issues = issues.len(), "integrity check failed");
        }

        Ok(IntegrityReport {
            is_valid: issues.is_empty(),
            issues,
            products_checked: products.len(),
            snapshots_checked,
        })
    }
}

fn require_reference(movement: &StockMovement, expected: ReferenceType) -> EngineResult<()> {
    if movement.reference_type != expected {
        return Err(EngineError::Validation(format!(
            "Movement {} is a {} movement, expected {}",
            movement.id, movement.reference_type, expected
        )));
    }
    Ok(())
}

/// Report on ledger integrity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub products_checked: usize,
    pub snapshots_checked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_engine_basic_operations() {
        let engine = AccountingEngine::new(MemoryStorage::new());
        engine
            .register_product("tea".to_string(), "Tea 500g".to_string())
            .await
            .unwrap();

        engine
            .record_opening_stock("tea".to_string(), date(1, 1), BigDecimal::from(20), None)
            .await
            .unwrap();

        let sale = SaleFact::new(
            "inv-1".to_string(),
            date(1, 2),
            AmountType::Inclusive,
            BigDecimal::from(1150),
            vec![SaleLine::new(
                "tea".to_string(),
                BigDecimal::from(5),
                BigDecimal::from(230),
            )],
        );
        let recorded = engine.record_sale(sale).await.unwrap();
        assert_eq!(recorded.movements.len(), 1);
        assert!(recorded.recomputed.is_none());

        assert_eq!(
            engine.on_hand("tea", None).await.unwrap(),
            BigDecimal::from(15)
        );

        let report = engine.compute_period(2024, 1).await.unwrap();
        assert_eq!(report.entry.vat_payable, BigDecimal::from(150));

        let integrity = engine.validate_integrity().await.unwrap();
        assert!(integrity.is_valid);
        assert_eq!(integrity.products_checked, 1);
    }

    #[tokio::test]
    async fn test_wrong_reference_type_rejected() {
        let engine = AccountingEngine::new(MemoryStorage::new());
        engine
            .register_product("tea".to_string(), "Tea".to_string())
            .await
            .unwrap();

        let opening =
            patterns::opening_stock("tea".to_string(), date(1, 1), BigDecimal::from(1), None)
                .unwrap();
        assert!(matches!(
            engine.record_import(opening.clone()).await,
            Err(EngineError::Validation(_))
        ));
        assert!(engine.record_adjustment(opening).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_sale_rejected() {
        let engine = AccountingEngine::new(MemoryStorage::new());
        let sale = SaleFact::new(
            "inv-1".to_string(),
            date(1, 2),
            AmountType::Exclusive,
            BigDecimal::from(100),
            vec![],
        );
        engine.record_sale(sale.clone()).await.unwrap();
        assert!(matches!(
            engine.record_sale(sale).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_late_sale_survives_failed_recompute() {
        let config = EngineConfig::default().with_lock_timeout(std::time::Duration::from_millis(20));
        let engine = AccountingEngine::with_config(MemoryStorage::new(), config).unwrap();
        let first = SaleFact::new(
            "inv-1".to_string(),
            date(3, 2),
            AmountType::Exclusive,
            BigDecimal::from(1000),
            vec![],
        );
        engine.record_sale(first).await.unwrap();
        engine.compute_period(2024, 3).await.unwrap();

        let late = SaleFact::new(
            "inv-2".to_string(),
            date(3, 20),
            AmountType::Exclusive,
            BigDecimal::from(1000),
            vec![],
        );
        let chain = engine.locks.lock_chain().await.unwrap();
        let recorded = engine.record_sale(late.clone()).await.unwrap();
        assert!(recorded.recomputed.is_none());
        drop(chain);

        // Stored exactly once; the stale figures refresh on the next compute
        assert!(matches!(
            engine.record_sale(late).await,
            Err(EngineError::Validation(_))
        ));
        let entry = engine.compute_period(2024, 3).await.unwrap().entry;
        assert_eq!(entry.sales_counted, 2);
        assert_eq!(entry.vat_payable, BigDecimal::from(300));
    }
}
