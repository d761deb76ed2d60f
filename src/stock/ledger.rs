//! Append-only stock ledger deriving on-hand quantities from the movement log

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::settlement::engine::ensure_period_unlocked;
use crate::settlement::LockRegistry;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_product_id, validate_product_name};

/// Stock ledger over a storage backend
pub struct StockLedger<S: LedgerStorage> {
    storage: S,
    locks: Arc<LockRegistry>,
    validator: Box<dyn MovementValidator>,
}

impl<S: LedgerStorage> StockLedger<S> {
    /// Create a new stock ledger
    pub fn new(storage: S, locks: Arc<LockRegistry>) -> Self {
        Self {
            storage,
            locks,
            validator: Box::new(DefaultMovementValidator),
        }
    }

    /// Create a new stock ledger with a custom validator
    pub fn with_validator(
        storage: S,
        locks: Arc<LockRegistry>,
        validator: Box<dyn MovementValidator>,
    ) -> Self {
        Self {
            storage,
            locks,
            validator,
        }
    }

    /// Register a product so movements can be recorded against it
    pub async fn register_product(&self, id: String, name: String) -> EngineResult<Product> {
        validate_product_id(&id)?;
        validate_product_name(&name)?;

        if self.storage.get_product(&id).await?.is_some() {
            return Err(EngineError::Validation(format!(
                "Product with ID '{id}' already exists"
            )));
        }

        let product = Product::new(id, name);
        self.storage.save_product(&product).await?;
        info!(product_id = %product.id, "registered product");
        Ok(product)
    }

    /// Get a product by ID
    pub async fn get_product(&self, product_id: &str) -> EngineResult<Option<Product>> {
        self.storage.get_product(product_id).await
    }

    /// List all products
    pub async fn list_products(&self) -> EngineResult<Vec<Product>> {
        self.storage.list_products().await
    }

    async fn require_product(&self, product_id: &str) -> EngineResult<Product> {
        self.storage.get_product(product_id).await?.ok_or_else(|| {
            EngineError::Validation(format!("Unknown product '{product_id}'"))
        })
    }

    /// Append a movement. On-hand may go negative; the ledger records, it does not police.
    pub async fn append(&self, movement: StockMovement) -> EngineResult<StockMovement> {
        self.validator.validate_movement(&movement)?;

        let period = movement.period();
        let _period_guard = self.locks.read_period(period).await?;
        ensure_period_unlocked(&self.storage, period, "append a stock movement").await?;

        let _product_guard = self.locks.lock_product(&movement.product_id).await?;
        self.require_product(&movement.product_id).await?;

        let stored = self
            .storage
            .append_movements(std::slice::from_ref(&movement))
            .await?
            .pop()
            .ok_or_else(|| {
                EngineError::Storage(format!("Movement {} was not persisted", movement.id))
            })?;

        info!(
            product_id = %stored.product_id,
            sequence = stored.sequence,
            reference = %stored.reference_type,
            quantity = %stored.net_quantity(),
            "appended stock movement"
        );

        self.warn_if_oversold(&stored.product_id).await?;
        Ok(stored)
    }

    /// Append many movements, skipping records that fail validation.
    ///
    /// Locked periods abort the batch before anything is written.
    pub async fn append_batch(
        &self,
        movements: Vec<StockMovement>,
    ) -> EngineResult<IngestReport<StockMovement>> {
        let mut report = IngestReport::default();
        let mut valid = Vec::with_capacity(movements.len());

        for movement in movements {
            let checked = match self.validator.validate_movement(&movement) {
                Ok(()) => self.require_product(&movement.product_id).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match checked {
                Ok(()) => valid.push(movement),
                Err(e @ EngineError::Validation(_)) => {
                    warn!(movement_id = %movement.id, error = %e, "skipping invalid movement");
                    report.skipped.push(SkippedRecord::new(movement.id.clone(), &e));
                }
                Err(e) => return Err(e),
            }
        }

        let periods: BTreeSet<Period> = valid.iter().map(StockMovement::period).collect();
        for period in periods {
            ensure_period_unlocked(&self.storage, period, "append a stock movement").await?;
        }

        for movement in valid {
            let stored = self.append(movement).await?;
            report.accepted.push(stored);
        }

        Ok(report)
    }

    pub(crate) async fn warn_if_oversold(&self, product_id: &str) -> EngineResult<()> {
        if let Some(product) = self.storage.get_product(product_id).await? {
            if product.on_hand < BigDecimal::from(0) {
                warn!(product_id, on_hand = %product.on_hand, "product is oversold");
            }
        }
        Ok(())
    }

    /// On-hand quantity as of a date (all movements when `None`)
    pub async fn on_hand(
        &self,
        product_id: &str,
        as_of: Option<NaiveDate>,
    ) -> EngineResult<BigDecimal> {
        self.require_product(product_id).await?;
        let movements = self.storage.get_movements(product_id, as_of).await?;
        Ok(movements.iter().map(StockMovement::net_quantity).sum())
    }

    /// On-hand quantity observing every append committed before the call
    pub async fn on_hand_strict(
        &self,
        product_id: &str,
        as_of: Option<NaiveDate>,
    ) -> EngineResult<BigDecimal> {
        let _product_guard = self.locks.lock_product(product_id).await?;
        self.on_hand(product_id, as_of).await
    }

    /// The product's movements ordered by date, then insertion order
    pub async fn trace(&self, product_id: &str) -> EngineResult<MovementTrace> {
        self.require_product(product_id).await?;
        let mut movements = self.storage.get_movements(product_id, None).await?;
        movements.sort_by(|a, b| a.date.cmp(&b.date).then(a.sequence.cmp(&b.sequence)));

        Ok(MovementTrace {
            product_id: product_id.to_string(),
            movements,
        })
    }
}

/// Ordered audit view of one product's movements.
///
/// Running balances are computed while iterating; call [`MovementTrace::iter`]
/// again to restart from the first movement.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementTrace {
    product_id: String,
    movements: Vec<StockMovement>,
}

/// A movement with the on-hand figure right after it
#[derive(Debug, Clone, PartialEq)]
pub struct TraceLine<'a> {
    pub movement: &'a StockMovement,
    pub running_balance: BigDecimal,
}

pub struct TraceIter<'a> {
    inner: std::slice::Iter<'a, StockMovement>,
    balance: BigDecimal,
}

impl<'a> Iterator for TraceIter<'a> {
    type Item = TraceLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let movement = self.inner.next()?;
        self.balance += movement.net_quantity();
        Some(TraceLine {
            movement,
            running_balance: self.balance.clone(),
        })
    }
}

impl MovementTrace {
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn iter(&self) -> TraceIter<'_> {
        TraceIter {
            inner: self.movements.iter(),
            balance: BigDecimal::from(0),
        }
    }

    pub fn len(&self) -> usize {
        self.movements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }

    pub fn closing_balance(&self) -> BigDecimal {
        self.movements.iter().map(StockMovement::net_quantity).sum()
    }
}

impl<'a> IntoIterator for &'a MovementTrace {
    type Item = TraceLine<'a>;
    type IntoIter = TraceIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::patterns;
    use crate::utils::memory_storage::MemoryStorage;
    use std::time::Duration;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    async fn ledger_with_product() -> StockLedger<MemoryStorage> {
        let locks = Arc::new(LockRegistry::new(Duration::from_millis(200)));
        let ledger = StockLedger::new(MemoryStorage::new(), locks);
        ledger
            .register_product("widget".to_string(), "Widget".to_string())
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_on_hand_as_of() {
        let ledger = ledger_with_product().await;

        ledger
            .append(
                patterns::import_receipt(
                    "widget".to_string(),
                    date(1, 10),
                    "boe-1".to_string(),
                    BigDecimal::from(10),
                    BigDecimal::from(40),
                )
                .unwrap(),
            )
            .await
            .unwrap();
        ledger
            .append(
                patterns::import_receipt(
                    "widget".to_string(),
                    date(2, 10),
                    "boe-2".to_string(),
                    BigDecimal::from(5),
                    BigDecimal::from(42),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            ledger.on_hand("widget", Some(date(1, 31))).await.unwrap(),
            BigDecimal::from(10)
        );
        assert_eq!(
            ledger.on_hand("widget", None).await.unwrap(),
            BigDecimal::from(15)
        );
        assert_eq!(
            ledger.on_hand("widget", Some(date(1, 9))).await.unwrap(),
            BigDecimal::from(0)
        );
    }

    #[tokio::test]
    async fn test_unknown_product_rejected() {
        let ledger = ledger_with_product().await;
        let movement = patterns::opening_stock("gadget".to_string(), date(1, 1), BigDecimal::from(1), None)
            .unwrap();

        assert!(matches!(
            ledger.append(movement).await,
            Err(EngineError::Validation(_))
        ));
        assert!(ledger.on_hand("gadget", None).await.is_err());
    }

    #[tokio::test]
    async fn test_trace_orders_by_date_then_insertion() {
        let ledger = ledger_with_product().await;

        for (day, qty) in [(20, 3), (5, 7), (20, 2)] {
            ledger
                .append(
                    patterns::opening_stock("widget".to_string(), date(1, day), BigDecimal::from(qty), None)
                        .unwrap(),
                )
                .await
                .unwrap();
        }

        let trace = ledger.trace("widget").await.unwrap();
        let balances: Vec<BigDecimal> = trace.iter().map(|line| line.running_balance).collect();
        assert_eq!(
            balances,
            vec![BigDecimal::from(7), BigDecimal::from(10), BigDecimal::from(12)]
        );

        // Restartable
        assert_eq!(trace.iter().count(), 3);
        assert_eq!(trace.closing_balance(), BigDecimal::from(12));
        let dates: Vec<NaiveDate> = (&trace).into_iter().map(|l| l.movement.date).collect();
        assert_eq!(dates, vec![date(1, 5), date(1, 20), date(1, 20)]);
    }

    #[tokio::test]
    async fn test_batch_skips_invalid_records() {
        let ledger = ledger_with_product().await;
        let good = patterns::import_receipt(
            "widget".to_string(),
            date(3, 1),
            "boe-3".to_string(),
            BigDecimal::from(4),
            BigDecimal::from(10),
        )
        .unwrap();
        let unknown = patterns::import_receipt(
            "nope".to_string(),
            date(3, 1),
            "boe-4".to_string(),
            BigDecimal::from(4),
            BigDecimal::from(10),
        )
        .unwrap();
        let mut negative = good.clone();
        negative.id = "neg".to_string();
        negative.quantity_in = BigDecimal::from(-4);

        let report = ledger
            .append_batch(vec![good, unknown, negative])
            .await
            .unwrap();

        assert_eq!(report.accepted_count(), 1);
        assert_eq!(report.skipped_count(), 2);
        assert!(report.skipped.iter().any(|s| s.record_id == "neg"));
        assert_eq!(
            ledger.on_hand("widget", None).await.unwrap(),
            BigDecimal::from(4)
        );
    }
}
