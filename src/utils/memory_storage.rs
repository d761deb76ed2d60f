//! In-memory storage implementation for testing

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct State {
    products: HashMap<String, Product>,
    movements: Vec<StockMovement>,
    last_sequence: u64,
    sales: HashMap<String, SaleFact>,
    vat_entries: BTreeMap<Period, VatPeriodEntry>,
    opening: Option<OpeningBalance>,
    snapshots: BTreeMap<Period, ClosingBalanceSnapshot>,
    adjustments: Vec<BalanceAdjustment>,
    audit: Vec<PeriodAuditEvent>,
    challans: Vec<TreasuryChallan>,
}

impl State {
    /// Sequence, cache-update and store movements; all products must exist
    fn append(&mut self, movements: &[StockMovement]) -> EngineResult<Vec<StockMovement>> {
        if let Some(missing) = movements
            .iter()
            .find(|m| !self.products.contains_key(&m.product_id))
        {
            return Err(EngineError::Validation(format!(
                "Unknown product '{}'",
                missing.product_id
            )));
        }

        let mut stored = Vec::with_capacity(movements.len());
        for movement in movements {
            self.last_sequence += 1;
            let mut movement = movement.clone();
            movement.sequence = self.last_sequence;

            if let Some(product) = self.products.get_mut(&movement.product_id) {
                product.apply_movement(&movement);
            }
            self.movements.push(movement.clone());
            stored.push(movement);
        }
        Ok(stored)
    }
}

/// In-memory storage implementation for testing and development
///
/// All tables sit behind one lock, so each trait call commits atomically.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> EngineResult<()> {
        *self.write()? = State::default();
        Ok(())
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| EngineError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| EngineError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn save_product(&self, product: &Product) -> EngineResult<()> {
        self.write()?
            .products
            .insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn get_product(&self, product_id: &str) -> EngineResult<Option<Product>> {
        Ok(self.read()?.products.get(product_id).cloned())
    }

    async fn list_products(&self) -> EngineResult<Vec<Product>> {
        let mut products: Vec<Product> = self.read()?.products.values().cloned().collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products)
    }

    async fn append_movements(
        &self,
        movements: &[StockMovement],
    ) -> EngineResult<Vec<StockMovement>> {
        self.write()?.append(movements)
    }

    async fn get_movements(
        &self,
        product_id: &str,
        until: Option<NaiveDate>,
    ) -> EngineResult<Vec<StockMovement>> {
        let state = self.read()?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .filter(|m| until.is_none_or(|end| m.date <= end))
            .cloned()
            .collect())
    }

    async fn save_sale(
        &self,
        sale: &SaleFact,
        movements: &[StockMovement],
    ) -> EngineResult<Vec<StockMovement>> {
        let mut state = self.write()?;
        if state.sales.contains_key(&sale.sale_id) {
            return Err(EngineError::Validation(format!(
                "Sale {} already recorded",
                sale.sale_id
            )));
        }

        let stored = state.append(movements)?;
        state.sales.insert(sale.sale_id.clone(), sale.clone());
        Ok(stored)
    }

    async fn get_sale(&self, sale_id: &str) -> EngineResult<Option<SaleFact>> {
        Ok(self.read()?.sales.get(sale_id).cloned())
    }

    async fn get_sales(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> EngineResult<Vec<SaleFact>> {
        let state = self.read()?;
        let mut sales: Vec<SaleFact> = state
            .sales
            .values()
            .filter(|s| s.date >= start_date && s.date <= end_date)
            .cloned()
            .collect();
        sales.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.sale_id.cmp(&b.sale_id)));
        Ok(sales)
    }

    async fn get_vat_entry(&self, period: Period) -> EngineResult<Option<VatPeriodEntry>> {
        Ok(self.read()?.vat_entries.get(&period).cloned())
    }

    async fn list_vat_entries(&self) -> EngineResult<Vec<VatPeriodEntry>> {
        Ok(self.read()?.vat_entries.values().cloned().collect())
    }

    async fn save_settlement(
        &self,
        entry: &VatPeriodEntry,
        snapshot: &ClosingBalanceSnapshot,
    ) -> EngineResult<()> {
        let mut state = self.write()?;
        state.vat_entries.insert(entry.period, entry.clone());
        state.snapshots.insert(snapshot.period, snapshot.clone());
        Ok(())
    }

    async fn save_vat_entry(
        &self,
        entry: &VatPeriodEntry,
        audit: &PeriodAuditEvent,
    ) -> EngineResult<()> {
        let mut state = self.write()?;
        state.vat_entries.insert(entry.period, entry.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn get_opening_balance(&self) -> EngineResult<Option<OpeningBalance>> {
        Ok(self.read()?.opening.clone())
    }

    async fn save_opening_balance(
        &self,
        opening: &OpeningBalance,
        audit: &PeriodAuditEvent,
    ) -> EngineResult<()> {
        let mut state = self.write()?;
        state.opening = Some(opening.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn get_snapshot(&self, period: Period) -> EngineResult<Option<ClosingBalanceSnapshot>> {
        Ok(self.read()?.snapshots.get(&period).cloned())
    }

    async fn latest_snapshot_before(
        &self,
        period: Period,
    ) -> EngineResult<Option<ClosingBalanceSnapshot>> {
        Ok(self
            .read()?
            .snapshots
            .range(..period)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone()))
    }

    async fn list_snapshots(&self) -> EngineResult<Vec<ClosingBalanceSnapshot>> {
        Ok(self.read()?.snapshots.values().cloned().collect())
    }

    async fn save_adjustment(
        &self,
        adjustment: &BalanceAdjustment,
        snapshot: &ClosingBalanceSnapshot,
        audit: &PeriodAuditEvent,
    ) -> EngineResult<()> {
        let mut state = self.write()?;
        state.adjustments.push(adjustment.clone());
        state.snapshots.insert(snapshot.period, snapshot.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn list_adjustments(&self, period: Option<Period>) -> EngineResult<Vec<BalanceAdjustment>> {
        Ok(self
            .read()?
            .adjustments
            .iter()
            .filter(|a| period.is_none_or(|p| a.period == p))
            .cloned()
            .collect())
    }

    async fn list_audit_events(&self) -> EngineResult<Vec<PeriodAuditEvent>> {
        Ok(self.read()?.audit.clone())
    }

    async fn save_challan(&self, challan: &TreasuryChallan) -> EngineResult<()> {
        self.write()?.challans.push(challan.clone());
        Ok(())
    }

    async fn get_challan(&self, token_no: &str) -> EngineResult<Option<TreasuryChallan>> {
        Ok(self
            .read()?
            .challans
            .iter()
            .find(|c| c.token_no == token_no)
            .cloned())
    }

    async fn get_challans(&self, period: Period) -> EngineResult<Vec<TreasuryChallan>> {
        Ok(self
            .read()?
            .challans
            .iter()
            .filter(|c| c.period == period)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn movement(product: &str, qty: i64) -> StockMovement {
        StockMovement::new(
            product.to_string(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            ReferenceType::Opening,
            "opening".to_string(),
            BigDecimal::from(qty),
            BigDecimal::from(0),
        )
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_and_updates_cache() {
        let storage = MemoryStorage::new();
        storage
            .save_product(&Product::new("p1".to_string(), "P1".to_string()))
            .await
            .unwrap();

        let stored = storage
            .append_movements(&[movement("p1", 4), movement("p1", 6)])
            .await
            .unwrap();
        assert_eq!(stored[0].sequence, 1);
        assert_eq!(stored[1].sequence, 2);

        let product = storage.get_product("p1").await.unwrap().unwrap();
        assert_eq!(product.on_hand, BigDecimal::from(10));
    }

    #[tokio::test]
    async fn test_append_is_all_or_nothing() {
        let storage = MemoryStorage::new();
        storage
            .save_product(&Product::new("p1".to_string(), "P1".to_string()))
            .await
            .unwrap();

        let result = storage
            .append_movements(&[movement("p1", 4), movement("ghost", 6)])
            .await;
        assert!(result.is_err());
        assert!(storage.get_movements("p1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_snapshot_before_is_strict() {
        let storage = MemoryStorage::new();
        let jan = Period::new(2024, 1).unwrap();
        let snapshot = ClosingBalanceSnapshot::new(
            jan,
            BigDecimal::from(10),
            BigDecimal::from(0),
            BigDecimal::from(0),
        );
        let audit = PeriodAuditEvent::new(Some(jan), AuditAction::BalanceAdjusted, None);
        let adjustment = BalanceAdjustment::new(jan, BigDecimal::from(0), "seed".to_string());
        storage
            .save_adjustment(&adjustment, &snapshot, &audit)
            .await
            .unwrap();

        assert!(storage.latest_snapshot_before(jan).await.unwrap().is_none());
        assert_eq!(
            storage
                .latest_snapshot_before(jan.next())
                .await
                .unwrap()
                .unwrap()
                .period,
            jan
        );

        storage.clear().unwrap();
        assert!(storage.list_snapshots().await.unwrap().is_empty());
    }
}
