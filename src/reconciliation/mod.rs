//! Treasury reconciliation: deposits (challans) against a period's treasury need.
//!
//! Challans and VAT entries are independent logs. Recording a challan never
//! touches the VAT entry, and the shortfall is recalculated whenever asked,
//! so payments may arrive before the period is computed.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::traits::*;
use crate::types::*;

/// Payment position of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// No VAT entry yet; any deposit counts as an advance
    NotComputed,
    /// Something is due and nothing has been deposited
    Unpaid,
    /// Deposits cover part of the need
    Underpaid,
    /// Deposits match the need exactly
    Settled,
    /// Deposits exceed the need
    Overpaid,
}

/// Reconciliation of one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub period: Period,
    pub treasury_needed: BigDecimal,
    pub deposited: BigDecimal,
    /// Positive when underpaid, negative when paid in advance
    pub shortfall: BigDecimal,
    pub status: PaymentStatus,
    pub challans: Vec<TreasuryChallan>,
}

/// Reads challans and VAT entries; owns neither
pub struct TreasuryReconciliation<S: LedgerStorage> {
    storage: S,
}

impl<S: LedgerStorage> TreasuryReconciliation<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Record a deposit. Token numbers are unique.
    pub async fn record_challan(&self, challan: TreasuryChallan) -> EngineResult<TreasuryChallan> {
        challan.validate()?;

        if self.storage.get_challan(&challan.token_no).await?.is_some() {
            return Err(EngineError::Validation(format!(
                "Challan with token '{}' already recorded",
                challan.token_no
            )));
        }

        self.storage.save_challan(&challan).await?;
        info!(
            token_no = %challan.token_no,
            period = %challan.period,
            amount = %challan.amount_bdt,
            "recorded treasury challan"
        );
        Ok(challan)
    }

    /// Challans funding a period
    pub async fn challans(&self, period: Period) -> EngineResult<Vec<TreasuryChallan>> {
        self.storage.get_challans(period).await
    }

    /// `treasury_needed − Σ deposits`; an uncomputed period needs nothing
    pub async fn shortfall(&self, period: Period) -> EngineResult<BigDecimal> {
        Ok(self.reconcile(period).await?.shortfall)
    }

    pub async fn reconcile(&self, period: Period) -> EngineResult<ReconciliationReport> {
        let zero = BigDecimal::from(0);
        let entry = self.storage.get_vat_entry(period).await?;
        let challans = self.storage.get_challans(period).await?;

        let treasury_needed = entry
            .as_ref()
            .map(|e| e.treasury_needed.clone())
            .unwrap_or_else(|| zero.clone());
        let deposited: BigDecimal = challans.iter().map(|c| &c.amount_bdt).sum();
        let shortfall = &treasury_needed - &deposited;

        let status = if entry.is_none() {
            PaymentStatus::NotComputed
        } else if shortfall > zero && deposited == zero {
            PaymentStatus::Unpaid
        } else if shortfall > zero {
            PaymentStatus::Underpaid
        } else if shortfall == zero {
            PaymentStatus::Settled
        } else {
            PaymentStatus::Overpaid
        };

        Ok(ReconciliationReport {
            period,
            treasury_needed,
            deposited,
            shortfall,
            status,
            challans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use chrono::NaiveDate;

    fn period() -> Period {
        Period::new(2024, 6).unwrap()
    }

    fn challan(token: &str, amount: i64) -> TreasuryChallan {
        TreasuryChallan::new(
            token.to_string(),
            NaiveDate::from_ymd_opt(2024, 7, 10).unwrap(),
            BigDecimal::from(amount),
            period(),
            "Sonali Bank".to_string(),
            "1-1133-0010-0311".to_string(),
        )
    }

    #[tokio::test]
    async fn test_challans_before_computation_are_advances() {
        let treasury = TreasuryReconciliation::new(MemoryStorage::new());
        treasury.record_challan(challan("T-1", 500)).await.unwrap();

        let report = treasury.reconcile(period()).await.unwrap();
        assert_eq!(report.status, PaymentStatus::NotComputed);
        assert_eq!(report.shortfall, BigDecimal::from(-500));
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_challans() {
        let treasury = TreasuryReconciliation::new(MemoryStorage::new());
        treasury.record_challan(challan("T-1", 500)).await.unwrap();

        assert!(treasury.record_challan(challan("T-1", 700)).await.is_err());
        assert!(treasury.record_challan(challan("T-2", 0)).await.is_err());
        assert!(treasury.record_challan(challan("", 10)).await.is_err());
        assert_eq!(treasury.challans(period()).await.unwrap().len(), 1);
    }
}
