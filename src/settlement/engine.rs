//! Period VAT computation, locking and unlocking

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RoundingPolicy;
use crate::settlement::{ClosingBalanceLedger, LockRegistry};
use crate::tax::vat::{VatCalculation, VatRate, VatSummary};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_reason;

/// Fail with [`EngineError::PeriodLocked`] if `period` is frozen
pub(crate) async fn ensure_period_unlocked<S: LedgerStorage + ?Sized>(
    storage: &S,
    period: Period,
    action: &str,
) -> EngineResult<()> {
    match storage.get_vat_entry(period).await? {
        Some(entry) if entry.locked => {
            warn!(period = %period, action, "refused mutation of locked period");
            Err(EngineError::PeriodLocked {
                period,
                action: action.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Result of computing one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    /// The persisted entry
    pub entry: VatPeriodEntry,
    /// Credit available at the start of the period
    pub available_before: BigDecimal,
    /// Credit carried into the next period
    pub closing_balance: BigDecimal,
    /// Sales left out of the figures and why
    pub skipped: Vec<SkippedRecord>,
}

impl SettlementReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// VAT settlement engine
pub struct VatSettlementEngine<S: LedgerStorage> {
    storage: S,
    locks: Arc<LockRegistry>,
    balances: ClosingBalanceLedger<S>,
    rate: VatRate,
    rounding: RoundingPolicy,
    validator: Box<dyn SaleValidator>,
}

impl<S: LedgerStorage + Clone> VatSettlementEngine<S> {
    pub fn new(
        storage: S,
        locks: Arc<LockRegistry>,
        rate: VatRate,
        rounding: RoundingPolicy,
    ) -> Self {
        Self::with_validator(storage, locks, rate, rounding, Box::new(DefaultSaleValidator))
    }

    pub fn with_validator(
        storage: S,
        locks: Arc<LockRegistry>,
        rate: VatRate,
        rounding: RoundingPolicy,
        validator: Box<dyn SaleValidator>,
    ) -> Self {
        Self {
            balances: ClosingBalanceLedger::new(storage.clone(), locks.clone(), rounding),
            storage,
            locks,
            rate,
            rounding,
            validator,
        }
    }
}

impl<S: LedgerStorage> VatSettlementEngine<S> {
    /// The closing-balance ledger this engine settles against
    pub fn balances(&self) -> &ClosingBalanceLedger<S> {
        &self.balances
    }

    pub fn rate(&self) -> &VatRate {
        &self.rate
    }

    /// Validate a sale with the engine's validator
    pub fn validate_sale(&self, sale: &SaleFact) -> EngineResult<()> {
        self.validator.validate_sale(sale)
    }

    /// Get the VAT entry for a period
    pub async fn vat_entry(&self, period: Period) -> EngineResult<Option<VatPeriodEntry>> {
        self.storage.get_vat_entry(period).await
    }

    /// Settlement state of a period
    pub async fn status(&self, period: Period) -> EngineResult<PeriodStatus> {
        Ok(self
            .storage
            .get_vat_entry(period)
            .await?
            .map(|e| e.status())
            .unwrap_or(PeriodStatus::Open))
    }

    /// Compute (or recompute) a period and settle it against the closing balance
    pub async fn compute_period(&self, period: Period) -> EngineResult<SettlementReport> {
        let _period_guard = self.locks.write_period(period).await?;
        ensure_period_unlocked(&self.storage, period, "recompute it").await?;

        let sales = self.storage.get_sales(period.start(), period.end()).await?;
        let mut summary = VatSummary::default();
        let mut skipped = Vec::new();

        for sale in &sales {
            match self.validator.validate_sale(sale) {
                Ok(()) => summary.add(&VatCalculation::for_sale(sale, &self.rate)),
                Err(e @ EngineError::Validation(_)) => {
                    warn!(period = %period, sale_id = %sale.sale_id, error = %e, "skipping sale");
                    skipped.push(SkippedRecord::new(sale.sale_id.clone(), &e));
                }
                Err(e) => return Err(e),
            }
        }

        let totals = summary.rounded(&self.rounding);
        let zero = BigDecimal::from(0);

        let _chain = self.locks.lock_chain().await?;
        let available = self.balances.available(period).await?;
        // Adjustments already booked to this period count toward the credit it can spend.
        let spendable = &available + self.balances.adjustments_for(period).await?;
        let used = if totals.vat_amount < spendable {
            totals.vat_amount.clone()
        } else {
            spendable
        };
        let used = if used < zero { zero.clone() } else { used };
        let treasury_needed = &totals.vat_amount - &used;
        let treasury_needed = if treasury_needed < zero {
            zero
        } else {
            treasury_needed
        };

        let entry = VatPeriodEntry {
            period,
            gross_sales: totals.gross_sales,
            net_sales_ex_vat: totals.net_sales,
            vat_payable: totals.vat_amount,
            used_from_closing_balance: used,
            treasury_needed,
            vat_rate: self.rate.value().clone(),
            sales_counted: totals.count,
            locked: false,
            computed_at: chrono::Utc::now().naive_utc(),
        };
        let snapshot = self
            .balances
            .apply_usage(period, &available, &entry.used_from_closing_balance)
            .await?;

        self.storage.save_settlement(&entry, &snapshot).await?;

        info!(
            period = %period,
            vat_payable = %entry.vat_payable,
            used = %entry.used_from_closing_balance,
            treasury_needed = %entry.treasury_needed,
            skipped = skipped.len(),
            "computed VAT period"
        );

        Ok(SettlementReport {
            entry,
            available_before: available,
            closing_balance: snapshot.balance,
            skipped,
        })
    }

    /// Compute every period from `from` through `to` in chronological order
    pub async fn compute_range(
        &self,
        from: Period,
        to: Period,
    ) -> EngineResult<Vec<SettlementReport>> {
        if to < from {
            return Err(EngineError::Validation(format!(
                "Period range {from}..={to} is reversed"
            )));
        }

        let mut reports = Vec::new();
        let mut period = from;
        while period <= to {
            reports.push(self.compute_period(period).await?);
            period = period.next();
        }
        Ok(reports)
    }

    /// Freeze a computed period
    pub async fn lock_period(&self, period: Period) -> EngineResult<VatPeriodEntry> {
        let _period_guard = self.locks.write_period(period).await?;

        let mut entry = self.storage.get_vat_entry(period).await?.ok_or_else(|| {
            EngineError::Validation(format!(
                "Period {period} has not been computed and cannot be locked"
            ))
        })?;
        if entry.locked {
            return Err(EngineError::PeriodLocked {
                period,
                action: "lock it again".to_string(),
            });
        }

        entry.locked = true;
        let audit = PeriodAuditEvent::new(Some(period), AuditAction::PeriodLocked, None);
        self.storage.save_vat_entry(&entry, &audit).await?;

        info!(period = %period, "locked VAT period");
        Ok(entry)
    }

    /// Reopen a locked period; the reason is recorded in the audit trail
    pub async fn unlock_period(&self, period: Period, reason: String) -> EngineResult<VatPeriodEntry> {
        validate_reason(&reason)?;
        let _period_guard = self.locks.write_period(period).await?;

        let mut entry = self.storage.get_vat_entry(period).await?.ok_or_else(|| {
            EngineError::Validation(format!("Period {period} has not been computed"))
        })?;
        if !entry.locked {
            return Err(EngineError::Validation(format!(
                "Period {period} is not locked"
            )));
        }

        entry.locked = false;
        let audit = PeriodAuditEvent::new(
            Some(period),
            AuditAction::PeriodUnlocked,
            Some(reason.clone()),
        );
        self.storage.save_vat_entry(&entry, &audit).await?;

        info!(period = %period, reason = %reason, "unlocked VAT period");
        Ok(entry)
    }
}
