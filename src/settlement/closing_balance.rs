//! Carried-forward VAT credit, kept as an ordered sequence of period-end
//! snapshots that can be replayed from the opening balance.

use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::RoundingPolicy;
use crate::settlement::engine::ensure_period_unlocked;
use crate::settlement::LockRegistry;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_reason;

/// Closing-balance ledger over a storage backend
pub struct ClosingBalanceLedger<S: LedgerStorage> {
    storage: S,
    locks: Arc<LockRegistry>,
    rounding: RoundingPolicy,
}

impl<S: LedgerStorage> ClosingBalanceLedger<S> {
    pub fn new(storage: S, locks: Arc<LockRegistry>, rounding: RoundingPolicy) -> Self {
        Self {
            storage,
            locks,
            rounding,
        }
    }

    /// Seed the opening credit. Allowed exactly once.
    pub async fn seed_opening_balance(&self, amount: BigDecimal) -> EngineResult<OpeningBalance> {
        if amount < BigDecimal::from(0) {
            return Err(EngineError::Validation(format!(
                "Opening balance cannot be negative, got {amount}"
            )));
        }

        let _chain = self.locks.lock_chain().await?;

        if let Some(existing) = self.storage.get_opening_balance().await? {
            return Err(EngineError::Validation(format!(
                "Opening balance already seeded with {} at {}",
                existing.amount, existing.seeded_at
            )));
        }

        let opening = OpeningBalance {
            amount: self.rounding.apply(&amount),
            seeded_at: chrono::Utc::now().naive_utc(),
        };
        let audit = PeriodAuditEvent::new(
            None,
            AuditAction::OpeningBalanceSeeded,
            Some(format!("opening balance {}", opening.amount)),
        );
        self.storage.save_opening_balance(&opening, &audit).await?;

        info!(amount = %opening.amount, "seeded opening balance");
        Ok(opening)
    }

    /// The seeded opening balance, or zero
    pub async fn opening_balance(&self) -> EngineResult<BigDecimal> {
        Ok(self
            .storage
            .get_opening_balance()
            .await?
            .map(|o| o.amount)
            .unwrap_or_else(|| BigDecimal::from(0)))
    }

    /// Credit available at the start of `period`: the most recent snapshot
    /// strictly before it, or the opening balance
    pub async fn available(&self, period: Period) -> EngineResult<BigDecimal> {
        match self.storage.latest_snapshot_before(period).await? {
            Some(snapshot) => Ok(snapshot.balance),
            None => self.opening_balance().await,
        }
    }

    /// Credit carried out of `period`
    pub async fn closing_balance(&self, period: Period) -> EngineResult<BigDecimal> {
        self.available(period.next()).await
    }

    /// The snapshot closing `period`, if one was written
    pub async fn snapshot(&self, period: Period) -> EngineResult<Option<ClosingBalanceSnapshot>> {
        self.storage.get_snapshot(period).await
    }

    /// All snapshots in period order
    pub async fn history(&self) -> EngineResult<Vec<ClosingBalanceSnapshot>> {
        self.storage.list_snapshots().await
    }

    /// Net administrative adjustments booked to `period`
    pub(crate) async fn adjustments_for(&self, period: Period) -> EngineResult<BigDecimal> {
        Ok(self
            .storage
            .list_adjustments(Some(period))
            .await?
            .iter()
            .map(|a| &a.delta)
            .sum())
    }

    /// Snapshot recording `used` against `period`.
    ///
    /// Caller must hold the chain lock and persist the snapshot with the
    /// VAT entry. Returns the stored snapshot untouched when nothing changed;
    /// later periods are never rewritten here.
    pub(crate) async fn apply_usage(
        &self,
        period: Period,
        available: &BigDecimal,
        used: &BigDecimal,
    ) -> EngineResult<ClosingBalanceSnapshot> {
        let adjustments = self.adjustments_for(period).await?;

        if let Some(existing) = self.storage.get_snapshot(period).await? {
            if &existing.opening == available
                && &existing.used == used
                && existing.adjustments == adjustments
            {
                return Ok(existing);
            }
        }

        let snapshot =
            ClosingBalanceSnapshot::new(period, available.clone(), used.clone(), adjustments);
        if snapshot.balance < BigDecimal::from(0) {
            return Err(EngineError::Consistency(format!(
                "Closing balance for {period} would be negative: {}",
                snapshot.balance
            )));
        }
        Ok(snapshot)
    }

    /// Administrative top-up or correction booked to `period`
    pub async fn adjust(
        &self,
        period: Period,
        delta: BigDecimal,
        reason: String,
    ) -> EngineResult<ClosingBalanceSnapshot> {
        validate_reason(&reason)?;
        let delta = self.rounding.apply(&delta);
        if delta == BigDecimal::from(0) {
            return Err(EngineError::Validation(format!(
                "Adjustment for {period} must change the balance"
            )));
        }

        let _period_guard = self.locks.write_period(period).await?;
        ensure_period_unlocked(&self.storage, period, "adjust its closing balance").await?;
        let _chain = self.locks.lock_chain().await?;

        let available = self.available(period).await?;
        let used = self
            .storage
            .get_vat_entry(period)
            .await?
            .map(|e| e.used_from_closing_balance)
            .unwrap_or_else(|| BigDecimal::from(0));
        let adjustments = self.adjustments_for(period).await? + &delta;

        let snapshot = ClosingBalanceSnapshot::new(period, available, used, adjustments);
        if snapshot.balance < BigDecimal::from(0) {
            return Err(EngineError::Validation(format!(
                "Adjustment of {delta} would drive the closing balance for {period} negative ({})",
                snapshot.balance
            )));
        }

        let adjustment = BalanceAdjustment::new(period, delta, reason.clone());
        let audit = PeriodAuditEvent::new(
            Some(period),
            AuditAction::BalanceAdjusted,
            Some(format!("{}: {reason}", adjustment.delta)),
        );
        self.storage
            .save_adjustment(&adjustment, &snapshot, &audit)
            .await?;

        info!(
            period = %period,
            delta = %adjustment.delta,
            balance = %snapshot.balance,
            reason = %reason,
            "adjusted closing balance"
        );
        Ok(snapshot)
    }

    /// Replay `opening − Σ used + Σ adjustments` in period order and check
    /// every stored snapshot against it.
    pub async fn verify_chain(&self) -> EngineResult<Vec<ClosingBalanceSnapshot>> {
        let _chain = self.locks.lock_chain().await?;

        let snapshots = self.storage.list_snapshots().await?;
        let mut adjustments: HashMap<Period, BigDecimal> = HashMap::new();
        for adjustment in self.storage.list_adjustments(None).await? {
            *adjustments
                .entry(adjustment.period)
                .or_insert_with(|| BigDecimal::from(0)) += &adjustment.delta;
        }
        let entries: HashMap<Period, VatPeriodEntry> = self
            .storage
            .list_vat_entries()
            .await?
            .into_iter()
            .map(|e| (e.period, e))
            .collect();

        let zero = BigDecimal::from(0);
        let mut expected = self.opening_balance().await?;

        for snapshot in &snapshots {
            let period = snapshot.period;
            let adjusted = adjustments.get(&period).unwrap_or(&zero);
            let used = entries
                .get(&period)
                .map(|e| &e.used_from_closing_balance)
                .unwrap_or(&zero);

            let mismatch = if snapshot.opening != expected {
                Some(format!(
                    "snapshot for {period} opens at {} but replay carries {expected}",
                    snapshot.opening
                ))
            } else if &snapshot.used != used {
                Some(format!(
                    "snapshot for {period} records usage {} but the VAT entry used {used}",
                    snapshot.used
                ))
            } else if &snapshot.adjustments != adjusted {
                Some(format!(
                    "snapshot for {period} records adjustments {} but the log sums to {adjusted}",
                    snapshot.adjustments
                ))
            } else if snapshot.balance != &expected - used + adjusted {
                Some(format!(
                    "snapshot for {period} closes at {} but replay gives {}",
                    snapshot.balance,
                    &expected - used + adjusted
                ))
            } else if snapshot.balance < zero {
                Some(format!(
                    "snapshot for {period} is negative: {}",
                    snapshot.balance
                ))
            } else {
                None
            };

            if let Some(message) = mismatch {
                error!(period = %period, %message, "closing-balance chain mismatch");
                return Err(EngineError::Consistency(message));
            }

            expected = snapshot.balance.clone();
        }

        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use std::time::Duration;

    fn ledger(storage: MemoryStorage) -> ClosingBalanceLedger<MemoryStorage> {
        ClosingBalanceLedger::new(
            storage,
            Arc::new(LockRegistry::new(Duration::from_millis(200))),
            RoundingPolicy::default(),
        )
    }

    fn period(month: u32) -> Period {
        Period::new(2024, month).unwrap()
    }

    #[tokio::test]
    async fn test_available_falls_back_to_opening() {
        let balances = ledger(MemoryStorage::new());
        assert_eq!(
            balances.available(period(1)).await.unwrap(),
            BigDecimal::from(0)
        );

        balances
            .seed_opening_balance(BigDecimal::from(5000))
            .await
            .unwrap();
        assert_eq!(
            balances.available(period(6)).await.unwrap(),
            BigDecimal::from(5000)
        );
        assert!(balances
            .seed_opening_balance(BigDecimal::from(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_adjust_requires_reason_and_stays_non_negative() {
        let balances = ledger(MemoryStorage::new());
        balances
            .seed_opening_balance(BigDecimal::from(100))
            .await
            .unwrap();

        assert!(matches!(
            balances
                .adjust(period(2), BigDecimal::from(10), " ".to_string())
                .await,
            Err(EngineError::Validation(_))
        ));
        assert!(balances
            .adjust(period(2), BigDecimal::from(-150), "write-off".to_string())
            .await
            .is_err());

        let snapshot = balances
            .adjust(period(2), BigDecimal::from(25), "refund credited".to_string())
            .await
            .unwrap();
        assert_eq!(snapshot.balance, BigDecimal::from(125));
        assert_eq!(
            balances.available(period(3)).await.unwrap(),
            BigDecimal::from(125)
        );
        // An adjustment affects later periods, not its own opening.
        assert_eq!(
            balances.available(period(2)).await.unwrap(),
            BigDecimal::from(100)
        );

        assert_eq!(balances.verify_chain().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_chain_detects_tampering() {
        let storage = MemoryStorage::new();
        let balances = ledger(storage.clone());
        balances
            .seed_opening_balance(BigDecimal::from(100))
            .await
            .unwrap();
        balances
            .adjust(period(1), BigDecimal::from(50), "top-up".to_string())
            .await
            .unwrap();

        let forged = ClosingBalanceSnapshot::new(
            period(2),
            BigDecimal::from(999),
            BigDecimal::from(0),
            BigDecimal::from(0),
        );
        let entry = VatPeriodEntry {
            period: period(2),
            gross_sales: BigDecimal::from(0),
            net_sales_ex_vat: BigDecimal::from(0),
            vat_payable: BigDecimal::from(0),
            used_from_closing_balance: BigDecimal::from(0),
            treasury_needed: BigDecimal::from(0),
            vat_rate: BigDecimal::from(0),
            sales_counted: 0,
            locked: false,
            computed_at: chrono::Utc::now().naive_utc(),
        };
        storage.save_settlement(&entry, &forged).await.unwrap();

        assert!(matches!(
            balances.verify_chain().await,
            Err(EngineError::Consistency(_))
        ));
    }
}
