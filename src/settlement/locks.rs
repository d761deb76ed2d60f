//! Bounded-wait locks serializing work on periods, products and the
//! closing-balance chain.
//!
//! Lock order is always period, then product, then chain. Every wait is
//! capped by the configured timeout and surfaces [`EngineError::Contention`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::types::{EngineError, EngineResult, Period};

/// Shared registry of advisory locks
#[derive(Debug)]
pub struct LockRegistry {
    timeout: Duration,
    periods: Mutex<HashMap<Period, Arc<RwLock<()>>>>,
    products: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    chain: Arc<Mutex<()>>,
}

impl LockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            periods: Mutex::new(HashMap::new()),
            products: Mutex::new(HashMap::new()),
            chain: Arc::new(Mutex::new(())),
        }
    }

    /// Shared access to a period: fact ingestion dated inside it
    pub async fn read_period(&self, period: Period) -> EngineResult<OwnedRwLockReadGuard<()>> {
        let lock = self.period_lock(period).await;
        self.bounded(lock.read_owned(), format!("period {period} (read)"))
            .await
    }

    /// Exclusive access to a period: computation, lock and unlock
    pub async fn write_period(&self, period: Period) -> EngineResult<OwnedRwLockWriteGuard<()>> {
        let lock = self.period_lock(period).await;
        self.bounded(lock.write_owned(), format!("period {period}"))
            .await
    }

    /// Serialize appends and strict reads for one product
    pub async fn lock_product(&self, product_id: &str) -> EngineResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut products = self.products.lock().await;
            prune_idle(&mut products);
            products
                .entry(product_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        self.bounded(lock.lock_owned(), format!("product '{product_id}'"))
            .await
    }

    /// The single lock guarding the closing-balance chain
    pub async fn lock_chain(&self) -> EngineResult<OwnedMutexGuard<()>> {
        self.bounded(self.chain.clone().lock_owned(), "closing-balance chain".to_string())
            .await
    }

    async fn period_lock(&self, period: Period) -> Arc<RwLock<()>> {
        let mut periods = self.periods.lock().await;
        prune_idle(&mut periods);
        periods
            .entry(period)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn bounded<G>(&self, acquire: impl Future<Output = G>, what: String) -> EngineResult<G> {
        tracing::debug!(lock = %what, "acquiring lock");
        tokio::time::timeout(self.timeout, acquire)
            .await
            .map_err(|_| {
                tracing::warn!(lock = %what, timeout_ms = self.timeout.as_millis() as u64, "lock wait expired");
                EngineError::Contention(format!(
                    "timed out after {:?} waiting for {what}",
                    self.timeout
                ))
            })
    }
}

/// Drop entries nobody holds or waits on; guards and waiters keep a clone alive.
fn prune_idle<K, L>(locks: &mut HashMap<K, Arc<L>>) {
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> Period {
        Period::new(2024, 3).unwrap()
    }

    #[tokio::test]
    async fn test_period_readers_share() {
        let locks = LockRegistry::new(Duration::from_millis(50));
        let first = locks.read_period(period()).await.unwrap();
        let second = locks.read_period(period()).await;
        assert!(second.is_ok());
        drop(first);
    }

    #[tokio::test]
    async fn test_writer_times_out_behind_reader() {
        let locks = LockRegistry::new(Duration::from_millis(20));
        let _reader = locks.read_period(period()).await.unwrap();

        let result = locks.write_period(period()).await;
        assert!(matches!(result, Err(EngineError::Contention(_))));

        let other = locks.write_period(period().next()).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_chain_lock_released_on_drop() {
        let locks = LockRegistry::new(Duration::from_millis(20));
        let guard = locks.lock_chain().await.unwrap();
        assert!(locks.lock_chain().await.unwrap_err().is_retriable());
        drop(guard);
        assert!(locks.lock_chain().await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_evicted() {
        let locks = LockRegistry::new(Duration::from_millis(20));
        for month in 1..=12 {
            let _guard = locks.write_period(Period::new(2024, month).unwrap()).await.unwrap();
        }
        drop(locks.lock_product("a").await.unwrap());

        let held = locks.lock_product("b").await.unwrap();
        let _period = locks.read_period(period()).await.unwrap();
        assert_eq!(locks.products.lock().await.len(), 1);
        assert_eq!(locks.periods.lock().await.len(), 1);

        // A held lock is never evicted out from under its owner
        assert!(matches!(
            locks.lock_product("b").await,
            Err(EngineError::Contention(_))
        ));
        drop(held);
        assert!(locks.lock_product("b").await.is_ok());
    }
}
