//! The pending-transaction registry and the deposit address book.
//!
//! Both are in-process keyed stores. The registry is the authoritative
//! record of transactions not yet in a terminal state; its
//! `transition` is a compare-and-set, which is how duplicate webhook
//! deliveries are rejected without extra locking logic in callers. For
//! multi-step settlements (CAS plus ledger effect) callers additionally
//! hold the per-transaction-id lock from [`PendingTransactionStore::lock_tx`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::entities::TxStatus;
use crate::entities::transaction::{DepositAddress, PendingTransaction};

type LockMap = Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Compare-and-set failure.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("transaction {0} not found")]
    NotFound(Uuid),
    #[error("transaction {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: TxStatus,
        actual: TxStatus,
    },
}

/// Serialization guard for one transaction id.
///
/// Dropping the guard releases the lock and prunes the slot once no
/// other task holds or awaits it, so settled ids do not accumulate.
pub struct TxGuard {
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        // Release the mutex before inspecting the slot's refcount.
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = locks.get(&self.id)
            && Arc::strong_count(slot) == 1
        {
            locks.remove(&self.id);
        }
    }
}

/// In-process registry of non-terminal transactions, keyed by provider
/// transaction id.
#[derive(Debug, Default)]
pub struct PendingTransactionStore {
    inner: RwLock<HashMap<Uuid, PendingTransaction>>,
    locks: LockMap,
}

impl PendingTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the serialization lock for one transaction id.
    ///
    /// Webhook deliveries and monitor passes for the *same* id must not
    /// interleave their CAS + ledger steps; callers hold this guard
    /// across both. Different ids proceed concurrently.
    pub async fn lock_tx(&self, id: Uuid) -> TxGuard {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(id).or_default())
        };
        let guard = slot.lock_owned().await;
        TxGuard {
            id,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Insert a new entry. Returns `false` (and leaves the stored entry
    /// untouched) if the id is already present.
    pub async fn put(&self, tx: PendingTransaction) -> bool {
        let mut inner = self.inner.write().await;
        match inner.entry(tx.id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(tx);
                true
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<PendingTransaction> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Compare-and-set status transition.
    ///
    /// Fails with [`TransitionError::Conflict`] — a no-op — if the
    /// stored status is not `from`. `mutate` runs on the entry only
    /// after the status check passes, inside the same critical section.
    pub async fn transition<F>(
        &self,
        id: Uuid,
        from: TxStatus,
        to: TxStatus,
        mutate: F,
    ) -> Result<PendingTransaction, TransitionError>
    where
        F: FnOnce(&mut PendingTransaction),
    {
        let mut inner = self.inner.write().await;
        let tx = inner.get_mut(&id).ok_or(TransitionError::NotFound(id))?;
        if tx.status != from {
            return Err(TransitionError::Conflict {
                id,
                expected: from,
                actual: tx.status,
            });
        }
        tx.status = to;
        mutate(tx);
        Ok(tx.clone())
    }

    /// Increment `retry_count`, returning the new value.
    pub async fn record_retry(&self, id: Uuid) -> Option<u32> {
        let mut inner = self.inner.write().await;
        let tx = inner.get_mut(&id)?;
        tx.retry_count += 1;
        Some(tx.retry_count)
    }

    pub async fn set_last_error(&self, id: Uuid, message: impl Into<String>) {
        if let Some(tx) = self.inner.write().await.get_mut(&id) {
            tx.last_error = Some(message.into());
        }
    }

    /// Remove a (terminal) entry. The caller is expected to hold the
    /// id's [`TxGuard`]; the lock slot itself is pruned when that guard
    /// drops.
    pub async fn remove(&self, id: Uuid) -> Option<PendingTransaction> {
        self.inner.write().await.remove(&id)
    }

    /// Consistent snapshot of entries older than `min_age`.
    ///
    /// Mutations take the write lock, so iteration never observes a
    /// transaction mid-transition.
    pub async fn list_older_than(
        &self,
        min_age: time::Duration,
        now: OffsetDateTime,
    ) -> Vec<PendingTransaction> {
        self.inner
            .read()
            .await
            .values()
            .filter(|tx| tx.age(now) > min_age)
            .cloned()
            .collect()
    }

    /// All entries belonging to one user.
    pub async fn list_for_user(&self, user_id: i64) -> Vec<PendingTransaction> {
        self.inner
            .read()
            .await
            .values()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<PendingTransaction> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Open deposit addresses, keyed by the provider uuid assigned at
/// issuance.
///
/// Entries bound how many deposit requests a user may have open and
/// carry the expiry the monitor enforces. An entry is consumed by the
/// first payment event for its uuid or by expiry, whichever comes
/// first.
#[derive(Debug, Default)]
pub struct DepositAddressBook {
    inner: RwLock<HashMap<Uuid, DepositAddress>>,
}

impl DepositAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, entry: DepositAddress) {
        self.inner.write().await.insert(entry.uuid, entry);
    }

    pub async fn get(&self, uuid: Uuid) -> Option<DepositAddress> {
        self.inner.read().await.get(&uuid).cloned()
    }

    pub async fn remove(&self, uuid: Uuid) -> Option<DepositAddress> {
        self.inner.write().await.remove(&uuid)
    }

    /// How many addresses `user_id` currently has open.
    pub async fn open_count(&self, user_id: i64) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .count()
    }

    /// Remove and return every entry whose expiry has passed.
    pub async fn take_expired(&self, now: OffsetDateTime) -> Vec<DepositAddress> {
        let mut inner = self.inner.write().await;
        let expired: Vec<Uuid> = inner
            .values()
            .filter(|a| a.is_expired(now))
            .map(|a| a.uuid)
            .collect();
        expired.into_iter().filter_map(|id| inner.remove(&id)).collect()
    }

    pub async fn snapshot(&self) -> Vec<DepositAddress> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Entries issued more than `min_age` ago and still unexpired.
    pub async fn list_older_than(
        &self,
        min_age: time::Duration,
        now: OffsetDateTime,
    ) -> Vec<DepositAddress> {
        self.inner
            .read()
            .await
            .values()
            .filter(|a| now - a.created_at > min_age && !a.is_expired(now))
            .cloned()
            .collect()
    }
}
