use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockTable = DashMap<Uuid, Arc<Mutex<()>>>;

/// key: aggregate-locks -> single writer per subscription / customer
#[derive(Clone, Default)]
pub struct AggregateLocks {
    subscriptions: Arc<LockTable>,
    customers: Arc<LockTable>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscription(&self, subscription_id: Uuid) -> OwnedMutexGuard<()> {
        acquire(&self.subscriptions, subscription_id).await
    }

    pub async fn customer(&self, customer_id: Uuid) -> OwnedMutexGuard<()> {
        acquire(&self.customers, customer_id).await
    }

    /// Drops idle entries so the tables track live aggregates only.
    pub fn prune(&self) {
        self.subscriptions
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        self.customers.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

async fn acquire(table: &LockTable, id: Uuid) -> OwnedMutexGuard<()> {
    // clone out of the shard before awaiting
    let lock = table.entry(id).or_default().value().clone();
    lock.lock_owned().await
}
