//! Memoizing wrapper around a chain data provider.

use super::{ChainDataProvider, DataSourceError};
use crate::domain::{Address, VaultSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Caches vault snapshots by (hypervisor, block).
///
/// Vault status at a past block never changes, so entries are never
/// invalidated. The whole cache is dropped when it reaches `capacity`. Misses
/// and errors are not cached.
#[derive(Debug)]
pub struct CachedChainData<P> {
    inner: P,
    capacity: usize,
    entries: Mutex<HashMap<(Address, i64), VaultSnapshot>>,
}

impl<P: ChainDataProvider> CachedChainData<P> {
    pub fn new(inner: P, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl<P: ChainDataProvider> ChainDataProvider for CachedChainData<P> {
    async fn vault_snapshot(
        &self,
        hypervisor: &Address,
        block: i64,
    ) -> Result<Option<VaultSnapshot>, DataSourceError> {
        let key = (hypervisor.clone(), block);
        if let Some(hit) = self.entries.lock().await.get(&key) {
            return Ok(Some(hit.clone()));
        }

        let fetched = self.inner.vault_snapshot(hypervisor, block).await?;
        if let Some(snapshot) = &fetched {
            let mut entries = self.entries.lock().await;
            if entries.len() >= self.capacity {
                debug!(capacity = self.capacity, "vault snapshot cache full, clearing");
                entries.clear();
            }
            entries.insert(key, snapshot.clone());
        }
        Ok(fetched)
    }
}
