//! Tenant identity, storage layout, and per-tenant write serialization.
//!
//! A tenant owns exactly one directory under the storage root:
//!
//! ```text
//! <root>/
//!   <tenant_id>/
//!     index.sqlite              current corpus
//!     index.<uuid>.building     transient, only while a rebuild runs
//! ```
//!
//! [`TenantId`] only admits characters that form a single plain path
//! component, so no tenant id can resolve to another tenant's directory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::RagError;

const MAX_TENANT_ID_LEN: usize = 64;
const INDEX_FILE: &str = "index.sqlite";

/// Validated tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, RagError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_TENANT_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(id))
        } else {
            Err(RagError::InvalidTenant(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::new(s)
    }
}

/// Directory holding everything persisted for `tenant`.
pub fn tenant_dir(root: &Path, tenant: &TenantId) -> PathBuf {
    root.join(tenant.as_str())
}

/// Canonical location of the tenant's current index.
pub fn index_path(root: &Path, tenant: &TenantId) -> PathBuf {
    tenant_dir(root, tenant).join(INDEX_FILE)
}

/// Fresh staging location for a rebuild in progress.
pub fn staging_path(root: &Path, tenant: &TenantId) -> PathBuf {
    tenant_dir(root, tenant).join(format!("index.{}.building", uuid::Uuid::new_v4()))
}

/// Registry of per-tenant write locks.
///
/// Rebuilds and teardown for the same tenant run one at a time; waiters are
/// granted the lock in the order they asked for it. Different tenants never
/// share a lock. A tenant's entry is dropped once nobody holds or awaits it.
#[derive(Default)]
pub struct TenantLocks {
    locks: Arc<LockMap>,
}

type LockMap = Mutex<HashMap<TenantId, Arc<AsyncMutex<()>>>>;

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `tenant`'s storage.
    pub async fn acquire(&self, tenant: &TenantId) -> TenantWriteGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(tenant.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        TenantWriteGuard {
            tenant: tenant.clone(),
            registry: self.locks.clone(),
            lock,
            guard: Some(guard),
        }
    }

    /// Number of tenants with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Exclusive write access to one tenant's storage, released on drop.
pub struct TenantWriteGuard {
    tenant: TenantId,
    registry: Arc<LockMap>,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TenantWriteGuard {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

impl Drop for TenantWriteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters clone the lock under the registry mutex, so the map entry
        // and this guard being the only owners means nobody else wants it.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.tenant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn accepts_plain_ids() {
        for id in ["123456789012345678", "guild_a", "T1", "acme-corp"] {
            assert!(TenantId::new(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_path_like_ids() {
        for id in ["", "..", "a/b", "a\\b", "tenant one", ".hidden", &"x".repeat(65)] {
            assert!(
                matches!(TenantId::new(id), Err(RagError::InvalidTenant(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn paths_are_scoped_to_tenant_dir() {
        let root = Path::new("/data/db");
        let t = TenantId::new("T1").unwrap();
        assert_eq!(tenant_dir(root, &t), PathBuf::from("/data/db/T1"));
        assert_eq!(index_path(root, &t), PathBuf::from("/data/db/T1/index.sqlite"));
        let staging = staging_path(root, &t);
        assert_eq!(staging.parent(), Some(Path::new("/data/db/T1")));
        assert_ne!(staging, staging_path(root, &t));
    }

    #[tokio::test]
    async fn same_tenant_waits_other_tenant_does_not() {
        let locks = Arc::new(TenantLocks::new());
        let t1 = TenantId::new("T1").unwrap();
        let t2 = TenantId::new("T2").unwrap();

        let held = locks.acquire(&t1).await;
        assert_eq!(held.tenant(), &t1);

        let other = tokio::time::timeout(Duration::from_millis(200), locks.acquire(&t2)).await;
        assert!(other.is_ok(), "different tenant must not block");

        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&t1)).await;
        assert!(same.is_err(), "same tenant must wait");

        drop(held);
        let after = tokio::time::timeout(Duration::from_millis(200), locks.acquire(&t1)).await;
        assert!(after.is_ok(), "lock must be released on drop");
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let locks = Arc::new(TenantLocks::new());
        for i in 0..100 {
            let t = TenantId::new(format!("tenant-{i}")).unwrap();
            drop(locks.acquire(&t).await);
        }
        assert_eq!(locks.tracked(), 0);

        let t1 = TenantId::new("T1").unwrap();
        let held = locks.acquire(&t1).await;
        let waiter = {
            let locks = locks.clone();
            let t1 = t1.clone();
            tokio::spawn(async move {
                let guard = locks.acquire(&t1).await;
                guard.tenant().clone()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The waiter still needs the entry after the holder lets go.
        drop(held);
        assert_eq!(waiter.await.unwrap(), t1);
        assert_eq!(locks.tracked(), 0);
    }
}
