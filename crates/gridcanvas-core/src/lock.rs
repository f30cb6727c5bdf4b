//! Advisory per-shape edit leases.
//!
//! Lock state lives in the shape's own `lockedBy`/`lockedAt` fields, so it
//! replicates like any other edit. Two holders acquiring at once can both
//! succeed locally; after merge the document converges on one value and
//! the loser sees the shape as locked on its next check.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::canvas::SharedCanvas;
use crate::shape::{HolderId, LockLease, ShapeId};
use crate::store::ShapeStore;

/// Leases older than this may be taken over or swept
pub const LOCK_TTL: Duration = Duration::from_secs(30);

/// How often the sweeper looks for expired leases
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Wall-clock source, injectable for tests
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default, Clone)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lease rules over a [`ShapeStore`], on behalf of one local holder
#[derive(Debug, Clone)]
pub struct LockManager {
    local: HolderId,
    ttl: Duration,
}

impl LockManager {
    pub fn new(local: HolderId) -> Self {
        Self::with_ttl(local, LOCK_TTL)
    }

    pub fn with_ttl(local: HolderId, ttl: Duration) -> Self {
        Self { local, ttl }
    }

    pub fn local(&self) -> &HolderId {
        &self.local
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }

    /// Try to take the lease on `id` for `holder`.
    ///
    /// Succeeds when the shape is free, already held by `holder`, or held by
    /// someone whose lease has expired. Re-acquiring keeps the original
    /// acquisition time, so a lease is never extended. Never errors: a
    /// missing shape or a failed write just returns `false`.
    pub fn acquire(
        &self,
        store: &mut ShapeStore,
        id: &ShapeId,
        holder: &HolderId,
        now_ms: u64,
    ) -> bool {
        let Some(shape) = store.get(id) else {
            return false;
        };
        match &shape.lock {
            Some(lease) if &lease.holder == holder => return true,
            Some(lease) if !lease.is_expired(now_ms, self.ttl_ms()) => {
                debug!(
                    shape = %id,
                    holder = %holder,
                    owner = %lease.holder,
                    "lock held by another holder"
                );
                return false;
            }
            _ => {}
        }

        let lease = LockLease {
            holder: holder.clone(),
            acquired_at: now_ms,
        };
        match store.set_lock(id, Some(lease)) {
            Ok(()) => {
                debug!(shape = %id, holder = %holder, "lock acquired");
                true
            }
            Err(e) => {
                warn!(shape = %id, error = %e, "failed to write lock");
                false
            }
        }
    }

    /// Drop the lease if `holder` owns it. Returns whether anything changed.
    pub fn release(&self, store: &mut ShapeStore, id: &ShapeId, holder: &HolderId) -> bool {
        let owned = store
            .get(id)
            .and_then(|s| s.lock.as_ref())
            .is_some_and(|lease| &lease.holder == holder);
        if !owned {
            return false;
        }
        match store.set_lock(id, None) {
            Ok(()) => {
                debug!(shape = %id, holder = %holder, "lock released");
                true
            }
            Err(e) => {
                warn!(shape = %id, error = %e, "failed to clear lock");
                false
            }
        }
    }

    /// Clear every expired lease held by someone other than the local
    /// holder. The local holder's own leases end through `release`.
    pub fn sweep(&self, store: &mut ShapeStore, now_ms: u64) -> Vec<ShapeId> {
        let expired: Vec<ShapeId> = store
            .all()
            .into_iter()
            .filter(|s| {
                s.lock
                    .as_ref()
                    .is_some_and(|l| l.holder != self.local && l.is_expired(now_ms, self.ttl_ms()))
            })
            .map(|s| s.id.clone())
            .collect();

        let mut cleared = Vec::with_capacity(expired.len());
        for id in expired {
            match store.set_lock(&id, None) {
                Ok(()) => cleared.push(id),
                Err(e) => warn!(shape = %id, error = %e, "failed to sweep lock"),
            }
        }
        if !cleared.is_empty() {
            debug!(count = cleared.len(), "swept expired locks");
        }
        cleared
    }

    /// Whether the shape holds a live lease owned by anyone other than `asking`
    pub fn is_locked(
        &self,
        store: &ShapeStore,
        id: &ShapeId,
        asking: &HolderId,
        now_ms: u64,
    ) -> bool {
        self.blocking_holder(store, id, asking, now_ms).is_some()
    }

    /// Owner of a live lease that blocks `asking`, if any
    pub fn blocking_holder(
        &self,
        store: &ShapeStore,
        id: &ShapeId,
        asking: &HolderId,
        now_ms: u64,
    ) -> Option<HolderId> {
        store
            .get(id)
            .and_then(|s| s.lock.as_ref())
            .filter(|lease| &lease.holder != asking && !lease.is_expired(now_ms, self.ttl_ms()))
            .map(|lease| lease.holder.clone())
    }
}

/// Background task that periodically sweeps expired leases on a canvas.
///
/// The task is aborted when this handle is dropped.
#[derive(Debug)]
pub struct LockSweeper {
    handle: JoinHandle<()>,
}

impl LockSweeper {
    pub fn spawn(canvas: SharedCanvas, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                canvas.lock().await.sweep_locks();
            }
        });
        Self { handle }
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for LockSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    fn store_with(id: &str) -> ShapeStore {
        let mut store = ShapeStore::new();
        store.add(Shape::rect(id, 0.0, 0.0, 50.0, 50.0)).unwrap();
        store
    }

    #[test]
    fn test_mutual_exclusion_until_expiry() {
        let mut store = store_with("s");
        let locks = LockManager::new(HolderId::from("B"));
        let id = ShapeId::from("s");
        let (a, b) = (HolderId::from("A"), HolderId::from("B"));

        assert!(locks.acquire(&mut store, &id, &a, 1_000));
        assert!(!locks.acquire(&mut store, &id, &b, 20_000));
        assert!(locks.is_locked(&store, &id, &b, 20_000));
        assert!(!locks.is_locked(&store, &id, &a, 20_000));
        // An expired lease no longer blocks, even before it is swept
        assert!(!locks.is_locked(&store, &id, &b, 31_001));

        // Just over 30s after A's first acquisition the lease is up for grabs
        assert!(locks.acquire(&mut store, &id, &b, 31_001));
        assert_eq!(store.get(&id).unwrap().lock.as_ref().unwrap().holder, b);
    }

    #[test]
    fn test_reacquire_keeps_original_time() {
        let mut store = store_with("s");
        let locks = LockManager::new(HolderId::from("me"));
        let id = ShapeId::from("s");
        let a = HolderId::from("A");

        assert!(locks.acquire(&mut store, &id, &a, 1_000));
        assert!(locks.acquire(&mut store, &id, &a, 25_000));
        assert_eq!(store.get(&id).unwrap().lock.as_ref().unwrap().acquired_at, 1_000);
    }

    #[test]
    fn test_release_only_by_owner() {
        let mut store = store_with("s");
        let locks = LockManager::new(HolderId::from("me"));
        let id = ShapeId::from("s");
        let (a, b) = (HolderId::from("A"), HolderId::from("B"));

        locks.acquire(&mut store, &id, &a, 0);
        assert!(!locks.release(&mut store, &id, &b));
        assert!(locks.is_locked(&store, &id, &b, 0));
        assert!(locks.release(&mut store, &id, &a));
        assert!(!locks.is_locked(&store, &id, &b, 0));
        // Releasing a free shape is a no-op
        assert!(!locks.release(&mut store, &id, &a));
    }

    #[test]
    fn test_missing_shape_never_locks() {
        let mut store = ShapeStore::new();
        let locks = LockManager::new(HolderId::from("me"));
        assert!(!locks.acquire(&mut store, &ShapeId::from("ghost"), &HolderId::from("A"), 0));
    }

    #[test]
    fn test_sweep_clears_only_expired() {
        let mut store = store_with("old");
        store.add(Shape::rect("fresh", 0.0, 0.0, 50.0, 50.0)).unwrap();
        let locks = LockManager::new(HolderId::from("me"));
        let a = HolderId::from("A");

        locks.acquire(&mut store, &ShapeId::from("old"), &a, 0);
        locks.acquire(&mut store, &ShapeId::from("fresh"), &a, 20_000);

        let swept = locks.sweep(&mut store, 30_001);
        assert_eq!(swept, vec![ShapeId::from("old")]);
        assert!(store.get(&ShapeId::from("old")).unwrap().lock.is_none());
        assert!(store.get(&ShapeId::from("fresh")).unwrap().lock.is_some());
    }

    #[test]
    fn test_sweep_skips_local_holder() {
        let mut store = store_with("mine");
        let me = HolderId::from("me");
        let locks = LockManager::new(me.clone());

        locks.acquire(&mut store, &ShapeId::from("mine"), &me, 0);
        assert!(locks.sweep(&mut store, 60_000).is_empty());
        assert!(store.get(&ShapeId::from("mine")).unwrap().lock.is_some());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), 2_100);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
