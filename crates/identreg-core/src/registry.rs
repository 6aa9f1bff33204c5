use hashbrown::HashMap;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use serde::Serialize;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::free_pool::FreePool;
use crate::trackable::{Liveness, ObjectKey, Trackable};
use crate::Ident;

/// Automatic passes are spaced by at least `entries.len() >> SCAN_SPACING_SHIFT`
/// allocations, so each allocation pays amortized O(1) for scanning.
const SCAN_SPACING_SHIFT: u32 = 2;

type EntryMap = HashMap<ObjectKey, Entry, BuildHasherDefault<FxHasher>>;

/// One live assignment. Never mutated after creation.
struct Entry {
    ident: Ident,
    probe: Box<dyn Liveness>,
}

struct RegistryState {
    entries: EntryMap,
    free: FreePool,
    reclaim_interval: usize,
    allocations_since_reclaim: usize,
    high_water: usize,
    allocated_total: u64,
    reclaimed_total: u64,
    reclaim_passes: u64,
}

impl RegistryState {
    fn new(config: &RegistryConfig) -> Self {
        Self {
            entries: HashMap::with_capacity_and_hasher(
                config.initial_capacity,
                BuildHasherDefault::<FxHasher>::default(),
            ),
            free: FreePool::with_capacity(config.initial_capacity),
            reclaim_interval: config.reclaim_interval,
            allocations_since_reclaim: 0,
            high_water: 0,
            allocated_total: 0,
            reclaimed_total: 0,
            reclaim_passes: 0,
        }
    }

    fn maybe_reclaim(&mut self) {
        if self.reclaim_interval == 0 {
            return;
        }
        self.allocations_since_reclaim += 1;
        let spacing = self
            .reclaim_interval
            .max(self.entries.len() >> SCAN_SPACING_SHIFT);
        if self.allocations_since_reclaim >= spacing {
            self.allocations_since_reclaim = 0;
            self.reclaim_dead();
        }
    }

    /// Remove every entry whose object has no strong owners left and return
    /// its stored identifier to the free pool.
    fn reclaim_dead(&mut self) -> usize {
        let free = &mut self.free;
        let high_water = self.high_water;
        let before = self.entries.len();
        self.reclaim_passes += 1;
        // Removal from the map is what makes each identifier return exactly once
        self.entries.retain(|_, entry| {
            if entry.probe.is_alive() {
                return true;
            }
            debug_assert!(
                entry.ident.as_usize() < high_water,
                "identifier {} was never issued",
                entry.ident
            );
            trace!(ident = %entry.ident, "reclaimed identifier");
            free.push(entry.ident);
            false
        });

        let reclaimed = before - self.entries.len();
        if reclaimed > 0 {
            self.reclaimed_total += reclaimed as u64;
            debug!(
                reclaimed,
                live = self.entries.len(),
                free = self.free.len(),
                "reclamation pass"
            );
        }
        reclaimed
    }

    /// Smallest free identifier, or the live count when none is free.
    fn next_ident(&mut self) -> Ident {
        let ident = match self.free.pop() {
            Some(ident) => ident,
            None => Ident::new(self.entries.len()),
        };
        self.high_water = self.high_water.max(ident.as_usize() + 1);
        self.allocated_total += 1;
        ident
    }
}

/// Read-only view of registry state for logging and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub live: usize,
    pub free: Vec<Ident>,
    /// One past the largest identifier ever issued
    pub high_water: usize,
    pub allocated_total: u64,
    pub reclaimed_total: u64,
    /// Reclamation passes run so far, automatic and forced
    pub reclaim_passes: u64,
}

/// Hands out small integer identifiers to `Arc`-managed objects without
/// keeping them alive.
///
/// Clones share the same underlying registry. All operations take a single
/// internal lock, so lookup, reclamation, allocation and insertion happen as
/// one step even with concurrent callers.
///
/// Dead objects keep their entry until a reclamation pass removes it, so
/// [`size`](Self::size) may include them. Call [`reclaim`](Self::reclaim)
/// first when an exact live count is needed. Automatic passes run on
/// allocation, at most once every `reclaim_interval` allocations and no more
/// often than once per quarter of the tracked entry count.
#[derive(Clone)]
pub struct IdentRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl IdentRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        debug!(
            initial_capacity = config.initial_capacity,
            reclaim_interval = config.reclaim_interval,
            "created identifier registry"
        );
        Self {
            inner: Arc::new(Mutex::new(RegistryState::new(&config))),
        }
    }

    /// Retrieve the identifier for `obj`, allocating one if necessary.
    ///
    /// Repeated calls for the same live object return the same identifier.
    /// A new identifier is the smallest free one, or the current number of
    /// tracked entries when none is free.
    pub fn get_ident<O>(&self, obj: &O) -> Result<Ident>
    where
        O: Trackable + ?Sized,
    {
        let key = obj.identity()?;
        let mut state = self.inner.lock();
        if let Some(entry) = state.entries.get(&key) {
            return Ok(entry.ident);
        }

        state.maybe_reclaim();
        let ident = state.next_ident();
        state.entries.insert(
            key,
            Entry {
                ident,
                probe: obj.probe(),
            },
        );
        trace!(%ident, live = state.entries.len(), "allocated identifier");
        Ok(ident)
    }

    /// Identifier currently assigned to `obj`, without allocating.
    pub fn lookup<O>(&self, obj: &O) -> Result<Option<Ident>>
    where
        O: Trackable + ?Sized,
    {
        let key = obj.identity()?;
        Ok(self.inner.lock().entries.get(&key).map(|entry| entry.ident))
    }

    /// Force a reclamation pass. Returns how many identifiers were freed.
    pub fn reclaim(&self) -> usize {
        self.inner.lock().reclaim_dead()
    }

    /// Number of tracked entries, including ones whose objects died since
    /// the last reclamation pass. Call [`reclaim`](Self::reclaim) first for
    /// an exact live count.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Identifiers held by tracked entries, ascending.
    pub fn live_idents(&self) -> Vec<Ident> {
        let state = self.inner.lock();
        let mut idents: Vec<Ident> = state.entries.values().map(|e| e.ident).collect();
        idents.sort_unstable();
        idents
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.inner.lock();
        RegistrySnapshot {
            live: state.entries.len(),
            free: state.free.to_sorted_vec(),
            high_water: state.high_water,
            allocated_total: state.allocated_total,
            reclaimed_total: state.reclaimed_total,
            reclaim_passes: state.reclaim_passes,
        }
    }
}

impl Default for IdentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("IdentRegistry")
            .field("live", &state.entries.len())
            .field("free", &state.free.len())
            .field("high_water", &state.high_water)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn manual() -> IdentRegistry {
        IdentRegistry::with_config(RegistryConfig {
            reclaim_interval: 0,
            ..Default::default()
        })
    }

    #[test]
    fn walkthrough_reuses_smallest_then_extends() {
        init_tracing();
        let reg = IdentRegistry::new();
        let a = Arc::new("a");
        let b = Arc::new("b");
        let c = Arc::new("c");
        assert_eq!(reg.get_ident(&a).unwrap().as_usize(), 0);
        assert_eq!(reg.get_ident(&b).unwrap().as_usize(), 1);
        assert_eq!(reg.get_ident(&c).unwrap().as_usize(), 2);
        assert_eq!(reg.size(), 3);

        drop(b);
        assert_eq!(reg.reclaim(), 1);
        assert_eq!(reg.size(), 2);
        assert_eq!(reg.free_count(), 1);

        let d = Arc::new("d");
        assert_eq!(reg.get_ident(&d).unwrap().as_usize(), 1);
        assert_eq!(reg.size(), 3);

        let e = Arc::new("e");
        assert_eq!(reg.get_ident(&e).unwrap().as_usize(), 3);
        assert_eq!(reg.get_ident(&a).unwrap().as_usize(), 0);
        assert_eq!(reg.size(), 4);
    }

    #[test]
    fn same_object_keeps_its_ident() {
        let reg = IdentRegistry::new();
        let a = Arc::new(1u64);
        let first = reg.get_ident(&a).unwrap();
        for _ in 0..10 {
            assert_eq!(reg.get_ident(&a).unwrap(), first);
            assert_eq!(reg.get_ident(&a.clone()).unwrap(), first);
        }
        assert_eq!(reg.get_ident(&Arc::downgrade(&a)).unwrap(), first);
        assert_eq!(reg.size(), 1);
    }

    #[test]
    fn reuse_order_is_numeric_not_release_order() {
        let reg = manual();
        let mut objs: Vec<Option<Arc<usize>>> = (0..6).map(|i| Some(Arc::new(i))).collect();
        for obj in objs.iter().flatten() {
            reg.get_ident(obj).unwrap();
        }

        // free 4 first, then 1, then 3
        for idx in [4, 1, 3] {
            objs[idx] = None;
        }
        assert_eq!(reg.reclaim(), 3);

        let fresh: Vec<Arc<usize>> = (0..4).map(Arc::new).collect();
        let idents: Vec<usize> = fresh
            .iter()
            .map(|o| reg.get_ident(o).unwrap().into())
            .collect();
        assert_eq!(idents, vec![1, 3, 4, 6]);
    }

    #[test]
    fn automatic_pass_runs_before_allocation() {
        let reg = IdentRegistry::new();
        let a = Arc::new(());
        let b = Arc::new(());
        reg.get_ident(&a).unwrap();
        reg.get_ident(&b).unwrap();
        drop(a);
        // Dead entry still counted until a pass runs
        assert_eq!(reg.size(), 2);

        let c = Arc::new(());
        assert_eq!(reg.get_ident(&c).unwrap().as_usize(), 0);
        assert_eq!(reg.size(), 2);
    }

    #[test]
    fn disabled_interval_keeps_dead_entries_until_reclaim() {
        let reg = manual();
        let a = Arc::new(0u8);
        reg.get_ident(&a).unwrap();
        drop(a);

        let b = Arc::new(1u8);
        assert_eq!(reg.get_ident(&b).unwrap().as_usize(), 1);
        assert_eq!(reg.size(), 2);
        assert_eq!(reg.reclaim(), 1);
        assert_eq!(reg.live_idents(), vec![Ident::new(1)]);
        assert_eq!(reg.snapshot().free, vec![Ident::new(0)]);
    }

    #[test]
    fn interval_batches_reclamation() {
        let reg = IdentRegistry::with_config(RegistryConfig {
            reclaim_interval: 3,
            ..Default::default()
        });
        let a = Arc::new(0u8);
        reg.get_ident(&a).unwrap(); // 1st allocation
        drop(a);
        let b = Arc::new(1u8);
        assert_eq!(reg.get_ident(&b).unwrap().as_usize(), 1); // 2nd, no pass yet
        let c = Arc::new(2u8);
        // 3rd allocation triggers the pass first, so 0 is reused
        assert_eq!(reg.get_ident(&c).unwrap().as_usize(), 0);
    }

    #[test]
    fn registry_does_not_keep_objects_alive() {
        struct Task<'a>(&'a AtomicUsize);
        impl Drop for Task<'_> {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        static DROPS: AtomicUsize = AtomicUsize::new(0);
        let reg = manual();
        let task = Arc::new(Task(&DROPS));
        reg.get_ident(&task).unwrap();
        assert_eq!(Arc::strong_count(&task), 1);
        drop(task);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        // Entry lingers until reclaimed, but the object is gone
        assert_eq!(reg.size(), 1);
        assert_eq!(reg.reclaim(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn dead_weak_is_rejected() {
        let reg = IdentRegistry::new();
        let err = reg.get_ident(&Weak::<u32>::new()).unwrap_err();
        assert!(matches!(err, IdentError::Untrackable(_)));
        assert!(reg.lookup(&Weak::<u32>::new()).is_err());
        assert_eq!(reg.size(), 0);
        assert_eq!(reg.snapshot().allocated_total, 0);
    }

    #[test]
    fn lookup_does_not_allocate() {
        let reg = IdentRegistry::new();
        let a = Arc::new(7i32);
        assert_eq!(reg.lookup(&a).unwrap(), None);
        assert!(reg.is_empty());
        let ident = reg.get_ident(&a).unwrap();
        assert_eq!(reg.lookup(&a).unwrap(), Some(ident));
    }

    #[test]
    fn each_entry_is_reclaimed_once() {
        let reg = manual();
        let a = Arc::new(0u16);
        reg.get_ident(&a).unwrap();
        drop(a);
        assert_eq!(reg.reclaim(), 1);
        assert_eq!(reg.reclaim(), 0);
        let snap = reg.snapshot();
        assert_eq!(snap.free, vec![Ident::new(0)]);
        assert_eq!(snap.reclaimed_total, 1);
    }

    #[test]
    fn clones_share_state() {
        let reg = IdentRegistry::new();
        let other = reg.clone();
        let a = Arc::new(1u8);
        let ident = reg.get_ident(&a).unwrap();
        assert_eq!(other.lookup(&a).unwrap(), Some(ident));
        assert_eq!(other.size(), 1);
    }

    #[test]
    fn snapshot_tracks_totals() {
        let reg = IdentRegistry::new();
        let objs: Vec<Arc<u8>> = (0..3).map(Arc::new).collect();
        for o in &objs {
            reg.get_ident(o).unwrap();
        }
        drop(objs);
        reg.reclaim();
        let snap = reg.snapshot();
        assert_eq!(snap.live, 0);
        assert_eq!(snap.high_water, 3);
        assert_eq!(snap.allocated_total, 3);
        assert_eq!(snap.reclaimed_total, 3);
        assert_eq!(snap.free.len(), 3);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["free"], serde_json::json!([0, 1, 2]));
    }

    #[test]
    fn automatic_passes_are_spaced_by_map_size() {
        let reg = IdentRegistry::new();
        let objs: Vec<Arc<usize>> = (0..20_000).map(Arc::new).collect();
        for (i, obj) in objs.iter().enumerate() {
            assert_eq!(reg.get_ident(obj).unwrap().as_usize(), i);
        }
        // Geometric spacing: roughly log(n) / log(1.25) passes, not one per allocation
        let passes = reg.snapshot().reclaim_passes;
        assert!(passes < 100, "{} passes for 20000 allocations", passes);
    }

    #[test]
    fn spaced_passes_still_reuse_freed_idents() {
        let reg = IdentRegistry::new();
        let mut objs: Vec<Arc<usize>> = (0..1_000).map(Arc::new).collect();
        for obj in &objs {
            reg.get_ident(obj).unwrap();
        }
        objs.truncate(500);

        let fresh: Vec<Arc<usize>> = (0..1_000).map(Arc::new).collect();
        for obj in &fresh {
            reg.get_ident(obj).unwrap();
        }
        // Every freed identifier was picked up by a later pass and reissued
        let snap = reg.snapshot();
        assert!(snap.reclaimed_total >= 500);
        assert!(snap.high_water < 2_000);
        drop(objs);
        drop(fresh);
    }

    #[test]
    fn large_pass_frees_everything_once() {
        let reg = manual();
        let objs: Vec<Arc<usize>> = (0..20_000).map(Arc::new).collect();
        for obj in &objs {
            reg.get_ident(obj).unwrap();
        }
        drop(objs);
        assert_eq!(reg.reclaim(), 20_000);
        assert_eq!(reg.free_count(), 20_000);
        assert!(reg.is_empty());
        assert_eq!(reg.reclaim(), 0);
    }

    #[test]
    fn debug_output_summarizes_counts() {
        let reg = IdentRegistry::new();
        let a = Arc::new(());
        reg.get_ident(&a).unwrap();
        let text = format!("{:?}", reg);
        assert!(text.contains("live: 1"));
        assert!(text.contains("free: 0"));
    }
}
