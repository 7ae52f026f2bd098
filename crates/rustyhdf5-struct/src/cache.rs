//! Bounded cache of materialized leaf payloads.
//!
//! The [`LeafCache`] is an arena of slots keyed by [`LeafId`]. Every
//! [`LazyLeaf`](crate::LazyLeaf) owns one slot for its lifetime. A payload
//! that fits the element budget is *tracked*: its id is pushed to the front
//! of a recency queue and its element count is added to the aggregate. When
//! the aggregate exceeds the budget, tracked payloads are evicted from the
//! back of the queue. The queue holds exactly the tracked ids.
//!
//! Thread-safe via internal `Mutex`; one process-wide instance is available
//! through [`LeafCache::global`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

use crate::array::Array;

/// Default element budget of the global cache.
pub const DEFAULT_CACHE_ELEMENTS: usize = 100_000_000;

/// Stable handle of a leaf's slot in a [`LeafCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafId(u64);

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Slot {
    payload: Option<Arc<Array>>,
    elements: usize,
    tracked: bool,
}

struct CacheInner {
    slots: HashMap<LeafId, Slot>,
    /// Most recently cached first.
    order: VecDeque<LeafId>,
    cached_elements: usize,
    budget: usize,
    next_id: u64,
}

impl CacheInner {
    fn untrack(&mut self, id: LeafId) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) if slot.tracked => {
                slot.tracked = false;
                slot.payload = None;
                self.cached_elements -= slot.elements;
                true
            }
            _ => false,
        }
    }

    fn evict_over_budget(&mut self) {
        while self.cached_elements > self.budget {
            let Some(id) = self.order.pop_back() else {
                break;
            };
            let elements = self.slots.get(&id).map_or(0, |s| s.elements);
            if self.untrack(id) {
                debug!(leaf = %id, elements, "evicted cached leaf payload");
            }
        }
    }
}

/// A bounded registry of leaf payloads.
///
/// Cloning a `LeafCache` yields another handle to the same cache.
#[derive(Clone)]
pub struct LeafCache {
    inner: Arc<Mutex<CacheInner>>,
}

static GLOBAL: OnceLock<LeafCache> = OnceLock::new();

impl LeafCache {
    /// Create an independent cache with the given element budget.
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                slots: HashMap::new(),
                order: VecDeque::new(),
                cached_elements: 0,
                budget,
                next_id: 0,
            })),
        }
    }

    /// The process-wide cache, created on first use with
    /// [`DEFAULT_CACHE_ELEMENTS`].
    pub fn global() -> LeafCache {
        GLOBAL
            .get_or_init(|| LeafCache::new(DEFAULT_CACHE_ELEMENTS))
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn budget(&self) -> usize {
        self.lock().budget
    }

    /// Change the element budget.
    ///
    /// Takes effect on the next insertion; call
    /// [`shrink_to_budget`](Self::shrink_to_budget) to evict right away.
    pub fn set_budget(&self, budget: usize) {
        self.lock().budget = budget;
    }

    /// Evict oldest payloads until the aggregate fits the current budget.
    pub fn shrink_to_budget(&self) {
        self.lock().evict_over_budget();
    }

    /// Total element count of all tracked payloads.
    pub fn cached_elements(&self) -> usize {
        self.lock().cached_elements
    }

    /// Number of tracked payloads.
    pub fn len(&self) -> usize {
        self.lock().slots.values().filter(|s| s.tracked).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every payload, including untracked oversized ones, and reset
    /// the aggregate to zero.
    pub fn clear(&self) {
        let mut inner = self.lock();
        for slot in inner.slots.values_mut() {
            slot.tracked = false;
            slot.payload = None;
        }
        inner.order.clear();
        inner.cached_elements = 0;
    }

    pub(crate) fn allocate(&self) -> LeafId {
        let mut inner = self.lock();
        let id = LeafId(inner.next_id);
        inner.next_id += 1;
        inner.slots.insert(
            id,
            Slot {
                payload: None,
                elements: 0,
                tracked: false,
            },
        );
        id
    }

    /// Drop the slot of a leaf that no longer exists.
    pub(crate) fn release(&self, id: LeafId) {
        let mut inner = self.lock();
        if let Some(slot) = inner.slots.remove(&id) {
            if slot.tracked {
                inner.cached_elements -= slot.elements;
                inner.order.retain(|&o| o != id);
            }
        }
    }

    /// Keep `payload` in the slot of `id`.
    ///
    /// A payload larger than the whole budget stays in the slot untracked.
    /// It is never counted and only [`evict`](Self::evict) or
    /// [`clear`](Self::clear) drop it.
    pub(crate) fn store(&self, id: LeafId, payload: Arc<Array>) {
        let elements = payload.len();
        let mut inner = self.lock();
        if inner.untrack(id) {
            inner.order.retain(|&o| o != id);
        }
        let budget = inner.budget;
        let Some(slot) = inner.slots.get_mut(&id) else {
            return;
        };
        slot.payload = Some(payload);
        slot.elements = elements;
        if elements > budget {
            debug!(leaf = %id, elements, budget, "payload exceeds cache budget, not tracked");
            return;
        }
        slot.tracked = true;
        inner.order.push_front(id);
        inner.cached_elements += elements;
        inner.evict_over_budget();
    }

    pub(crate) fn payload(&self, id: LeafId) -> Option<Arc<Array>> {
        self.lock().slots.get(&id).and_then(|s| s.payload.clone())
    }

    /// Drop the payload of `id`, tracked or not.
    pub(crate) fn evict(&self, id: LeafId) {
        let mut inner = self.lock();
        if inner.untrack(id) {
            inner.order.retain(|&o| o != id);
        } else if let Some(slot) = inner.slots.get_mut(&id) {
            slot.payload = None;
        }
    }

    /// Returns `true` if `id` currently holds a tracked payload.
    pub fn is_tracked(&self, id: LeafId) -> bool {
        self.lock().slots.get(&id).is_some_and(|s| s.tracked)
    }
}

impl Default for LeafCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_ELEMENTS)
    }
}

impl fmt::Debug for LeafCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("LeafCache")
            .field("slots", &inner.slots.len())
            .field("cached_elements", &inner.cached_elements)
            .field("budget", &inner.budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: usize) -> Arc<Array> {
        Arc::new(Array::from_f64(&[n], vec![0.0; n]).unwrap())
    }

    #[test]
    fn store_tracks_and_counts() {
        let cache = LeafCache::new(100);
        let a = cache.allocate();
        cache.store(a, payload(10));
        assert!(cache.is_tracked(a));
        assert_eq!(cache.cached_elements(), 10);
        assert_eq!(cache.payload(a).map(|p| p.len()), Some(10));
    }

    #[test]
    fn oldest_is_evicted_first() {
        let cache = LeafCache::new(25);
        let ids: Vec<_> = (0..3).map(|_| cache.allocate()).collect();
        for &id in &ids {
            cache.store(id, payload(10));
        }
        assert!(!cache.is_tracked(ids[0]));
        assert!(cache.payload(ids[0]).is_none());
        assert!(cache.is_tracked(ids[1]));
        assert!(cache.is_tracked(ids[2]));
        assert_eq!(cache.cached_elements(), 20);
    }

    #[test]
    fn oversized_payload_is_kept_but_untracked() {
        let cache = LeafCache::new(5);
        let id = cache.allocate();
        cache.store(id, payload(6));
        assert!(!cache.is_tracked(id));
        assert!(cache.payload(id).is_some());
        assert_eq!(cache.cached_elements(), 0);
    }

    #[test]
    fn released_ids_are_skipped() {
        let cache = LeafCache::new(20);
        let a = cache.allocate();
        let b = cache.allocate();
        let c = cache.allocate();
        cache.store(a, payload(10));
        cache.store(b, payload(10));
        cache.release(a);
        assert_eq!(cache.cached_elements(), 10);
        cache.store(c, payload(10));
        assert!(cache.is_tracked(b));
        assert!(cache.is_tracked(c));
        assert_eq!(cache.cached_elements(), 20);
    }

    #[test]
    fn released_ids_leave_the_queue() {
        let cache = LeafCache::new(1000);
        for _ in 0..500 {
            let id = cache.allocate();
            cache.store(id, payload(1));
            cache.release(id);
        }
        let inner = cache.lock();
        assert!(inner.slots.is_empty());
        assert!(inner.order.is_empty());
        assert_eq!(inner.cached_elements, 0);
    }

    #[test]
    fn clear_drops_oversized_payloads() {
        let cache = LeafCache::new(5);
        let id = cache.allocate();
        cache.store(id, payload(6));
        cache.clear();
        assert!(cache.payload(id).is_none());
    }

    #[test]
    fn restore_does_not_double_count() {
        let cache = LeafCache::new(100);
        let a = cache.allocate();
        cache.store(a, payload(10));
        cache.store(a, payload(10));
        assert_eq!(cache.cached_elements(), 10);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn budget_change_is_lazy_until_shrink() {
        let cache = LeafCache::new(100);
        let a = cache.allocate();
        let b = cache.allocate();
        cache.store(a, payload(30));
        cache.store(b, payload(30));
        cache.set_budget(40);
        assert_eq!(cache.cached_elements(), 60);
        cache.shrink_to_budget();
        assert_eq!(cache.cached_elements(), 30);
        assert!(!cache.is_tracked(a));
        assert!(cache.is_tracked(b));
    }

    #[test]
    fn evict_drops_payload() {
        let cache = LeafCache::new(100);
        let a = cache.allocate();
        cache.store(a, payload(10));
        cache.evict(a);
        assert!(cache.payload(a).is_none());
        assert_eq!(cache.cached_elements(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_resets() {
        let cache = LeafCache::new(100);
        let a = cache.allocate();
        let b = cache.allocate();
        cache.store(a, payload(10));
        cache.store(b, payload(20));
        cache.clear();
        assert_eq!(cache.cached_elements(), 0);
        assert!(cache.payload(a).is_none());
        assert!(cache.payload(b).is_none());
        assert_eq!(cache.budget(), 100);
    }

    #[test]
    fn global_is_shared() {
        let a = LeafCache::global();
        let b = LeafCache::global();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
