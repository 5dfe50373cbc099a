use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::config::TableConfig;
use crate::epoch_manager::{EpochManager, Guard};
use crate::error::Result;
use crate::node::{Node, Unlinked, is_deleted, mark_deleted, unmarked};
use crate::order_hash::{OrderHasher, OrderId};

/// A fixed-capacity, lock-free map from order id to `T`.
///
/// Every bucket is a singly linked chain with an atomic head. Inserts push at
/// the head, erases mark a node's `next` link and then unlink it from its
/// predecessor, and unlinked nodes are freed by the epoch manager once no
/// reader can still see them.
///
/// ```
/// use order_table::LookupTable;
///
/// let table = LookupTable::with_capacity(1024).unwrap();
/// table.insert(100, "A");
/// table.insert(200, "B");
///
/// let guard = table.pin();
/// assert_eq!(table.find(100, &guard), Some(&"A"));
/// drop(guard);
///
/// assert!(table.erase(100));
/// assert!(!table.contains(100));
/// assert_eq!(table.get_cloned(200), Some("B"));
/// assert_eq!(table.len(), 1);
/// ```
pub struct LookupTable<T: Send> {
    buckets: Box<[AtomicPtr<Node<T>>]>,
    len: AtomicUsize,
    hasher: OrderHasher,
    epoch_manager: EpochManager<T>,
}

unsafe impl<T: Send + Sync> Send for LookupTable<T> {}
unsafe impl<T: Send + Sync> Sync for LookupTable<T> {}

impl<T: Send> Default for LookupTable<T> {
    fn default() -> Self {
        LookupTable::new()
    }
}

impl<T: Send> LookupTable<T> {
    /// Table sized for one trading day of orders.
    pub fn new() -> Self {
        LookupTable::with_config(TableConfig::default())
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let config = TableConfig::builder().capacity(capacity).build()?;
        Ok(LookupTable::with_config(config))
    }

    pub fn with_config(config: TableConfig) -> Self {
        let buckets = (0..config.capacity())
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();

        tracing::debug!(
            capacity = config.capacity(),
            collect_threshold = config.collect_threshold(),
            pool_limit = config.pool_limit(),
            "created order lookup table"
        );

        LookupTable {
            buckets,
            len: AtomicUsize::new(0),
            hasher: OrderHasher::new(config.capacity()),
            epoch_manager: EpochManager::new(config.collect_threshold(), config.pool_limit()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Live entries. Only a snapshot while other threads are writing.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enter a critical section. References handed out by [`find`](Self::find)
    /// live as long as the guard.
    pub fn pin(&self) -> Guard<'_> {
        self.epoch_manager.pin()
    }

    #[inline]
    fn bucket(&self, id: OrderId) -> &AtomicPtr<Node<T>> {
        &self.buckets[self.hasher.hash(id)]
    }

    /// Link a new entry at the head of its bucket.
    ///
    /// Duplicates are not detected; the newest entry shadows older ones.
    pub fn insert(&self, id: OrderId, payload: T) {
        let bucket = self.bucket(id);
        let node = self.epoch_manager.allocator().allocate(id, payload);

        // Counted first so erase never underflows
        self.len.fetch_add(1, Ordering::Relaxed);

        let mut head = bucket.load(Ordering::Relaxed);
        loop {
            unsafe { node.as_ref() }.next.store(head, Ordering::Relaxed);

            match bucket.compare_exchange_weak(
                head,
                node.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }
    }

    /// Payload of the newest live entry for `id`.
    ///
    /// # Panics
    ///
    /// If `guard` was pinned on a different table.
    pub fn find<'g>(&self, id: OrderId, guard: &'g Guard<'_>) -> Option<&'g T> {
        assert!(
            self.epoch_manager.owns(guard),
            "guard was pinned on a different table"
        );

        let mut current = self.bucket(id).load(Ordering::Acquire);

        while let Some(node) = unsafe { unmarked(current).as_ref() } {
            let next = node.next.load(Ordering::Acquire);

            if node.id == id && !is_deleted(next) {
                return Some(&node.payload);
            }

            current = next;
        }

        None
    }

    pub fn get_cloned(&self, id: OrderId) -> Option<T>
    where
        T: Clone,
    {
        let guard = self.pin();
        self.find(id, &guard).cloned()
    }

    pub fn contains(&self, id: OrderId) -> bool {
        let guard = self.pin();
        self.find(id, &guard).is_some()
    }

    /// Remove the newest live entry for `id`. Returns `false` if there was none.
    pub fn erase(&self, id: OrderId) -> bool {
        let bucket = self.bucket(id);
        let guard = self.pin();

        loop {
            let Some((prev, node)) = self.search(bucket, Some(id), &guard) else {
                return false;
            };
            let next = unsafe { node.as_ref() }.next.load(Ordering::Acquire);

            if is_deleted(next) {
                continue;
            }

            // Marking the link is the point the entry stops existing
            if unsafe { node.as_ref() }
                .next
                .compare_exchange(next, mark_deleted(next), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            self.len.fetch_sub(1, Ordering::Relaxed);

            match prev.compare_exchange(node.as_ptr(), next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => self
                    .epoch_manager
                    .defer_free(unsafe { Unlinked::new(node) }, &guard),
                // The predecessor moved; sweep the bucket so the node is not left behind
                Err(_) => {
                    self.search(bucket, None, &guard);
                }
            }

            return true;
        }
    }

    /// Nodes this thread has unlinked that are waiting for a grace period.
    pub fn pending_reclaim(&self) -> usize {
        self.epoch_manager.pending()
    }

    /// Push the epoch forward if no other thread holds it back and free this
    /// thread's retired nodes that became safe. Returns how many were freed.
    pub fn try_reclaim(&self) -> usize {
        self.epoch_manager.try_reclaim()
    }

    /// Walk `bucket` looking for a live node with `id`, unlinking every marked
    /// node on the way. With `id == None` the whole chain is swept.
    ///
    /// Returns the link that points at the match together with the match.
    fn search<'g>(
        &self,
        bucket: &'g AtomicPtr<Node<T>>,
        id: Option<OrderId>,
        guard: &'g Guard<'_>,
    ) -> Option<(&'g AtomicPtr<Node<T>>, NonNull<Node<T>>)> {
        'retry: loop {
            let mut prev = bucket;
            // Links reached here are never marked: buckets carry no mark and
            // we only step past nodes whose `next` was unmarked
            let mut current = prev.load(Ordering::Acquire);

            while let Some(node) = NonNull::new(current) {
                let node_ref: &'g Node<T> = unsafe { node.as_ref() };
                let next = node_ref.next.load(Ordering::Acquire);

                if is_deleted(next) {
                    let successor = unmarked(next);

                    if prev
                        .compare_exchange(current, successor, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        continue 'retry;
                    }

                    self.epoch_manager
                        .defer_free(unsafe { Unlinked::new(node) }, guard);
                    current = successor;
                    continue;
                }

                if id == Some(node_ref.id) {
                    return Some((prev, node));
                }

                prev = &node_ref.next;
                current = next;
            }

            return None;
        }
    }
}

impl<T: Send> fmt::Debug for LookupTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupTable")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("epoch", &self.epoch_manager.epoch())
            .finish()
    }
}

impl<T: Send> Drop for LookupTable<T> {
    fn drop(&mut self) {
        // Still-linked nodes (marked ones included) belong to the chains;
        // unlinked ones are in the epoch manager's garbage lists
        let allocator = self.epoch_manager.allocator();

        for bucket in self.buckets.iter_mut() {
            let mut current = *bucket.get_mut();

            while let Some(node) = NonNull::new(unmarked(current)) {
                current = unsafe { node.as_ref() }.next.load(Ordering::Relaxed);
                unsafe { allocator.free(node) };
            }
        }
    }
}
