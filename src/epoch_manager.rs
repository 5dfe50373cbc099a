use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering, fence};

use thread_local::ThreadLocal;

use crate::config::{DEFAULT_COLLECT_THRESHOLD, DEFAULT_POOL_LIMIT};
use crate::node::{Node, Unlinked};
use crate::node_allocator::NodeAllocator;

const PINNED: usize = 1;

// Global epoch counter
pub struct GlobalEpoch {
    epoch: AtomicUsize,
}

// Thread-local epoch tracker
#[derive(Default)]
pub struct LocalEpoch {
    // (epoch << 1) | PINNED inside a critical section, 0 outside
    state: AtomicUsize,
    // Live guards on the owning thread; nobody else reads it
    pins: AtomicUsize,
}

impl LocalEpoch {
    pub fn is_pinned(&self) -> bool {
        self.state.load(Ordering::Acquire) & PINNED != 0
    }

    /// Epoch this thread is pinned at, if it is pinned.
    pub fn pinned_epoch(&self) -> Option<usize> {
        let state = self.state.load(Ordering::Acquire);
        (state & PINNED != 0).then_some(state >> 1)
    }
}

// Thread-local garbage list, linked through Node::retired_next
pub(crate) struct GarbageList<T> {
    pub(crate) head: *mut Node<T>,
    pub(crate) size: usize,
}

unsafe impl<T: Send> Send for GarbageList<T> {}

impl<T> Default for GarbageList<T> {
    fn default() -> Self {
        GarbageList {
            head: ptr::null_mut(),
            size: 0,
        }
    }
}

/// RAII critical section. Nodes reachable while a guard is alive are not freed
/// until the guard is dropped.
///
/// Guards nest; only the outermost one publishes and clears the pin.
pub struct Guard<'a> {
    global: &'a GlobalEpoch,
    local: &'a LocalEpoch,
    // Pins are per thread
    _not_send: PhantomData<*mut ()>,
}

impl Guard<'_> {
    pub fn local(&self) -> &LocalEpoch {
        self.local
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        if self.local.pins.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.local.state.store(0, Ordering::Release);
        }
    }
}

/// Epoch-based reclamation manager.
///
/// A node unlinked while the global epoch is `e` is freed once the epoch has
/// reached `e + 2`. The epoch only moves from `e` to `e + 1` when every pinned
/// thread is pinned at `e`, so by then no thread that could still hold the
/// node is inside a critical section.
pub struct EpochManager<T: Send> {
    global: GlobalEpoch,
    locals: ThreadLocal<LocalEpoch>,
    garbage: ThreadLocal<RefCell<GarbageList<T>>>,
    node_allocator: NodeAllocator<T>,
    collect_threshold: usize,
}

impl<T: Send> Default for EpochManager<T> {
    fn default() -> Self {
        EpochManager::new(DEFAULT_COLLECT_THRESHOLD, DEFAULT_POOL_LIMIT)
    }
}

impl<T: Send> EpochManager<T> {
    pub fn new(collect_threshold: usize, pool_limit: usize) -> Self {
        EpochManager {
            global: GlobalEpoch {
                epoch: AtomicUsize::new(0),
            },
            locals: ThreadLocal::new(),
            garbage: ThreadLocal::new(),
            node_allocator: NodeAllocator::new(pool_limit),
            collect_threshold: collect_threshold.max(1),
        }
    }

    pub fn epoch(&self) -> usize {
        self.global.epoch.load(Ordering::Acquire)
    }

    pub fn allocator(&self) -> &NodeAllocator<T> {
        &self.node_allocator
    }

    /// Enter a critical section on the calling thread. The thread registers
    /// itself on first use.
    pub fn pin(&self) -> Guard<'_> {
        let local = self.locals.get_or(LocalEpoch::default);

        if local.pins.fetch_add(1, Ordering::Relaxed) == 0 {
            let epoch = self.global.epoch.load(Ordering::SeqCst);
            local.state.store((epoch << 1) | PINNED, Ordering::SeqCst);
            // Publish the pin before any link is read
            fence(Ordering::SeqCst);
        }

        Guard {
            global: &self.global,
            local,
            _not_send: PhantomData,
        }
    }

    /// Whether `guard` was handed out by this manager.
    pub fn owns(&self, guard: &Guard<'_>) -> bool {
        ptr::eq(guard.global, &self.global)
    }

    /// Try to advance the global epoch.
    pub fn try_advance(&self) -> bool {
        let current = self.global.epoch.load(Ordering::SeqCst);
        fence(Ordering::SeqCst);

        // Every pinned thread must already have observed the current epoch
        for local in self.locals.iter() {
            let state = local.state.load(Ordering::SeqCst);
            if state & PINNED != 0 && state >> 1 != current {
                return false;
            }
        }

        let advanced = self
            .global
            .epoch
            .compare_exchange(
                current,
                current.wrapping_add(1),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_ok();

        if advanced {
            tracing::trace!(epoch = current.wrapping_add(1), "advanced global epoch");
        }

        advanced
    }

    /// Add an unlinked node to the calling thread's garbage list.
    ///
    /// Once the list holds `collect_threshold` nodes the thread tries to move
    /// the epoch forward and frees whatever has become safe.
    pub(crate) fn defer_free(&self, node: Unlinked<T>, guard: &Guard<'_>) {
        debug_assert!(self.owns(guard));

        let node = node.into_raw();

        // The retire epoch must be read after the unlink
        fence(Ordering::SeqCst);
        let epoch = self.global.epoch.load(Ordering::SeqCst);

        let garbage = self.garbage.get_or(Default::default);
        let pending = {
            let mut list = garbage.borrow_mut();
            unsafe {
                node.as_ref().retired_epoch.set(epoch);
                node.as_ref().retired_next.set(list.head);
            }
            list.head = node.as_ptr();
            list.size += 1;
            list.size
        };

        if pending >= self.collect_threshold {
            self.try_advance();
            self.collect(garbage);
        }
    }

    /// Advance the epoch as far as the other threads allow, then free the
    /// calling thread's retired nodes that are safe. Returns how many were
    /// freed.
    pub fn try_reclaim(&self) -> usize {
        // Two steps cover everything retired up to now
        if self.try_advance() {
            self.try_advance();
        }

        match self.garbage.get() {
            Some(garbage) => self.collect(garbage),
            None => 0,
        }
    }

    /// Nodes retired by the calling thread that are still waiting.
    pub fn pending(&self) -> usize {
        self.garbage
            .get()
            .map(|garbage| garbage.borrow().size)
            .unwrap_or(0)
    }

    // Free entries of `garbage` whose grace period is over.
    //
    // Expired nodes leave the list before any payload is dropped, and no
    // borrow is held while they are freed. A payload drop may retire more
    // nodes on this thread, and a panicking one leaks the rest of the batch.
    fn collect(&self, garbage: &RefCell<GarbageList<T>>) -> usize {
        let current = self.global.epoch.load(Ordering::SeqCst);

        let mut expired = ptr::null_mut();
        let mut freed = 0;

        {
            let mut list = garbage.borrow_mut();
            let mut current_node = list.head;
            let mut kept = ptr::null_mut();

            while let Some(node) = NonNull::new(current_node) {
                let node_ref = unsafe { node.as_ref() };
                current_node = node_ref.retired_next.get();

                if current.wrapping_sub(node_ref.retired_epoch.get()) >= 2 {
                    node_ref.retired_next.set(expired);
                    expired = node.as_ptr();
                    freed += 1;
                } else {
                    node_ref.retired_next.set(kept);
                    kept = node.as_ptr();
                }
            }

            list.head = kept;
            list.size -= freed;

            if freed > 0 {
                tracing::trace!(freed, kept = list.size, epoch = current, "reclaimed retired nodes");
            }
        }

        while let Some(node) = NonNull::new(expired) {
            expired = unsafe { node.as_ref().retired_next.get() };
            unsafe { self.node_allocator.free(node) };
        }

        freed
    }
}

impl<T: Send> Drop for EpochManager<T> {
    fn drop(&mut self) {
        // No guard can outlive the manager, so every retired node is unreachable
        for garbage in self.garbage.iter_mut() {
            let list = garbage.get_mut();
            let mut current = list.head;

            while let Some(node) = NonNull::new(current) {
                current = unsafe { node.as_ref().retired_next.get() };
                unsafe { self.node_allocator.free(node) };
            }

            list.head = ptr::null_mut();
            list.size = 0;
        }
    }
}
