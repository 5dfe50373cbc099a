use std::cell::Cell;
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicPtr;

use crate::order_hash::OrderId;

/// Low bit of a `next` link: set once the owning node is logically deleted.
const DELETED: usize = 1;

// Node structure with careful memory layout optimization
#[repr(C, align(64))] // Align to cache line boundaries
pub(crate) struct Node<T> {
    // Frequently accessed data in the first cache line
    pub(crate) id: OrderId,
    // Successor in the bucket chain, tagged with DELETED. Frozen once tagged.
    pub(crate) next: AtomicPtr<Node<T>>,
    // Retirement bookkeeping, only touched by the thread that retired the node
    pub(crate) retired_epoch: Cell<usize>,
    pub(crate) retired_next: Cell<*mut Node<T>>,
    pub(crate) payload: T,
}

impl<T> Node<T> {
    pub(crate) fn new(id: OrderId, payload: T) -> Self {
        Node {
            id,
            next: AtomicPtr::new(ptr::null_mut()),
            retired_epoch: Cell::new(0),
            retired_next: Cell::new(ptr::null_mut()),
            payload,
        }
    }
}

#[inline]
pub(crate) fn is_deleted<T>(link: *mut Node<T>) -> bool {
    link.addr() & DELETED != 0
}

#[inline]
pub(crate) fn mark_deleted<T>(link: *mut Node<T>) -> *mut Node<T> {
    link.map_addr(|addr| addr | DELETED)
}

#[inline]
pub(crate) fn unmarked<T>(link: *mut Node<T>) -> *mut Node<T> {
    link.map_addr(|addr| addr & !DELETED)
}

/// A node that a successful unlink CAS has detached from its bucket chain.
///
/// Only the thread whose CAS removed the node holds one of these, and the
/// only way to consume it is to hand it to
/// [`EpochManager::defer_free`](crate::epoch_manager::EpochManager::defer_free).
pub(crate) struct Unlinked<T>(NonNull<Node<T>>);

impl<T> Unlinked<T> {
    /// # Safety
    ///
    /// `node` must have just been removed from its chain by a CAS performed by
    /// the caller, and must not have been retired before.
    pub(crate) unsafe fn new(node: NonNull<Node<T>>) -> Self {
        Unlinked(node)
    }

    pub(crate) fn into_raw(self) -> NonNull<Node<T>> {
        self.0
    }
}
