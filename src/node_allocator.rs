use std::{
    alloc::{Layout, alloc, dealloc, handle_alloc_error},
    cell::RefCell,
    marker::PhantomData,
    ptr::{self, NonNull},
};

use thread_local::ThreadLocal;

use crate::{CACHE_LINE_SIZE, node::Node, order_hash::OrderId};

// Blocks of freed node storage owned by one thread
struct NodePool {
    blocks: Vec<NonNull<u8>>,
}

// The blocks are uninitialised memory nobody else points to.
unsafe impl Send for NodePool {}

/// Memory manager for [`Node`] allocation.
///
/// Every node occupies a cache-line-aligned block. Freed blocks are kept in a
/// per-thread pool (up to `pool_limit` of them) and handed back out by the
/// next `allocate` on that thread, so a steady stream of short-lived orders
/// stops touching the global allocator.
pub struct NodeAllocator<T> {
    layout: Layout,
    pool_limit: usize,
    pools: ThreadLocal<RefCell<NodePool>>,
    _marker: PhantomData<T>,
}

impl<T> NodeAllocator<T> {
    pub fn new(pool_limit: usize) -> Self {
        NodeAllocator {
            layout: node_layout::<T>(),
            pool_limit,
            pools: ThreadLocal::new(),
            _marker: PhantomData,
        }
    }

    /// Layout of one node block.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Number of recycled blocks waiting in the calling thread's pool.
    pub fn pooled(&self) -> usize {
        self.pool().borrow().blocks.len()
    }

    /// Allocate and initialise a node, reusing a pooled block when there is one.
    ///
    /// Allocation failure is fatal and goes through [`handle_alloc_error`].
    pub(crate) fn allocate(&self, id: OrderId, payload: T) -> NonNull<Node<T>> {
        let recycled = self.pool().borrow_mut().blocks.pop();
        let node = recycled.unwrap_or_else(|| self.fresh_block()).cast::<Node<T>>();

        unsafe { node.as_ptr().write(Node::new(id, payload)) };

        node
    }

    /// Drop the node's contents and give its block back.
    ///
    /// # Safety
    ///
    /// `node` must come from this allocator, be fully initialised, and be
    /// unreachable by every other thread.
    pub(crate) unsafe fn free(&self, node: NonNull<Node<T>>) {
        unsafe { ptr::drop_in_place(node.as_ptr()) };

        let block = node.cast::<u8>();
        let mut pool = self.pool().borrow_mut();
        if pool.blocks.len() < self.pool_limit {
            pool.blocks.push(block);
        } else {
            drop(pool);
            unsafe { dealloc(block.as_ptr(), self.layout) }
        }
    }

    fn pool(&self) -> &RefCell<NodePool> {
        self.pools.get_or(|| {
            RefCell::new(NodePool {
                blocks: Vec::with_capacity(self.pool_limit),
            })
        })
    }

    fn fresh_block(&self) -> NonNull<u8> {
        let ptr = unsafe { alloc(self.layout) };
        NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(self.layout))
    }
}

impl<T> Drop for NodeAllocator<T> {
    fn drop(&mut self) {
        let layout = self.layout;
        for pool in self.pools.iter_mut() {
            for block in pool.get_mut().blocks.drain(..) {
                unsafe { dealloc(block.as_ptr(), layout) }
            }
        }
    }
}

fn node_layout<T>() -> Layout {
    let natural = Layout::new::<Node<T>>();

    // Round up to the detected cache line, never below the type's own alignment
    Layout::from_size_align(natural.size(), natural.align().max(*CACHE_LINE_SIZE))
        .map(|layout| layout.pad_to_align())
        .unwrap_or(natural)
}
