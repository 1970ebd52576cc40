//! Chunk memory providers.
//!
//! Storage never talks to the global allocator directly. Every chunk block is
//! reserved from, and released to, a `ChunkAllocator`.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::error::{Result, StoreError};

/// A source of zeroed, aligned memory blocks for chunks.
pub trait ChunkAllocator: Send + Sync {
    /// Reserve a zeroed block matching `layout`.
    fn reserve(&self, layout: Layout) -> Result<NonNull<u8>>;

    /// Release a block previously returned by `reserve`.
    ///
    /// # Safety
    /// `ptr` must come from `reserve` on this allocator with the same `layout`,
    /// and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);
}

fn allocate_zeroed(layout: Layout) -> Result<NonNull<u8>> {
    if layout.size() == 0 {
        return Ok(dangling(layout));
    }

    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    NonNull::new(ptr).ok_or(StoreError::AllocationFailed {
        size: layout.size(),
        align: layout.align(),
    })
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // An aligned, non-null address which is never dereferenced.
    unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
}

/// Reserves every block straight from the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl ChunkAllocator for HeapAllocator {
    fn reserve(&self, layout: Layout) -> Result<NonNull<u8>> {
        allocate_zeroed(layout)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

struct Page(NonNull<u8>);

// Pages sitting in the free list are owned by nobody else.
unsafe impl Send for Page {}

/// Keeps released blocks around and hands them out again.
///
/// One lock-free free list is kept per distinct layout.
#[derive(Default)]
pub struct PooledAllocator {
    free_lists: Mutex<HashMap<Layout, Arc<SegQueue<Page>>>>,
    live: AtomicUsize,
    pooled: AtomicUsize,
}

impl PooledAllocator {
    /// Create an empty pool.
    pub fn new() -> PooledAllocator {
        PooledAllocator::default()
    }

    fn free_list(&self, layout: Layout) -> Arc<SegQueue<Page>> {
        self.free_lists.lock().entry(layout).or_default().clone()
    }

    /// Return the number of blocks currently handed out.
    pub fn live_pages(&self) -> usize {
        self.live.load(atomic::Ordering::Relaxed)
    }

    /// Return the number of released blocks waiting to be reused.
    pub fn pooled_pages(&self) -> usize {
        self.pooled.load(atomic::Ordering::Relaxed)
    }

    /// Return every pooled block to the global allocator.
    pub fn flush(&self) {
        let free_lists = self.free_lists.lock();
        for (layout, queue) in free_lists.iter() {
            while let Some(page) = queue.pop() {
                unsafe { alloc::dealloc(page.0.as_ptr(), *layout) };
                self.pooled.fetch_sub(1, atomic::Ordering::Relaxed);
            }
        }
    }
}

impl ChunkAllocator for PooledAllocator {
    fn reserve(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }

        let ptr = match self.free_list(layout).pop() {
            Some(Page(ptr)) => {
                self.pooled.fetch_sub(1, atomic::Ordering::Relaxed);
                unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, layout.size()) };
                ptr
            }
            None => allocate_zeroed(layout)?,
        };

        self.live.fetch_add(1, atomic::Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        self.free_list(layout).push(Page(ptr));
        self.live.fetch_sub(1, atomic::Ordering::Relaxed);
        self.pooled.fetch_add(1, atomic::Ordering::Relaxed);
    }
}

impl Drop for PooledAllocator {
    fn drop(&mut self) {
        self.flush()
    }
}
