// vim: tw=80

//! NUMA-local slab allocator for fixed-size blocks.
//!
//! Hands out hugepage-backed blocks to the requesting thread's NUMA
//! socket with near-zero contention: a consumer list that `try_get` pops
//! from, and a producer list that `return_buffer` pushes to, separated so
//! the common case of "get one, use it, return it later from a different
//! thread" never needs the same lock on both ends. When the consumer list
//! runs dry, the two lists are swapped — but only once the producer list
//! has built up past `swap_size`, so a pool under heavy churn doesn't
//! thrash swapping one buffer at a time.

use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::SWAP_THRESHOLD_PERCENT;
use crate::numa::HugepageAllocator;

#[derive(Debug, Clone)]
pub struct BufferInfo {
    /// A tracing tag, e.g. `"Raid6_NUMA_0"`.
    pub owner: String,
    pub block_size: usize,
    pub count: usize,
}

pub struct BufferPool {
    info: BufferInfo,
    socket: u32,
    consumer: Mutex<VecDeque<*mut u8>>,
    producer: Mutex<VecDeque<*mut u8>>,
    swap_size: usize,
    allocations: Vec<*mut u8>,
    allocator: Arc<dyn HugepageAllocator>,
    allocated: AtomicBool,
}

// Every pointer in this pool came from `HugepageAllocator`, whose
// contract requires it to be safe to hand across threads.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Build a pool of `info.count` blocks of `info.block_size` bytes
    /// each, backed by hugepages from `socket`. If the allocator cannot
    /// satisfy the request, the pool is still returned but marked
    /// un-allocated: every `try_get` will return `None` and callers must
    /// have a fallback or fail the I/O.
    pub fn new(info: BufferInfo, socket: u32, allocator: Arc<dyn HugepageAllocator>) -> Arc<Self> {
        let page_size = allocator.default_page_size();
        let alloc_count = if page_size < info.block_size {
            info.block_size.div_ceil(page_size)
        } else {
            1
        };
        let alloc_size = page_size;

        let mut consumer = VecDeque::with_capacity(info.count);
        let mut allocations = Vec::new();
        let mut remaining_in_chunk = 0usize;
        let mut cursor: *mut u8 = ptr::null_mut();
        let mut allocated_ok = true;

        for _ in 0..info.count {
            if remaining_in_chunk == 0 {
                let buf = allocator.alloc_from_socket(alloc_size, alloc_count, socket);
                if buf.is_null() {
                    log::warn!(
                        "BufferPool {}: hugepage allocation failed, pool left un-allocated",
                        info.owner
                    );
                    allocated_ok = false;
                    break;
                }
                allocations.push(buf);
                remaining_in_chunk = alloc_size * alloc_count / info.block_size;
                cursor = buf;
            }
            consumer.push_back(cursor);
            cursor = unsafe { cursor.add(info.block_size) };
            remaining_in_chunk -= 1;
        }

        if !allocated_ok {
            for &a in &allocations {
                unsafe { allocator.free(a) };
            }
            allocations.clear();
            consumer.clear();
        }

        let swap_size = consumer.len() * SWAP_THRESHOLD_PERCENT as usize / 100;
        log::info!(
            "BufferPool {} initialized, size:{}, swap_size:{}",
            info.owner,
            consumer.len(),
            swap_size
        );

        Arc::new(BufferPool {
            info,
            socket,
            consumer: Mutex::new(consumer),
            producer: Mutex::new(VecDeque::new()),
            swap_size,
            allocations,
            allocator,
            allocated: AtomicBool::new(allocated_ok),
        })
    }

    /// Take one block, or `None` if the consumer list is empty and the
    /// producer list hasn't yet built up past the swap threshold. Never
    /// blocks waiting for a `return_buffer`.
    pub fn try_get(&self) -> Option<*mut u8> {
        let mut consumer = self.consumer.lock().unwrap();
        if consumer.is_empty() {
            let mut producer = self.producer.lock().unwrap();
            if producer.len() > self.swap_size {
                std::mem::swap(&mut *consumer, &mut *producer);
                log::info!(
                    "BufferPool {} swapped, size:{}",
                    self.info.owner,
                    consumer.len()
                );
            } else {
                return None;
            }
        }
        consumer.pop_front()
    }

    /// Return a block for reuse. Safe to call from any thread, including
    /// one that never called `try_get` on this pool.
    pub fn return_buffer(&self, ptr: *mut u8) {
        self.producer.lock().unwrap().push_back(ptr);
    }

    pub fn owner(&self) -> &str {
        &self.info.owner
    }

    pub fn socket(&self) -> u32 {
        self.socket
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn block_size(&self) -> usize {
        self.info.block_size
    }

    /// `(consumer, producer)` list lengths. For tests only: in production
    /// code the two counts are stale the instant they're read.
    pub fn queue_lengths(&self) -> (usize, usize) {
        (
            self.consumer.lock().unwrap().len(),
            self.producer.lock().unwrap().len(),
        )
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let mut consumer = self.consumer.lock().unwrap();
        let mut producer = self.producer.lock().unwrap();
        consumer.clear();
        producer.clear();
        for &a in &self.allocations {
            unsafe { self.allocator.free(a) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numa::{FailingAllocator, HeapAllocator};

    fn make_pool(count: usize, block_size: usize) -> Arc<BufferPool> {
        let info = BufferInfo { owner: "test".to_string(), block_size, count };
        BufferPool::new(info, 0, Arc::new(HeapAllocator))
    }

    #[test]
    fn drains_exactly_count_buffers() {
        let pool = make_pool(16, 4096);
        let mut got = Vec::new();
        while let Some(p) = pool.try_get() {
            got.push(p);
        }
        assert_eq!(got.len(), 16);
        assert!(pool.try_get().is_none());
    }

    #[test]
    fn swap_scenario_from_spec() {
        // count=1000, swap threshold 20% -> swap_size = 200.
        let pool = make_pool(1000, 4096);
        while pool.try_get().is_some() {}
        assert!(pool.try_get().is_none());

        for _ in 0..200 {
            pool.return_buffer(0x1000 as *mut u8);
        }
        assert!(
            pool.try_get().is_none(),
            "producer len == swap_size must not trigger a swap"
        );

        pool.return_buffer(0x2000 as *mut u8);
        assert!(
            pool.try_get().is_some(),
            "producer len > swap_size must trigger a swap"
        );
    }

    #[test]
    fn conservation_at_quiescence() {
        let pool = make_pool(32, 4096);
        let mut outstanding = Vec::new();
        for _ in 0..10 {
            outstanding.push(pool.try_get().unwrap());
        }
        for p in outstanding.drain(..5) {
            pool.return_buffer(p);
        }
        let (c, p) = pool.queue_lengths();
        let outstanding_cnt = 5;
        assert_eq!(c + p + outstanding_cnt, 32);
    }

    #[test]
    fn failing_allocator_leaves_pool_unallocated() {
        let info = BufferInfo { owner: "test".to_string(), block_size: 4096, count: 4 };
        let pool = BufferPool::new(info, 0, Arc::new(FailingAllocator));
        assert!(!pool.is_allocated());
        assert!(pool.try_get().is_none());
    }
}
