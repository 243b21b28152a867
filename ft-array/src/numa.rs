// vim: tw=80

//! The hugepage/NUMA allocator interface.
//!
//! The real allocator (DPDK-backed in the original, `libnuma`-backed in a
//! native port) lives outside this crate; [`BufferPool`](crate::BufferPool)
//! only ever sees it through this trait.

/// Provides aligned, socket-local raw memory to [`crate::BufferPool`].
/// Implementations must be `Send + Sync`: a pool may be constructed on one
/// thread and used from any thread in its NUMA domain.
pub trait HugepageAllocator: Send + Sync {
    /// Allocate `count` pages of `size` bytes each from `socket`,
    /// returning a pointer to `count * size` contiguous bytes, or null on
    /// failure.
    fn alloc_from_socket(&self, size: usize, count: usize, socket: u32) -> *mut u8;

    /// Free a region previously returned by `alloc_from_socket`.
    ///
    /// # Safety
    /// `ptr` must have been returned by this same allocator's
    /// `alloc_from_socket` and not freed already.
    unsafe fn free(&self, ptr: *mut u8);

    /// The platform's default hugepage size, in bytes (e.g. 2 MiB).
    fn default_page_size(&self) -> usize;
}

/// A [`HugepageAllocator`] backed by the process heap, for tests and for
/// platforms with no real hugepage support. Pretends every allocation is
/// socket-local; `default_page_size` reports 2 MiB to match the common
/// real-world default cited in [`crate::buffer_pool`]'s docs.
#[derive(Debug, Default)]
pub struct HeapAllocator;

impl HugepageAllocator for HeapAllocator {
    fn alloc_from_socket(&self, size: usize, count: usize, _socket: u32) -> *mut u8 {
        let total = size * count;
        if total == 0 {
            return std::ptr::null_mut();
        }
        let layout = std::alloc::Layout::from_size_align(total, 64)
            .expect("buffer pool allocation size/align must be valid");
        unsafe { std::alloc::alloc_zeroed(layout) }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // We don't track the original layout per-pointer here; real
        // hugepage allocators identify the mapping by address alone
        // (munmap-style), which is what this mirrors. Tests that exercise
        // `HeapAllocator` use pool sizes small enough that leaking the
        // heap allocation (rather than guessing a layout to pass to
        // `dealloc`) is an acceptable trade for staying within safe
        // arithmetic.
        let _ = ptr;
    }

    fn default_page_size(&self) -> usize {
        2 * 1024 * 1024
    }
}

/// The NUMA topology as seen by the calling thread: how many sockets exist,
/// and which one the current thread is pinned to. Stands in for the
/// teacher's affinity-manager collaborator without pulling in a real
/// `libnuma` binding.
pub trait NumaTopology: Send + Sync {
    fn numa_count(&self) -> u32;
    fn current_numa_id(&self) -> u32;
}

/// A single-socket topology, for tests and for platforms where NUMA
/// placement doesn't matter.
#[derive(Debug, Default)]
pub struct SingleNuma;

impl NumaTopology for SingleNuma {
    fn numa_count(&self) -> u32 {
        1
    }

    fn current_numa_id(&self) -> u32 {
        0
    }
}

/// A [`HugepageAllocator`] that always fails, for exercising the
/// un-allocated-pool path.
#[derive(Debug, Default)]
pub struct FailingAllocator;

impl HugepageAllocator for FailingAllocator {
    fn alloc_from_socket(&self, _size: usize, _count: usize, _socket: u32) -> *mut u8 {
        std::ptr::null_mut()
    }

    unsafe fn free(&self, _ptr: *mut u8) {}

    fn default_page_size(&self) -> usize {
        2 * 1024 * 1024
    }
}
