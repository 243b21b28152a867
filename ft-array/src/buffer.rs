// vim: tw=80

//! The buffer and write-entry types shared by every addressing scheme.

use std::slice;
use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::config::BLOCK_SIZE_BYTE;
use crate::geometry::{FtBlockAddress, LogicalBlockAddress, PhysicalBlockAddress};

/// A borrowed view over one contiguous run of blocks.
///
/// `BufferEntry` never owns hugepage memory directly: the bytes it points
/// to live either in a [`BufferPool`] allocation (in which case `pool` is
/// set and the buffer is returned to that pool on drop) or in a caller-
/// supplied region that outlives the `BufferEntry` (e.g. a client payload;
/// `pool` is `None` and drop is a no-op).
///
/// # Safety
/// The constructor is unsafe because `BufferEntry` does not itself prove
/// that `ptr` is valid for `blk_cnt * BLOCK_SIZE_BYTE` bytes for the
/// entry's whole lifetime — that invariant is established by whoever
/// hands out the pointer (a `BufferPool` allocation, or a client buffer
/// kept alive by the caller).
pub struct BufferEntry {
    ptr: *mut u8,
    blk_cnt: u32,
    is_parity: bool,
    pool: Option<Arc<BufferPool>>,
}

// `BufferEntry` is handed across the read -> recover -> write pipeline,
// which may run its continuations on whichever thread the I/O dispatcher
// completes on.
unsafe impl Send for BufferEntry {}

impl BufferEntry {
    /// # Safety
    /// `ptr` must be valid for reads and writes of `blk_cnt *
    /// BLOCK_SIZE_BYTE` bytes for as long as the returned `BufferEntry`
    /// (and anything it's cloned/copied from) is alive.
    pub unsafe fn new(ptr: *mut u8, blk_cnt: u32, is_parity: bool) -> Self {
        BufferEntry { ptr, blk_cnt, is_parity, pool: None }
    }

    /// Attach the pool this buffer should be returned to on drop.
    pub fn set_buffer_pool(&mut self, pool: Arc<BufferPool>) {
        self.pool = Some(pool);
    }

    pub fn block_count(&self) -> u32 {
        self.blk_cnt
    }

    pub fn is_parity(&self) -> bool {
        self.is_parity
    }

    pub fn byte_len(&self) -> usize {
        self.blk_cnt as usize * BLOCK_SIZE_BYTE as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.byte_len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.byte_len()) }
    }

    /// Split a caller-owned view into two adjacent sub-views at
    /// `first_blk_cnt` blocks. Only valid for buffers with no attached
    /// pool: a pool-owned buffer must be returned through the single
    /// `BufferEntry` its pool handed out, never through two independent
    /// halves, or it would be returned twice.
    pub fn split_at(&self, first_blk_cnt: u32) -> (BufferEntry, BufferEntry) {
        assert!(self.pool.is_none(), "cannot split a pool-owned buffer");
        assert!(first_blk_cnt <= self.blk_cnt);
        let first_len = first_blk_cnt as usize * BLOCK_SIZE_BYTE as usize;
        let second_ptr = unsafe { self.ptr.add(first_len) };
        (
            unsafe { BufferEntry::new(self.ptr, first_blk_cnt, self.is_parity) },
            unsafe {
                BufferEntry::new(second_ptr, self.blk_cnt - first_blk_cnt, self.is_parity)
            },
        )
    }
}

impl Drop for BufferEntry {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.return_buffer(self.ptr);
        }
    }
}

/// A write request addressed in some coordinate system `Addr`, spanning
/// `blk_cnt` blocks across an ordered sequence of buffers. Invariant: the
/// sum of `buffers[i].block_count()` equals `blk_cnt`.
pub struct WriteEntry<Addr> {
    pub addr: Addr,
    pub blk_cnt: u64,
    pub buffers: Vec<BufferEntry>,
}

impl<Addr> WriteEntry<Addr> {
    pub fn total_buffer_blocks(&self) -> u64 {
        self.buffers.iter().map(|b| b.block_count() as u64).sum()
    }

    pub fn check_invariant(&self) -> bool {
        self.total_buffer_blocks() == self.blk_cnt
    }
}

pub type LogicalWriteEntry = WriteEntry<LogicalBlockAddress>;
pub type FtWriteEntry = WriteEntry<FtBlockAddress>;
pub type PhysicalWriteEntry<Dev> = WriteEntry<PhysicalBlockAddress<Dev>>;
