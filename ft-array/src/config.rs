// vim: tw=80

//! Array-wide configuration constants.
//!
//! These mirror the hardcoded constants of the original `array_config.h`:
//! a fixed block/sector geometry that every partition and buffer pool in
//! the array agrees on. They're plain `pub const`s rather than a
//! runtime-loaded config object because changing any of them changes the
//! on-disk format; [`PartitionPhysicalSize`] is the one piece that legitimately
//! varies per-partition and is therefore a real (de)serializable struct.

use serde::{Deserialize, Serialize};

/// Size in bytes of one logical block.
pub const BLOCK_SIZE_BYTE: u64 = 4096;

/// Size in bytes of one sector, the I/O dispatcher's native unit.
pub const SECTOR_SIZE_BYTE: u64 = 512;

/// Sectors per logical block.
pub const SECTORS_PER_BLOCK: u64 = BLOCK_SIZE_BYTE / SECTOR_SIZE_BYTE;

/// Default minimum write size (in blocks) for a RAID0 partition, which
/// carries no parity and so has no geometry-derived minimum.
pub const MIN_WRITE_BLOCK_COUNT: u64 = 1;

/// Percentage (of total pool size) a buffer pool's producer list must
/// exceed before `BufferPool::try_get` will perform a swap.
pub const SWAP_THRESHOLD_PERCENT: u64 = 20;

/// Default sampler interval for a [`crate::debug_info::DebugInfoProducer`]
/// that registers without an explicit timer value.
pub const DEBUG_INFO_DEFAULT_TIMER_USEC: u64 = 1_000_000;

/// The physical geometry of one stripe partition, as supplied by the
/// surrounding partition-management layer (out of scope for this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPhysicalSize {
    pub start_lba: u64,
    pub blks_per_chunk: u32,
    pub chunks_per_stripe: u32,
}
