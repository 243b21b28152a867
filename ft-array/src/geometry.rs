// vim: tw=80

//! Pure functions and value types for stripe/chunk/block arithmetic.
//!
//! Nothing in this module touches I/O, locks, or collaborators: every
//! operation here is a total function of its inputs, which is what makes
//! the RAID6 placement arithmetic in [`crate::raid::raid6`] testable
//! without any harness.

/// Monotonically increasing identifier of a stripe within a partition.
pub type StripeId = u32;

/// An offset, in logical blocks, within some addressing scheme (the
/// meaning of "block 0" depends on whether it's a `LogicalBlockAddress`
/// or an `FtBlockAddress`).
pub type BlockOffset = u64;

/// A block address in the logical address space: stripe + offset, with
/// parity chunks invisible. Only data is ever addressed this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalBlockAddress {
    pub stripe_id: StripeId,
    pub offset: BlockOffset,
}

/// A block address in the fault-tolerant address space: stripe + offset,
/// where the offset includes parity chunk slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FtBlockAddress {
    pub stripe_id: StripeId,
    pub offset: BlockOffset,
}

/// A physical address on one member device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalBlockAddress<Dev> {
    pub device: Dev,
    pub lba: u64,
}

/// The fault-tolerant geometry of one RAID method instance.
///
/// Invariants (checked in [`FtSize::new`], violation is a construction-time
/// panic since it means the caller passed an internally inconsistent
/// geometry, not a runtime failure):
/// - `blks_per_stripe == blks_per_chunk * chunks_per_stripe`
/// - `backup_blk_cnt == parity_cnt * blks_per_chunk`
/// - `min_write_blk_cnt == blks_per_stripe - backup_blk_cnt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtSize {
    pub min_write_blk_cnt: u64,
    pub backup_blk_cnt: u64,
    pub blks_per_chunk: u32,
    pub blks_per_stripe: u64,
    pub chunks_per_stripe: u32,
}

impl FtSize {
    /// Build the geometry for a RAID method with `parity_cnt` parity
    /// chunks per stripe (0 for RAID0, 2 for RAID6).
    pub fn new(blks_per_chunk: u32, chunks_per_stripe: u32, parity_cnt: u32) -> Self {
        let blks_per_stripe = blks_per_chunk as u64 * chunks_per_stripe as u64;
        let backup_blk_cnt = parity_cnt as u64 * blks_per_chunk as u64;
        assert!(
            backup_blk_cnt <= blks_per_stripe,
            "parity cannot consume more blocks than the stripe holds"
        );
        FtSize {
            min_write_blk_cnt: blks_per_stripe - backup_blk_cnt,
            backup_blk_cnt,
            blks_per_chunk,
            blks_per_stripe,
            chunks_per_stripe,
        }
    }

    pub fn data_chunk_cnt(&self, parity_cnt: u32) -> u32 {
        self.chunks_per_stripe - parity_cnt
    }
}
