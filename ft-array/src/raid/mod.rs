// vim: tw=80

//! RAID methods: the polymorphic capability set that turns logical block
//! ranges into fault-tolerant ones, and back.
//!
//! Dispatch over RAID kind is static, not a trait object: a partition picks
//! its method once at construction and never switches, so [`AnyRaidMethod`]
//! is a closed enum rather than a `dyn RaidMethod`.

pub mod raid0;
pub mod raid6;

use crate::buffer::{FtWriteEntry, LogicalWriteEntry};
use crate::device::{DeviceState, RaidState};
use crate::geometry::{FtBlockAddress, FtSize, LogicalBlockAddress};
use crate::numa::HugepageAllocator;
use crate::Result;
use std::sync::Arc;

pub use raid0::Raid0;
pub use raid6::Raid6;

/// A logical block range, addressed with parity chunks invisible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalEntry {
    pub addr: LogicalBlockAddress,
    pub blk_cnt: u64,
}

/// A fault-tolerant block range, addressed with parity chunks in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtEntry {
    pub addr: FtBlockAddress,
    pub blk_cnt: u64,
}

/// The shared capability set of every RAID kind.
pub trait RaidMethod {
    fn ft_size(&self) -> FtSize;

    /// Map a logical range to one or two FT ranges, skipping parity chunks.
    fn translate(&self, entry: &LogicalEntry) -> Vec<FtEntry>;

    /// Attach a write's data buffers to the FT range(s) `translate` would
    /// produce for the same logical range.
    fn convert(&self, src: LogicalWriteEntry) -> Result<Vec<FtWriteEntry>>;

    /// Compute parity chunks for a full-stripe data write, returning one
    /// `FtWriteEntry` per parity chunk. Empty for RAID kinds with no
    /// redundancy.
    fn make_parity(&mut self, src: &LogicalWriteEntry) -> Result<Vec<FtWriteEntry>>;

    /// The survivor set for rebuilding the chunk at `fba`: every other
    /// chunk position of the same stripe whose device is currently normal.
    fn get_rebuild_group(&self, fba: FtBlockAddress, devs: &[DeviceState]) -> Vec<FtBlockAddress>;

    fn raid_state(&self, devs: &[DeviceState]) -> RaidState;

    fn check_num_of_devs_to_configure(&self, num_devs: u32) -> bool;

    /// (Re)allocate the NUMA-local parity buffer pools, `max_buffer_cnt_per_numa`
    /// buffers each. No-op (always succeeds) for RAID kinds with no parity.
    fn alloc_parity_pools(&mut self, max_buffer_cnt_per_numa: usize) -> bool;
}

/// A RAID method chosen once per partition at construction.
pub enum AnyRaidMethod {
    Raid0(Raid0),
    Raid6(Raid6),
}

impl RaidMethod for AnyRaidMethod {
    fn ft_size(&self) -> FtSize {
        match self {
            AnyRaidMethod::Raid0(r) => r.ft_size(),
            AnyRaidMethod::Raid6(r) => r.ft_size(),
        }
    }

    fn translate(&self, entry: &LogicalEntry) -> Vec<FtEntry> {
        match self {
            AnyRaidMethod::Raid0(r) => r.translate(entry),
            AnyRaidMethod::Raid6(r) => r.translate(entry),
        }
    }

    fn convert(&self, src: LogicalWriteEntry) -> Result<Vec<FtWriteEntry>> {
        match self {
            AnyRaidMethod::Raid0(r) => r.convert(src),
            AnyRaidMethod::Raid6(r) => r.convert(src),
        }
    }

    fn make_parity(&mut self, src: &LogicalWriteEntry) -> Result<Vec<FtWriteEntry>> {
        match self {
            AnyRaidMethod::Raid0(r) => r.make_parity(src),
            AnyRaidMethod::Raid6(r) => r.make_parity(src),
        }
    }

    fn get_rebuild_group(&self, fba: FtBlockAddress, devs: &[DeviceState]) -> Vec<FtBlockAddress> {
        match self {
            AnyRaidMethod::Raid0(r) => r.get_rebuild_group(fba, devs),
            AnyRaidMethod::Raid6(r) => r.get_rebuild_group(fba, devs),
        }
    }

    fn raid_state(&self, devs: &[DeviceState]) -> RaidState {
        match self {
            AnyRaidMethod::Raid0(r) => r.raid_state(devs),
            AnyRaidMethod::Raid6(r) => r.raid_state(devs),
        }
    }

    fn check_num_of_devs_to_configure(&self, num_devs: u32) -> bool {
        match self {
            AnyRaidMethod::Raid0(r) => r.check_num_of_devs_to_configure(num_devs),
            AnyRaidMethod::Raid6(r) => r.check_num_of_devs_to_configure(num_devs),
        }
    }

    fn alloc_parity_pools(&mut self, max_buffer_cnt_per_numa: usize) -> bool {
        match self {
            AnyRaidMethod::Raid0(r) => r.alloc_parity_pools(max_buffer_cnt_per_numa),
            AnyRaidMethod::Raid6(r) => r.alloc_parity_pools(max_buffer_cnt_per_numa),
        }
    }
}

/// Identifies which external collaborators a RAID method needs. Used only
/// as a re-export convenience for callers assembling a method.
pub type Allocator = Arc<dyn HugepageAllocator>;
