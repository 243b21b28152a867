// vim: tw=80

//! RAID0: identity geometry, no redundancy.

use crate::buffer::{FtWriteEntry, LogicalWriteEntry};
use crate::config::MIN_WRITE_BLOCK_COUNT;
use crate::device::{DeviceState, RaidState};
use crate::geometry::{FtBlockAddress, FtSize};
use crate::raid::{FtEntry, LogicalEntry, RaidMethod};
use crate::Result;

pub struct Raid0 {
    ft_size: FtSize,
}

impl Raid0 {
    pub fn new(blks_per_chunk: u32, chunks_per_stripe: u32) -> Self {
        let mut ft_size = FtSize::new(blks_per_chunk, chunks_per_stripe, 0);
        // RAID0 has no parity to reserve a formula's worth of blocks for;
        // the minimum write size is a fixed configuration constant instead
        // of the RAID6 "stripe minus backup" derivation.
        ft_size.min_write_blk_cnt = MIN_WRITE_BLOCK_COUNT;
        Raid0 { ft_size }
    }
}

impl RaidMethod for Raid0 {
    fn ft_size(&self) -> FtSize {
        self.ft_size
    }

    fn translate(&self, entry: &LogicalEntry) -> Vec<FtEntry> {
        vec![FtEntry {
            addr: FtBlockAddress { stripe_id: entry.addr.stripe_id, offset: entry.addr.offset },
            blk_cnt: entry.blk_cnt,
        }]
    }

    fn convert(&self, src: LogicalWriteEntry) -> Result<Vec<FtWriteEntry>> {
        Ok(vec![FtWriteEntry {
            addr: FtBlockAddress { stripe_id: src.addr.stripe_id, offset: 0 },
            blk_cnt: src.blk_cnt,
            buffers: src.buffers,
        }])
    }

    fn make_parity(&mut self, _src: &LogicalWriteEntry) -> Result<Vec<FtWriteEntry>> {
        Ok(Vec::new())
    }

    fn get_rebuild_group(&self, _fba: FtBlockAddress, _devs: &[DeviceState]) -> Vec<FtBlockAddress> {
        Vec::new()
    }

    fn raid_state(&self, devs: &[DeviceState]) -> RaidState {
        if devs.iter().all(|d| d.is_normal()) {
            RaidState::Normal
        } else {
            RaidState::Failure
        }
    }

    fn check_num_of_devs_to_configure(&self, num_devs: u32) -> bool {
        num_devs >= 1
    }

    fn alloc_parity_pools(&mut self, _max_buffer_cnt_per_numa: usize) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceState;
    use crate::geometry::LogicalBlockAddress;

    #[test]
    fn translate_is_identity() {
        let r = Raid0::new(64, 4);
        let entry = LogicalEntry {
            addr: LogicalBlockAddress { stripe_id: 7, offset: 12 },
            blk_cnt: 50,
        };
        let ft = r.translate(&entry);
        assert_eq!(ft.len(), 1);
        assert_eq!(ft[0].addr.stripe_id, 7);
        assert_eq!(ft[0].addr.offset, 12);
        assert_eq!(ft[0].blk_cnt, 50);
    }

    #[test]
    fn convert_places_payload_at_ft_offset_zero() {
        let r = Raid0::new(64, 4);
        let mut backing = vec![0u8; 4096 * 4];
        let ptr = backing.as_mut_ptr();
        let buf = unsafe { crate::BufferEntry::new(ptr, 4, false) };
        let src = LogicalWriteEntry {
            addr: LogicalBlockAddress { stripe_id: 3, offset: 10 },
            blk_cnt: 4,
            buffers: vec![buf],
        };
        let out = r.convert(src).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr.stripe_id, 3);
        assert_eq!(out[0].addr.offset, 0);
    }

    #[test]
    fn raid_state_has_no_degraded_tier() {
        let r = Raid0::new(64, 4);
        assert_eq!(r.raid_state(&[DeviceState::Normal, DeviceState::Normal]), RaidState::Normal);
        assert_eq!(r.raid_state(&[DeviceState::Normal, DeviceState::Fault]), RaidState::Failure);
    }
}
