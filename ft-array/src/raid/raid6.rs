// vim: tw=80

//! RAID6: rotating P/Q parity across chunks, recovered with a Cauchy-matrix
//! erasure codec.

use std::sync::Arc;

use crate::buffer::{BufferEntry, FtWriteEntry, LogicalWriteEntry};
use crate::buffer_pool::{BufferInfo, BufferPool};
use crate::codec::Codec;
use crate::config::BLOCK_SIZE_BYTE;
use crate::device::{DeviceState, RaidState};
use crate::error::Error;
use crate::geometry::{FtBlockAddress, FtSize, StripeId};
use crate::numa::{HugepageAllocator, NumaTopology};
use crate::raid::{FtEntry, LogicalEntry, RaidMethod};
use crate::Result;

const PARITY_CNT: u32 = 2;
const MIN_DEVS: u32 = 4;

pub struct Raid6 {
    ft_size: FtSize,
    chunk_cnt: u32,
    data_cnt: u32,
    chunk_size: usize,
    codec: Codec,
    parity_pools: Vec<Arc<BufferPool>>,
    parity_buffer_cnt_per_numa: usize,
    allocator: Arc<dyn HugepageAllocator>,
    topology: Arc<dyn NumaTopology>,
}

impl Raid6 {
    pub fn new(
        blks_per_chunk: u32,
        chunks_per_stripe: u32,
        parity_buffer_cnt_per_numa: usize,
        allocator: Arc<dyn HugepageAllocator>,
        topology: Arc<dyn NumaTopology>,
    ) -> Self {
        let ft_size = FtSize::new(blks_per_chunk, chunks_per_stripe, PARITY_CNT);
        let data_cnt = chunks_per_stripe - PARITY_CNT;
        let chunk_size = BLOCK_SIZE_BYTE as usize * blks_per_chunk as usize;
        let codec = Codec::new(data_cnt as usize, PARITY_CNT as usize);
        Raid6 {
            ft_size,
            chunk_cnt: chunks_per_stripe,
            data_cnt,
            chunk_size,
            codec,
            parity_pools: Vec::new(),
            parity_buffer_cnt_per_numa,
            allocator,
            topology,
        }
    }

    /// `[pIndex, qIndex]` for the given stripe: parity rotates by one chunk
    /// position per stripe, with Q always immediately following P (wrapping
    /// modulo the chunk count).
    fn parity_offset(&self, stripe_id: StripeId) -> [u32; 2] {
        let p_offset = stripe_id + self.data_cnt;
        let q_offset = p_offset + 1;
        [p_offset % self.chunk_cnt, q_offset % self.chunk_cnt]
    }

    fn alloc_chunk(&mut self) -> Result<BufferEntry> {
        if self.parity_pools.is_empty() && self.parity_buffer_cnt_per_numa > 0 {
            log::warn!(
                "Raid6: reallocating parity pools lazily, req_buffers_per_numa:{}",
                self.parity_buffer_cnt_per_numa
            );
            if !self.alloc_parity_pools(self.parity_buffer_cnt_per_numa) {
                log::error!(
                    "Raid6: failed to allocate parity pools, required:{}",
                    self.parity_buffer_cnt_per_numa
                );
            }
        }
        let numa = self.topology.current_numa_id() as usize;
        let pool = self
            .parity_pools
            .get(numa)
            .ok_or(Error::BufferPoolEmpty)?
            .clone();
        let ptr = pool.try_get().ok_or(Error::BufferPoolEmpty)?;
        let mut buf = unsafe { BufferEntry::new(ptr, self.ft_size.blks_per_chunk, true) };
        buf.set_buffer_pool(pool);
        Ok(buf)
    }
}

impl RaidMethod for Raid6 {
    fn ft_size(&self) -> FtSize {
        self.ft_size
    }

    fn translate(&self, entry: &LogicalEntry) -> Vec<FtEntry> {
        let [p_idx, q_idx] = self.parity_offset(entry.addr.stripe_id);
        let blks_per_chunk = self.ft_size.blks_per_chunk as u64;
        let start_offset = entry.addr.offset;
        let last_offset = start_offset + entry.blk_cnt - 1;
        let first_idx = (start_offset / blks_per_chunk) as u32;
        let last_idx = (last_offset / blks_per_chunk) as u32;

        let mut fe = FtEntry {
            addr: FtBlockAddress { stripe_id: entry.addr.stripe_id, offset: start_offset },
            blk_cnt: entry.blk_cnt,
        };

        // P and Q adjacent with Q wrapped to the front of the stripe: the
        // whole data range shifts by one parity-chunk's worth of blocks.
        let is_pq_separated = q_idx == 0;
        if is_pq_separated {
            fe.addr.offset += blks_per_chunk;
            vec![fe]
        } else {
            let p_parity_offset = p_idx as u64 * blks_per_chunk;
            let parity_size = blks_per_chunk * 2;
            if p_idx <= first_idx {
                fe.addr.offset += parity_size;
                vec![fe]
            } else if first_idx < p_idx && p_idx <= last_idx {
                let first_blk_cnt = p_parity_offset - start_offset;
                let first = FtEntry { addr: fe.addr, blk_cnt: first_blk_cnt };
                let second = FtEntry {
                    addr: FtBlockAddress {
                        stripe_id: entry.addr.stripe_id,
                        offset: p_parity_offset + parity_size,
                    },
                    blk_cnt: entry.blk_cnt - first_blk_cnt,
                };
                vec![first, second]
            } else {
                vec![fe]
            }
        }
    }

    fn convert(&self, src: LogicalWriteEntry) -> Result<Vec<FtWriteEntry>> {
        let entry = LogicalEntry { addr: src.addr, blk_cnt: src.blk_cnt };
        let ft_entries = self.translate(&entry);
        match ft_entries.len() {
            1 => Ok(vec![FtWriteEntry {
                addr: ft_entries[0].addr,
                blk_cnt: ft_entries[0].blk_cnt,
                buffers: src.buffers,
            }]),
            2 => {
                if src.buffers.len() != 1 {
                    return Err(Error::ArrayFailure);
                }
                let (first_buf, second_buf) =
                    src.buffers[0].split_at(ft_entries[0].blk_cnt as u32);
                Ok(vec![
                    FtWriteEntry {
                        addr: ft_entries[0].addr,
                        blk_cnt: ft_entries[0].blk_cnt,
                        buffers: vec![first_buf],
                    },
                    FtWriteEntry {
                        addr: ft_entries[1].addr,
                        blk_cnt: ft_entries[1].blk_cnt,
                        buffers: vec![second_buf],
                    },
                ])
            }
            _ => unreachable!("Translate always returns one or two entries"),
        }
    }

    fn make_parity(&mut self, src: &LogicalWriteEntry) -> Result<Vec<FtWriteEntry>> {
        if src.buffers.len() != self.data_cnt as usize {
            return Err(Error::ArrayFailure);
        }
        let [p_idx, q_idx] = self.parity_offset(src.addr.stripe_id);
        let blks_per_chunk = self.ft_size.blks_per_chunk as u64;

        let mut p_buf = self.alloc_chunk()?;
        let mut q_buf = self.alloc_chunk()?;

        let sources: Vec<&[u8]> = src.buffers.iter().map(|b| b.as_slice()).collect();
        {
            let mut dests: Vec<&mut [u8]> = vec![p_buf.as_mut_slice(), q_buf.as_mut_slice()];
            self.codec.encode(&sources, &mut dests);
        }

        Ok(vec![
            FtWriteEntry {
                addr: FtBlockAddress {
                    stripe_id: src.addr.stripe_id,
                    offset: p_idx as u64 * blks_per_chunk,
                },
                blk_cnt: blks_per_chunk,
                buffers: vec![p_buf],
            },
            FtWriteEntry {
                addr: FtBlockAddress {
                    stripe_id: src.addr.stripe_id,
                    offset: q_idx as u64 * blks_per_chunk,
                },
                blk_cnt: blks_per_chunk,
                buffers: vec![q_buf],
            },
        ])
    }

    fn get_rebuild_group(&self, fba: FtBlockAddress, devs: &[DeviceState]) -> Vec<FtBlockAddress> {
        let blks_per_chunk = self.ft_size.blks_per_chunk as u64;
        let offset_in_chunk = fba.offset % blks_per_chunk;
        let chunk_index = (fba.offset / blks_per_chunk) as u32;

        (0..self.ft_size.chunks_per_stripe)
            .filter(|&i| {
                i != chunk_index
                    && devs.get(i as usize).map(|d| d.is_normal()).unwrap_or(false)
            })
            .map(|i| FtBlockAddress {
                stripe_id: fba.stripe_id,
                offset: offset_in_chunk + i as u64 * blks_per_chunk,
            })
            .collect()
    }

    fn raid_state(&self, devs: &[DeviceState]) -> RaidState {
        let abnormal = devs.iter().filter(|d| !d.is_normal()).count();
        log::info!("Raid6::raid_state, abnormal cnt:{}", abnormal);
        match abnormal {
            0 => RaidState::Normal,
            1 | 2 => RaidState::Degraded,
            _ => RaidState::Failure,
        }
    }

    fn check_num_of_devs_to_configure(&self, num_devs: u32) -> bool {
        num_devs >= MIN_DEVS
    }

    fn alloc_parity_pools(&mut self, max_buffer_cnt_per_numa: usize) -> bool {
        let numa_count = self.topology.numa_count();
        let mut pools = Vec::with_capacity(numa_count as usize);
        for numa in 0..numa_count {
            let info = BufferInfo {
                owner: format!("Raid6_NUMA_{}", numa),
                block_size: self.chunk_size,
                count: max_buffer_cnt_per_numa,
            };
            let pool = BufferPool::new(info, numa, self.allocator.clone());
            if !pool.is_allocated() {
                log::error!("Raid6: parity pool allocation failed on numa {}", numa);
                return false;
            }
            log::debug!("Raid6: parity pool created, {}", pool.owner());
            pools.push(pool);
        }
        self.parity_pools = pools;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LogicalBlockAddress;
    use crate::numa::{HeapAllocator, SingleNuma};

    fn raid6(blks_per_chunk: u32, chunks_per_stripe: u32) -> Raid6 {
        Raid6::new(
            blks_per_chunk,
            chunks_per_stripe,
            4,
            Arc::new(HeapAllocator),
            Arc::new(SingleNuma),
        )
    }

    // Scenario 1 from the translate invariant table: adjacent P/Q, no shift
    // into the data range.
    #[test]
    fn translate_scenario_stripe_zero_single_entry() {
        let r = raid6(64, 4);
        assert_eq!(r.parity_offset(0), [2, 3]);
        let entry =
            LogicalEntry { addr: LogicalBlockAddress { stripe_id: 0, offset: 0 }, blk_cnt: 128 };
        let ft = r.translate(&entry);
        assert_eq!(ft.len(), 1);
        assert_eq!(ft[0].addr.offset, 0);
        assert_eq!(ft[0].blk_cnt, 128);
    }

    // Scenario 2: Q wrapped to chunk 0 ("separated" branch), unconditional
    // one-chunk shift, never a split.
    #[test]
    fn translate_scenario_q_separated_shifts_unconditionally() {
        let r = raid6(64, 4);
        assert_eq!(r.parity_offset(2), [0, 1]);
        let entry =
            LogicalEntry { addr: LogicalBlockAddress { stripe_id: 2, offset: 0 }, blk_cnt: 128 };
        let ft = r.translate(&entry);
        assert_eq!(ft.len(), 1);
        assert_eq!(ft[0].addr.offset, 128);
        assert_eq!(ft[0].blk_cnt, 128);
    }

    // Scenario 3: P falls inside the requested range, split in two around it.
    #[test]
    fn translate_scenario_splits_around_parity() {
        let r = raid6(64, 4);
        assert_eq!(r.parity_offset(3), [1, 2]);
        let entry =
            LogicalEntry { addr: LogicalBlockAddress { stripe_id: 3, offset: 0 }, blk_cnt: 128 };
        let ft = r.translate(&entry);
        assert_eq!(ft.len(), 2);
        assert_eq!((ft[0].addr.offset, ft[0].blk_cnt), (0, 64));
        assert_eq!((ft[1].addr.offset, ft[1].blk_cnt), (192, 64));
    }

    #[test]
    fn raid_state_monotonicity() {
        let r = raid6(64, 4);
        let normal = [DeviceState::Normal; 4];
        assert_eq!(r.raid_state(&normal), RaidState::Normal);
        let one_bad = [DeviceState::Fault, DeviceState::Normal, DeviceState::Normal, DeviceState::Normal];
        assert_eq!(r.raid_state(&one_bad), RaidState::Degraded);
        let two_bad = [DeviceState::Fault, DeviceState::Fault, DeviceState::Normal, DeviceState::Normal];
        assert_eq!(r.raid_state(&two_bad), RaidState::Degraded);
        let three_bad = [DeviceState::Fault, DeviceState::Fault, DeviceState::Fault, DeviceState::Normal];
        assert_eq!(r.raid_state(&three_bad), RaidState::Failure);
    }

    #[test]
    fn min_devs_to_configure_is_four() {
        let r = raid6(64, 4);
        assert!(!r.check_num_of_devs_to_configure(3));
        assert!(r.check_num_of_devs_to_configure(4));
    }

    #[test]
    fn get_rebuild_group_excludes_self_and_abnormal_devices() {
        let r = raid6(64, 4);
        let devs =
            vec![DeviceState::Normal, DeviceState::Fault, DeviceState::Normal, DeviceState::Normal];
        let fba = FtBlockAddress { stripe_id: 9, offset: 1 * 64 }; // chunk index 1, the faulty one
        let group = r.get_rebuild_group(fba, &devs);
        let indices: Vec<u32> = group.iter().map(|a| (a.offset / 64) as u32).collect();
        assert_eq!(indices, vec![0, 2, 3]);
    }

    #[test]
    fn make_parity_then_rebuild_recovers_erased_data_chunk() {
        let mut r = raid6(4, 4);
        assert!(r.alloc_parity_pools(4));

        let chunk_blks = 4u32;
        let chunk_bytes = chunk_blks as usize * BLOCK_SIZE_BYTE as usize;
        let mut d0 = vec![0xABu8; chunk_bytes];
        let mut d1 = vec![0xCDu8; chunk_bytes];
        let buf0 = unsafe { BufferEntry::new(d0.as_mut_ptr(), chunk_blks, false) };
        let buf1 = unsafe { BufferEntry::new(d1.as_mut_ptr(), chunk_blks, false) };
        let src = LogicalWriteEntry {
            addr: LogicalBlockAddress { stripe_id: 0, offset: 0 },
            blk_cnt: (chunk_blks * 2) as u64,
            buffers: vec![buf0, buf1],
        };
        let parity = r.make_parity(&src).unwrap();
        assert_eq!(parity.len(), 2);
        let p = parity[0].buffers[0].as_slice().to_vec();

        // Erase data chunk 0 (codec row 0); rebuild it from any `data_cnt`
        // surviving codec rows, here data1 (row 1) and P (row 2).
        let survivor_idx = [1usize, 2];
        let survivors: Vec<&[u8]> = vec![&d1, &p];
        let mut rebuilt = vec![0u8; chunk_bytes];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut rebuilt];
            r.codec.rebuild(&survivor_idx, &survivors, &[0], &mut dests).unwrap();
        }
        assert_eq!(rebuilt, d0);
    }

    // Scenario 5: a wider stripe (10 data + P + Q) with two data chunks
    // erased at once, rebuilt from the ten surviving codec rows.
    #[test]
    fn make_parity_then_rebuild_recovers_two_erased_data_chunks() {
        let mut r = raid6(64, 12);
        assert!(r.alloc_parity_pools(4));

        let chunk_blks = 64u32;
        let chunk_bytes = chunk_blks as usize * BLOCK_SIZE_BYTE as usize;
        let mut data: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i + 1; chunk_bytes]).collect();
        let bufs: Vec<BufferEntry> = data
            .iter_mut()
            .map(|d| unsafe { BufferEntry::new(d.as_mut_ptr(), chunk_blks, false) })
            .collect();
        let src = LogicalWriteEntry {
            addr: LogicalBlockAddress { stripe_id: 0, offset: 0 },
            blk_cnt: (chunk_blks * 10) as u64,
            buffers: bufs,
        };
        let parity = r.make_parity(&src).unwrap();
        let p = parity[0].buffers[0].as_slice().to_vec();
        let q = parity[1].buffers[0].as_slice().to_vec();

        // Codec rows: 0..10 data, 10 = P, 11 = Q. Erase rows 0 and 1;
        // survive on the other eight data rows plus P and Q.
        let survivor_idx: Vec<usize> = vec![2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        let survivors: Vec<&[u8]> = vec![
            &data[2], &data[3], &data[4], &data[5], &data[6], &data[7], &data[8], &data[9], &p, &q,
        ];
        let mut rebuilt0 = vec![0xffu8; chunk_bytes];
        let mut rebuilt1 = vec![0xffu8; chunk_bytes];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut rebuilt0, &mut rebuilt1];
            r.codec.rebuild(&survivor_idx, &survivors, &[0, 1], &mut dests).unwrap();
        }
        assert_eq!(rebuilt0, vec![1u8; chunk_bytes]);
        assert_eq!(rebuilt1, vec![2u8; chunk_bytes]);
    }
}
