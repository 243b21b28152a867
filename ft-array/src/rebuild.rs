// vim: tw=80

//! The N-to-M rebuild engine: read the surviving chunks of a stripe,
//! recover the missing ones through a bound codec function, write the
//! results back. Driven entirely by I/O completion callbacks so that a
//! rebuild job never blocks a thread waiting on device latency.
//!
//! Runs `Read -> ReadDone -> Recover -> RecoverDone -> Write -> WriteDone`,
//! with a fail-over branch that delegates to a backup method the first
//! time a read fails.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::BufferEntry;
use crate::buffer_pool::BufferPool;
use crate::config::{PartitionPhysicalSize, SECTORS_PER_BLOCK, SECTOR_SIZE_BYTE};
use crate::error::Error;
use crate::geometry::{PhysicalBlockAddress, StripeId};
use crate::io::{IoDispatcher, PhysicalIoUnit, RebuildDoneFn, RecoverFn};

/// Where one rebuild job currently sits in its pipeline. Exposed for tests
/// and observability; nothing internal branches on it besides `recover`'s
/// fail-over check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Idle,
    ReadIssued,
    ReadDone,
    Recover,
    RecoverDone,
    WriteIssued,
    WriteDone,
    Done,
    FailedOver,
}

struct ReadJoin {
    remaining: AtomicUsize,
    bufs: Mutex<Vec<Option<BufferEntry>>>,
    error: Mutex<Option<Error>>,
}

struct WriteJoin {
    remaining: AtomicUsize,
    error: Mutex<Option<Error>>,
}

/// One rebuild job: `src.len()` surviving chunks in, `dst.len()` recovered
/// chunks out, for a single stripe. `src`/`dst` name which devices
/// participate; the LBA each of them is read from or written to is
/// derived fresh for every `recover` call from the stripe being rebuilt,
/// not baked in at construction.
pub struct NToMRebuild<Dev> {
    owner: String,
    src: Vec<Dev>,
    dst: Vec<Dev>,
    src_buffer: Arc<BufferPool>,
    dst_buffer: Arc<BufferPool>,
    dispatcher: Arc<dyn IoDispatcher<Dev>>,
    recover_fn: RecoverFn,
    backup: Mutex<Option<Arc<NToMRebuild<Dev>>>>,
    fail_over: AtomicBool,
    phase: Mutex<RebuildPhase>,
}

/// `startLba + stripeId × blksPerChunk × SECTORS_PER_BLOCK`: the sector
/// offset every device hosting a chunk of this stripe shares, regardless
/// of which column of the stripe that device currently holds.
fn stripe_lba_sectors(stripe_id: StripeId, size: &PartitionPhysicalSize) -> u64 {
    size.start_lba + stripe_id as u64 * size.blks_per_chunk as u64 * SECTORS_PER_BLOCK
}

impl<Dev: Clone + Send + Sync + 'static> NToMRebuild<Dev> {
    pub fn new(
        owner: String,
        src: Vec<Dev>,
        dst: Vec<Dev>,
        src_buffer: Arc<BufferPool>,
        dst_buffer: Arc<BufferPool>,
        dispatcher: Arc<dyn IoDispatcher<Dev>>,
        recover_fn: RecoverFn,
    ) -> Arc<Self> {
        log::info!(
            "NToMRebuild constructor, owner:{}, src_cnt:{}, dst_cnt:{}",
            owner,
            src.len(),
            dst.len()
        );
        Arc::new(NToMRebuild {
            owner,
            src,
            dst,
            src_buffer,
            dst_buffer,
            dispatcher,
            recover_fn,
            backup: Mutex::new(None),
            fail_over: AtomicBool::new(false),
            phase: Mutex::new(RebuildPhase::Idle),
        })
    }

    pub fn set_backup_method(&self, backup: Arc<NToMRebuild<Dev>>) {
        *self.backup.lock().unwrap() = Some(backup);
    }

    pub fn is_fail_over(&self) -> bool {
        self.fail_over.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> RebuildPhase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: RebuildPhase) {
        log::debug!("{}: rebuild phase -> {:?}", self.owner, phase);
        *self.phase.lock().unwrap() = phase;
    }

    /// Once fail-over latches, it never unlatches: every subsequent
    /// `recover` on this job delegates straight to the backup without
    /// re-checking whether the backup is still usable.
    fn set_fail_over(&self) -> bool {
        let has_backup = self.backup.lock().unwrap().is_some();
        if has_backup {
            self.fail_over.store(true, Ordering::SeqCst);
        }
        has_backup
    }

    pub fn recover(
        self: Arc<Self>,
        stripe_id: StripeId,
        partition_physical_size: PartitionPhysicalSize,
        done: RebuildDoneFn,
    ) {
        if self.is_fail_over() {
            let backup = self.backup.lock().unwrap().as_ref().unwrap().clone();
            backup.recover(stripe_id, partition_physical_size, done);
            return;
        }
        let lba = stripe_lba_sectors(stripe_id, &partition_physical_size);
        log::debug!("{}: LAT_SegmentRebuildRead begin", self.owner);
        self.set_phase(RebuildPhase::ReadIssued);
        self.read(stripe_id, partition_physical_size, lba, done);
    }

    fn read(
        self: Arc<Self>,
        stripe_id: StripeId,
        partition_physical_size: PartitionPhysicalSize,
        lba: u64,
        done: RebuildDoneFn,
    ) {
        let join = Arc::new(ReadJoin {
            remaining: AtomicUsize::new(self.src.len()),
            bufs: Mutex::new((0..self.src.len()).map(|_| None).collect()),
            error: Mutex::new(None),
        });
        if self.src.is_empty() {
            self.read_done(stripe_id, partition_physical_size, join, done);
            return;
        }
        let done = Arc::new(Mutex::new(Some(done)));
        for (i, dev) in self.src.iter().enumerate() {
            let ptr = match self.src_buffer.try_get() {
                Some(p) => p,
                None => {
                    log::warn!(
                        "{}: failed to get buffer during recover read, pool empty",
                        self.src_buffer.owner()
                    );
                    *join.error.lock().unwrap() = Some(Error::BufferPoolEmpty);
                    if join.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        let done = done.lock().unwrap().take().unwrap();
                        self.read_done(stripe_id, partition_physical_size, join.clone(), done);
                    }
                    continue;
                }
            };
            let src_size_byte = self.src_buffer.block_size() as u64;
            let blk_cnt = (src_size_byte / crate::config::BLOCK_SIZE_BYTE) as u32;
            let sector_cnt = src_size_byte / SECTOR_SIZE_BYTE;
            log::debug!(
                "{}: sub-I/O src[{}] lba={} sectorCnt={}",
                self.owner,
                i,
                lba,
                sector_cnt
            );
            let buf = unsafe { BufferEntry::new(ptr, blk_cnt, false) };
            let addr = PhysicalBlockAddress { device: dev.clone(), lba };
            let unit = PhysicalIoUnit { addr, blk_cnt, buffer: buf };
            let this = self.clone();
            let join2 = join.clone();
            let done2 = done.clone();
            let phys_size = partition_physical_size;
            self.dispatcher.submit_read(
                unit,
                Box::new(move |res| match res {
                    Ok(mut buf) => {
                        buf.set_buffer_pool(this.src_buffer.clone());
                        join2.bufs.lock().unwrap()[i] = Some(buf);
                        if join2.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                            let done = done2.lock().unwrap().take().unwrap();
                            this.read_done(stripe_id, phys_size, join2.clone(), done);
                        }
                    }
                    Err(e) => {
                        *join2.error.lock().unwrap() = Some(e);
                        if join2.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                            let done = done2.lock().unwrap().take().unwrap();
                            this.read_done(stripe_id, phys_size, join2.clone(), done);
                        }
                    }
                }),
            );
        }
    }

    fn read_done(
        self: Arc<Self>,
        stripe_id: StripeId,
        partition_physical_size: PartitionPhysicalSize,
        join: Arc<ReadJoin>,
        done: RebuildDoneFn,
    ) {
        log::debug!("{}: LAT_SegmentRebuildRead end", self.owner);
        self.set_phase(RebuildPhase::ReadDone);
        if let Some(err) = *join.error.lock().unwrap() {
            log::warn!("{}: error during recover read: {}", self.owner, err);
            if self.set_fail_over() {
                self.set_phase(RebuildPhase::FailedOver);
                let backup = self.backup.lock().unwrap().as_ref().unwrap().clone();
                backup.recover(stripe_id, partition_physical_size, done);
            } else {
                done(Err(err));
            }
            return;
        }
        let bufs: Vec<BufferEntry> =
            join.bufs.lock().unwrap().iter_mut().map(|b| b.take().unwrap()).collect();
        self.recover_chunks(stripe_id, partition_physical_size, bufs, done);
    }

    fn recover_chunks(
        self: Arc<Self>,
        stripe_id: StripeId,
        partition_physical_size: PartitionPhysicalSize,
        src_bufs: Vec<BufferEntry>,
        done: RebuildDoneFn,
    ) {
        log::debug!("{}: LAT_SegmentRebuildRecover begin", self.owner);
        self.set_phase(RebuildPhase::Recover);

        let mut dst_bufs = Vec::with_capacity(self.dst.len());
        for _ in 0..self.dst.len() {
            let ptr = match self.dst_buffer.try_get() {
                Some(p) => p,
                None => {
                    log::warn!(
                        "{}: failed to get buffer during recover write, pool empty",
                        self.dst_buffer.owner()
                    );
                    done(Err(Error::BufferPoolEmpty));
                    return;
                }
            };
            let blk_cnt = (self.dst_buffer.block_size() / crate::config::BLOCK_SIZE_BYTE as usize) as u32;
            let mut buf = unsafe { BufferEntry::new(ptr, blk_cnt, false) };
            buf.set_buffer_pool(self.dst_buffer.clone());
            dst_bufs.push(buf);
        }

        let src_slices: Vec<&[u8]> = src_bufs.iter().map(|b| b.as_slice()).collect();
        let result = {
            let mut dst_slices: Vec<&mut [u8]> =
                dst_bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
            (self.recover_fn)(&src_slices, &mut dst_slices)
        };
        // src buffers return to their pool here, same as the original
        // freeing the read buffer right after the codec call consumes it.
        drop(src_bufs);

        match result {
            Ok(()) => self.recover_done(stripe_id, partition_physical_size, dst_bufs, done),
            Err(e) => {
                log::warn!("{}: error during recover: {}", self.owner, e);
                done(Err(e));
            }
        }
    }

    fn recover_done(
        self: Arc<Self>,
        stripe_id: StripeId,
        partition_physical_size: PartitionPhysicalSize,
        dst_bufs: Vec<BufferEntry>,
        done: RebuildDoneFn,
    ) {
        log::debug!("{}: LAT_SegmentRebuildRecover end", self.owner);
        self.set_phase(RebuildPhase::RecoverDone);
        let lba = stripe_lba_sectors(stripe_id, &partition_physical_size);
        self.write(lba, dst_bufs, done);
    }

    fn write(self: Arc<Self>, lba: u64, dst_bufs: Vec<BufferEntry>, done: RebuildDoneFn) {
        log::debug!("{}: LAT_SegmentRebuildWrite begin", self.owner);
        self.set_phase(RebuildPhase::WriteIssued);

        let join = Arc::new(WriteJoin {
            remaining: AtomicUsize::new(self.dst.len()),
            error: Mutex::new(None),
        });
        if self.dst.is_empty() {
            self.write_done(join, done);
            return;
        }
        let done = Arc::new(Mutex::new(Some(done)));
        for (dev, buf) in self.dst.iter().zip(dst_bufs.into_iter()) {
            let blk_cnt = buf.block_count();
            let addr = PhysicalBlockAddress { device: dev.clone(), lba };
            let unit = PhysicalIoUnit { addr, blk_cnt, buffer: buf };
            let this = self.clone();
            let join2 = join.clone();
            let done2 = done.clone();
            self.dispatcher.submit_write(
                unit,
                Box::new(move |res| {
                    if let Err(e) = res {
                        *join2.error.lock().unwrap() = Some(e);
                    }
                    if join2.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        let done = done2.lock().unwrap().take().unwrap();
                        this.write_done(join2.clone(), done);
                    }
                }),
            );
        }
    }

    fn write_done(self: Arc<Self>, join: Arc<WriteJoin>, done: RebuildDoneFn) {
        log::debug!("{}: LAT_SegmentRebuildWrite end", self.owner);
        self.set_phase(RebuildPhase::WriteDone);
        let result = match *join.error.lock().unwrap() {
            Some(e) => {
                log::warn!("{}: error during recover write: {}", self.owner, e);
                Err(e)
            }
            None => Ok(()),
        };
        self.set_phase(RebuildPhase::Done);
        done(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::InlineDispatcher;
    use crate::numa::HeapAllocator;
    use crate::buffer_pool::BufferInfo;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    fn pool(owner: &str, count: usize) -> Arc<BufferPool> {
        let info = BufferInfo { owner: owner.to_string(), block_size: 4096, count };
        BufferPool::new(info, 0, Arc::new(HeapAllocator))
    }

    /// A stripe-0 partition with `start_lba = 0`, so every sub-I/O lands
    /// at sector 0 regardless of `blks_per_chunk` -- keeps the fixed
    /// `PhysicalBlockAddress` fixtures below valid without recomputing
    /// the formula by hand in each test.
    fn physical_size() -> PartitionPhysicalSize {
        PartitionPhysicalSize { start_lba: 0, blks_per_chunk: 64, chunks_per_stripe: 12 }
    }

    fn xor_recover() -> RecoverFn {
        Box::new(|src: &[&[u8]], dst: &mut [&mut [u8]]| {
            for d in dst.iter_mut() {
                for b in d.iter_mut() {
                    *b = 0;
                }
                for s in src {
                    for (o, i) in d.iter_mut().zip(s.iter()) {
                        *o ^= i;
                    }
                }
            }
            Ok(())
        })
    }

    #[test]
    fn successful_rebuild_reaches_done() {
        let dispatcher = Arc::new(InlineDispatcher::<u32>::default());
        let job = NToMRebuild::new(
            "test".to_string(),
            vec![0u32, 1u32],
            vec![2u32],
            pool("src", 4),
            pool("dst", 4),
            dispatcher,
            xor_recover(),
        );
        let done_called = Arc::new(StdAtomicUsize::new(0));
        let dc = done_called.clone();
        job.clone().recover(0, physical_size(), Box::new(move |res| {
            assert!(res.is_ok());
            dc.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(done_called.load(Ordering::SeqCst), 1);
        assert_eq!(job.phase(), RebuildPhase::Done);
    }

    #[test]
    fn read_failure_fails_over_to_backup() {
        let dispatcher = Arc::new(InlineDispatcher::<u32>::default());
        dispatcher.fail_reads.lock().unwrap().push(PhysicalBlockAddress { device: 0u32, lba: 0 });

        let primary = NToMRebuild::new(
            "primary".to_string(),
            vec![0u32],
            vec![2u32],
            pool("src", 4),
            pool("dst", 4),
            dispatcher.clone(),
            xor_recover(),
        );
        let backup = NToMRebuild::new(
            "primary_backup".to_string(),
            vec![1u32],
            vec![2u32],
            pool("src-backup", 4),
            pool("dst-backup", 4),
            dispatcher,
            xor_recover(),
        );
        primary.set_backup_method(backup.clone());

        let done_called = Arc::new(StdAtomicUsize::new(0));
        let dc = done_called.clone();
        primary.clone().recover(0, physical_size(), Box::new(move |res| {
            assert!(res.is_ok());
            dc.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(done_called.load(Ordering::SeqCst), 1);
        assert!(primary.is_fail_over());
        assert_eq!(backup.phase(), RebuildPhase::Done);
    }

    #[test]
    fn read_failure_without_backup_reports_error() {
        let dispatcher = Arc::new(InlineDispatcher::<u32>::default());
        dispatcher.fail_reads.lock().unwrap().push(PhysicalBlockAddress { device: 0u32, lba: 0 });
        let job = NToMRebuild::new(
            "lonely".to_string(),
            vec![0u32],
            vec![2u32],
            pool("src", 4),
            pool("dst", 4),
            dispatcher,
            xor_recover(),
        );
        let result = Arc::new(Mutex::new(None));
        let r = result.clone();
        job.recover(0, physical_size(), Box::new(move |res| {
            *r.lock().unwrap() = Some(res);
        }));
        assert!(matches!(result.lock().unwrap().take(), Some(Err(Error::RebuildReadError))));
    }
}
