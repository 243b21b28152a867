// vim: tw=80

//! External I/O interfaces: the dispatcher this crate issues physical reads
//! and writes through, and the callback shapes rebuild uses to report
//! progress and completion.

use crate::buffer::BufferEntry;
use crate::geometry::PhysicalBlockAddress;
use crate::Result;

/// One physical read or write, addressed to a single member device.
pub struct PhysicalIoUnit<Dev> {
    pub addr: PhysicalBlockAddress<Dev>,
    pub blk_cnt: u32,
    pub buffer: BufferEntry,
}

/// Issues physical I/O and invokes a completion callback exactly once per
/// unit, on whatever thread the underlying transport completes on.
/// Implementations must be `Send + Sync`.
pub trait IoDispatcher<Dev>: Send + Sync {
    fn submit_read(
        &self,
        unit: PhysicalIoUnit<Dev>,
        done: Box<dyn FnOnce(Result<BufferEntry>) + Send>,
    );

    fn submit_write(
        &self,
        unit: PhysicalIoUnit<Dev>,
        done: Box<dyn FnOnce(Result<()>) + Send>,
    );
}

/// Invoked once per rebuilt chunk, with the reconstructed bytes, by the
/// codec's bound recover function.
pub type RecoverFn = Box<dyn Fn(&[&[u8]], &mut [&mut [u8]]) -> Result<()> + Send + Sync>;

/// Invoked exactly once when a rebuild job (one missing chunk across a
/// whole partition, or a whole-partition rebuild job) finishes or fails.
pub type RebuildDoneFn = Box<dyn FnOnce(Result<()>) + Send>;

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// An [`IoDispatcher`] that completes every submission synchronously
    /// and inline, for deterministic tests of the rebuild state machine.
    pub struct InlineDispatcher<Dev> {
        pub reads: Mutex<Vec<PhysicalBlockAddress<Dev>>>,
        pub writes: Mutex<Vec<PhysicalBlockAddress<Dev>>>,
        pub fail_reads: Mutex<Vec<PhysicalBlockAddress<Dev>>>,
        pub fail_writes: Mutex<Vec<PhysicalBlockAddress<Dev>>>,
    }

    impl<Dev> Default for InlineDispatcher<Dev> {
        fn default() -> Self {
            InlineDispatcher {
                reads: Mutex::new(Vec::new()),
                writes: Mutex::new(Vec::new()),
                fail_reads: Mutex::new(Vec::new()),
                fail_writes: Mutex::new(Vec::new()),
            }
        }
    }

    impl<Dev: Clone + PartialEq + Send + Sync> IoDispatcher<Dev> for InlineDispatcher<Dev> {
        fn submit_read(
            &self,
            unit: PhysicalIoUnit<Dev>,
            done: Box<dyn FnOnce(Result<BufferEntry>) + Send>,
        ) {
            self.reads.lock().unwrap().push(unit.addr.clone());
            if self.fail_reads.lock().unwrap().contains(&unit.addr) {
                done(Err(crate::error::Error::RebuildReadError));
            } else {
                done(Ok(unit.buffer));
            }
        }

        fn submit_write(
            &self,
            unit: PhysicalIoUnit<Dev>,
            done: Box<dyn FnOnce(Result<()>) + Send>,
        ) {
            self.writes.lock().unwrap().push(unit.addr.clone());
            if self.fail_writes.lock().unwrap().contains(&unit.addr) {
                done(Err(crate::error::Error::RebuildWriteError));
            } else {
                done(Ok(()));
            }
        }
    }
}
