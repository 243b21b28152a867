// vim: tw=80

//! The array's central event-id enumeration.
//!
//! Every compute-level routine in this crate returns `Result<T, Error>`
//! rather than panicking (panics are reserved for geometry invariant
//! violations — see `geometry::FtSize::new`). Discriminants are the
//! externally-observable numeric codes; they appear in rebuild-done
//! callbacks and (eventually) in persisted/remote-observed contexts, so
//! once shipped a variant's number must never change.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Error {
    /// A buffer pool's consumer list was empty and no swap was possible.
    /// Fatal to the current I/O; the caller does not retry at this layer.
    BufferPoolEmpty = 1,

    /// A rebuild read failed and no backup method was available to fail
    /// over to.
    RebuildReadError = 2,

    /// The erasure codec failed to recover a chunk (e.g. more erasures
    /// were requested than the codec's redundancy supports).
    RebuildRecoverError = 3,

    /// A rebuild write failed.
    RebuildWriteError = 4,

    /// More devices are abnormal than the RAID method's redundancy can
    /// tolerate; the stripe cannot be reconstructed.
    ArrayFailure = 5,

    /// A PBR scan found zero devices with a decodable record.
    PbrNoValidRecord = 6,

    /// A single device's PBR header or content failed to decode. Per-device;
    /// does not necessarily fail the whole scan.
    PbrDecodeError = 7,

    /// `CheckNumofDevsToConfigure` rejected the device count for the
    /// requested RAID method.
    InsufficientDevices = 8,

    /// The hugepage allocator returned null during buffer pool
    /// construction; the pool is left unallocated.
    HugepageAllocFailed = 9,
}

impl Error {
    /// The stable numeric code this variant was constructed with.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::BufferPoolEmpty => "buffer pool is empty",
            Error::RebuildReadError => "rebuild read failed",
            Error::RebuildRecoverError => "rebuild recover failed",
            Error::RebuildWriteError => "rebuild write failed",
            Error::ArrayFailure => "too many abnormal devices to reconstruct stripe",
            Error::PbrNoValidRecord => "no valid PBR found on any device",
            Error::PbrDecodeError => "PBR header or content decode failed",
            Error::InsufficientDevices => "not enough devices configured for RAID method",
            Error::HugepageAllocFailed => "hugepage allocation failed",
        };
        write!(f, "{} (code {})", msg, self.code())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::BufferPoolEmpty.code(), 1);
        assert_eq!(Error::RebuildReadError.code(), 2);
        assert_eq!(Error::RebuildRecoverError.code(), 3);
        assert_eq!(Error::RebuildWriteError.code(), 4);
        assert_eq!(Error::ArrayFailure.code(), 5);
        assert_eq!(Error::PbrNoValidRecord.code(), 6);
        assert_eq!(Error::PbrDecodeError.code(), 7);
        assert_eq!(Error::InsufficientDevices.code(), 8);
        assert_eq!(Error::HugepageAllocFailed.code(), 9);
    }
}
