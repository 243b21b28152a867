// vim: tw=80

//! The persisted block record (PBR): a fixed-size `[header | content]`
//! record at offset 0 of every member device, and the loader that scans a
//! device list for valid ones.
//!
//! Reads the whole region, decodes the header, picks a content
//! serializer by the header's revision, decodes the content, and appends
//! to the output list. One device's failure (read or decode) is logged
//! and skipped rather than aborting the scan; an empty output list is
//! the only fatal case.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PartitionPhysicalSize;
use crate::error::Error;
use crate::Result;

/// Byte layout constants for the fixed on-device record.
pub mod header {
    /// Bytes reserved for the header region. Generous relative to the
    /// header's actual serialized size so the layout can grow a field
    /// without moving the content region.
    pub const LENGTH: usize = 128;

    /// Bytes reserved for the whole record (header and content).
    pub const TOTAL_PBR_SIZE: usize = 4096;
}

/// Identifies this crate's PBR format; the first bytes of every record.
pub const PBR_MAGIC: [u8; 8] = *b"FTARRPBR";

/// The fixed-format part of a PBR: just enough to find and decode the
/// content region that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbrHeader {
    pub magic: [u8; 8],
    pub revision: u32,
    pub uuid: Uuid,
    pub checksum: u32,
}

impl PbrHeader {
    pub fn new(revision: u32, uuid: Uuid) -> Self {
        PbrHeader { magic: PBR_MAGIC, revision, uuid, checksum: 0 }
    }
}

/// The array-topology descriptor a PBR's content region decodes to: just
/// enough to reattach a device to the partition it belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaidKind {
    Raid0,
    Raid6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayTopologyEntry {
    pub array_uuid: Uuid,
    pub physical_size: PartitionPhysicalSize,
    pub raid_kind: RaidKind,
}

/// Decodes and encodes the content region for one header revision. A new
/// on-disk revision gets a new implementation and a new arm in
/// [`serializer_for_revision`]; old revisions keep working against
/// devices that were never rewritten.
trait ContentSerializer {
    fn content_start_offset(&self) -> usize;
    fn serialize(&self, entry: &ArrayTopologyEntry) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<ArrayTopologyEntry>;
}

struct ContentSerializerV1;

impl ContentSerializer for ContentSerializerV1 {
    fn content_start_offset(&self) -> usize {
        header::LENGTH
    }

    fn serialize(&self, entry: &ArrayTopologyEntry) -> Result<Vec<u8>> {
        bincode::serialize(entry).map_err(|_| Error::PbrDecodeError)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<ArrayTopologyEntry> {
        bincode::deserialize(bytes).map_err(|_| Error::PbrDecodeError)
    }
}

const CURRENT_REVISION: u32 = 1;

fn serializer_for_revision(revision: u32) -> Result<Box<dyn ContentSerializer>> {
    match revision {
        1 => Ok(Box::new(ContentSerializerV1)),
        _ => Err(Error::PbrDecodeError),
    }
}

/// Builds the bytes a device would persist at offset 0: header followed
/// by content, each truncated/zero-padded to its reserved region.
pub fn encode(entry: &ArrayTopologyEntry, uuid: Uuid) -> Result<Vec<u8>> {
    let header = PbrHeader::new(CURRENT_REVISION, uuid);
    let header_bytes = bincode::serialize(&header).map_err(|_| Error::PbrDecodeError)?;
    assert!(header_bytes.len() <= header::LENGTH, "header grew past its reserved region");

    let serializer = serializer_for_revision(CURRENT_REVISION)?;
    let content_bytes = serializer.serialize(entry)?;
    let content_region = header::TOTAL_PBR_SIZE - header::LENGTH;
    assert!(content_bytes.len() <= content_region, "content grew past its reserved region");

    let mut out = vec![0u8; header::TOTAL_PBR_SIZE];
    out[..header_bytes.len()].copy_from_slice(&header_bytes);
    out[header::LENGTH..header::LENGTH + content_bytes.len()].copy_from_slice(&content_bytes);
    Ok(out)
}

/// Reads the raw PBR region of one device. Implementations own whatever
/// NUMA-local buffer the read lands in; the loader only ever sees the
/// resulting bytes.
pub trait PbrReader: Send + Sync {
    fn read_pbr(&self, device_idx: usize, len: usize) -> Result<Vec<u8>>;
}

/// Scans `device_count` devices for valid PBRs.
pub struct PbrLoader<R: PbrReader> {
    reader: R,
    device_count: usize,
}

impl<R: PbrReader> PbrLoader<R> {
    pub fn new(reader: R, device_count: usize) -> Self {
        PbrLoader { reader, device_count }
    }

    /// Returns every device's decoded topology entry, in device-index
    /// order, skipping devices whose read or decode failed. Fails only if
    /// no device yielded a valid record.
    pub fn load(&self) -> Result<Vec<ArrayTopologyEntry>> {
        let mut out = Vec::new();
        for device_idx in 0..self.device_count {
            match self.load_one(device_idx) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    log::warn!("PBR load failed on device {}: {}", device_idx, e);
                }
            }
        }
        if out.is_empty() {
            Err(Error::PbrNoValidRecord)
        } else {
            Ok(out)
        }
    }

    fn load_one(&self, device_idx: usize) -> Result<ArrayTopologyEntry> {
        let bytes = self.reader.read_pbr(device_idx, header::TOTAL_PBR_SIZE)?;
        if bytes.len() < header::LENGTH {
            return Err(Error::PbrDecodeError);
        }
        let header: PbrHeader =
            bincode::deserialize(&bytes[..header::LENGTH]).map_err(|_| Error::PbrDecodeError)?;
        if header.magic != PBR_MAGIC {
            return Err(Error::PbrDecodeError);
        }
        let serializer = serializer_for_revision(header.revision)?;
        let start = serializer.content_start_offset();
        serializer.deserialize(&bytes[start..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sample_entry() -> ArrayTopologyEntry {
        ArrayTopologyEntry {
            array_uuid: Uuid::new_v4(),
            physical_size: PartitionPhysicalSize {
                start_lba: 0u64,
                blks_per_chunk: 64,
                chunks_per_stripe: 12,
            },
            raid_kind: RaidKind::Raid6,
        }
    }

    /// The header's first 8 bytes are always the magic string, regardless
    /// of revision, uuid, or checksum -- the one part of the layout a
    /// reader can trust before it even knows the revision.
    #[test]
    fn encoded_header_starts_with_the_magic_bytes() {
        let bytes = encode(&sample_entry(), Uuid::new_v4()).unwrap();
        assert_eq!(&bytes[..8], &PBR_MAGIC);
    }

    struct FixedReader {
        records: Mutex<Vec<Option<Vec<u8>>>>,
    }

    impl PbrReader for FixedReader {
        fn read_pbr(&self, device_idx: usize, _len: usize) -> Result<Vec<u8>> {
            match self.records.lock().unwrap().get(device_idx).cloned().flatten() {
                Some(bytes) => Ok(bytes),
                None => Err(Error::PbrDecodeError),
            }
        }
    }

    #[test]
    fn load_round_trips_a_valid_record() {
        let entry = sample_entry();
        let bytes = encode(&entry, Uuid::new_v4()).unwrap();
        let reader = FixedReader { records: Mutex::new(vec![Some(bytes)]) };
        let loader = PbrLoader::new(reader, 1);
        let loaded = loader.load().unwrap();
        assert_eq!(loaded, vec![entry]);
    }

    #[test]
    fn one_bad_device_does_not_abort_the_scan() {
        let good = sample_entry();
        let good_bytes = encode(&good, Uuid::new_v4()).unwrap();
        let reader = FixedReader {
            records: Mutex::new(vec![None, Some(good_bytes), Some(vec![0xffu8; 16])]),
        };
        let loader = PbrLoader::new(reader, 3);
        let loaded = loader.load().unwrap();
        assert_eq!(loaded, vec![good]);
    }

    #[test]
    fn empty_device_list_is_no_valid_pbr_found() {
        let reader = FixedReader { records: Mutex::new(vec![None, None]) };
        let loader = PbrLoader::new(reader, 2);
        assert!(matches!(loader.load(), Err(Error::PbrNoValidRecord)));
    }

    #[test]
    fn unknown_revision_is_a_decode_error_for_that_device_only() {
        let bad_header = PbrHeader::new(99, Uuid::new_v4());
        let header_bytes = bincode::serialize(&bad_header).unwrap();
        let mut record = vec![0u8; header::TOTAL_PBR_SIZE];
        record[..header_bytes.len()].copy_from_slice(&header_bytes);

        let good = sample_entry();
        let good_bytes = encode(&good, Uuid::new_v4()).unwrap();

        let reader = FixedReader { records: Mutex::new(vec![Some(record), Some(good_bytes)]) };
        let loader = PbrLoader::new(reader, 2);
        let loaded = loader.load().unwrap();
        assert_eq!(loaded, vec![good]);
    }
}
