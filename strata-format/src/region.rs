//! Region container layout
//!
//! A region file addresses up to 1024 chunk slots through a fixed two-block
//! index: block 0 holds per-slot offset/count words, block 1 holds per-slot
//! last-modified timestamps. Chunk payloads start at their slot's block
//! offset with a 4-byte length prefix and a 1-byte compression discriminant.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, StrataError};

/// Fixed storage unit, used for both index and payload blocks
pub const BLOCK_SIZE: usize = 4096;
/// Region edge length in chunks; slots address a 32x32 square
pub const REGION_EDGE: usize = 32;
/// Number of chunk slots per region
pub const REGION_SLOTS: usize = REGION_EDGE * REGION_EDGE;
/// Number of blocks occupied by the index
pub const INDEX_BLOCKS: u64 = 2;
/// Total index size in bytes
pub const INDEX_BYTES: usize = BLOCK_SIZE * INDEX_BLOCKS as usize;

/// Largest block offset representable in an index word (24 bits)
const MAX_BLOCK_OFFSET: u32 = (1 << 24) - 1;

/// Map region-local coordinates to a linear slot index, bounds-checked
pub fn slot_index(x: usize, z: usize) -> Result<usize> {
    if x >= REGION_EDGE {
        return Err(StrataError::SlotOutOfRange(format!(
            "Chunk X index {x} out of range"
        )));
    }
    if z >= REGION_EDGE {
        return Err(StrataError::SlotOutOfRange(format!(
            "Chunk Z index {z} out of range"
        )));
    }
    Ok(x + z * REGION_EDGE)
}

/// Validate a flat slot index
pub fn check_slot(slot: usize) -> Result<usize> {
    if slot >= REGION_SLOTS {
        return Err(StrataError::SlotOutOfRange(format!(
            "Slot index {slot} out of range"
        )));
    }
    Ok(slot)
}

/// Number of 4096-byte blocks needed to hold a framed chunk payload
///
/// `payload_len` counts the compression byte plus the compressed bytes (the
/// value stored in the length prefix); the prefix itself adds 4 bytes.
pub fn required_blocks(payload_len: usize) -> u64 {
    let total = payload_len + 4;
    total.div_ceil(BLOCK_SIZE) as u64
}

/// One slot's index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Payload start, in blocks from the file start (0 when empty)
    pub offset: u32,
    /// Number of blocks the payload occupies (0 when empty)
    pub block_count: u8,
    /// Last-modified Unix timestamp in seconds
    pub timestamp: u32,
}

impl IndexEntry {
    /// A tombstone entry carrying only a timestamp
    pub fn tombstone(timestamp: u32) -> Self {
        Self {
            offset: 0,
            block_count: 0,
            timestamp,
        }
    }

    /// Whether the slot holds no payload
    pub fn is_empty(&self) -> bool {
        self.offset == 0 && self.block_count == 0
    }

    /// Pack offset and count into the on-disk index word
    pub fn pack_word(&self) -> Result<u32> {
        if self.offset > MAX_BLOCK_OFFSET {
            return Err(StrataError::InvalidArgument(format!(
                "Block offset {} exceeds 24-bit index word",
                self.offset
            )));
        }
        Ok((self.offset << 8) | self.block_count as u32)
    }

    /// Unpack an on-disk index word
    pub fn from_word(word: u32, timestamp: u32) -> Self {
        Self {
            offset: word >> 8,
            block_count: (word & 0xFF) as u8,
            timestamp,
        }
    }
}

/// Immutable snapshot of a region's two index blocks
///
/// Tagged with the BlockFile serial it was read at so writers can commit
/// changes optimistically against the same serial. Cloning is cheap; the
/// backing buffer is shared.
#[derive(Debug, Clone)]
pub struct RegionIndex {
    buf: Bytes,
    serial: u64,
}

impl RegionIndex {
    /// Wrap a freshly read index buffer
    pub fn new(buf: Bytes, serial: u64) -> Result<Self> {
        if buf.len() != INDEX_BYTES {
            return Err(StrataError::InvalidArgument(format!(
                "Region index must be {INDEX_BYTES} bytes, got {}",
                buf.len()
            )));
        }
        Ok(Self { buf, serial })
    }

    /// The BlockFile serial this snapshot was read at
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Entry for a flat slot index
    pub fn get(&self, slot: usize) -> Result<IndexEntry> {
        let slot = check_slot(slot)?;
        let word = read_u32(&self.buf, slot * 4);
        let timestamp = read_u32(&self.buf, slot * 4 + BLOCK_SIZE);
        Ok(IndexEntry::from_word(word, timestamp))
    }

    /// Entry for region-local coordinates
    pub fn get_xz(&self, x: usize, z: usize) -> Result<IndexEntry> {
        self.get(slot_index(x, z)?)
    }

    /// Whether the slot holds payload data
    pub fn has_chunk(&self, slot: usize) -> Result<bool> {
        Ok(!self.get(slot)?.is_empty())
    }

    /// Iterate the slots that hold payload data
    pub fn occupied_slots(&self) -> impl Iterator<Item = (usize, IndexEntry)> + '_ {
        (0..REGION_SLOTS).filter_map(move |slot| {
            let entry = self
                .get(slot)
                .unwrap_or(IndexEntry::tombstone(0));
            (!entry.is_empty()).then_some((slot, entry))
        })
    }

    /// First block past every stored payload (never below the index itself)
    pub fn end_block(&self) -> u64 {
        let mut end = INDEX_BLOCKS;
        for (_, entry) in self.occupied_slots() {
            let payload_end = entry.offset as u64 + entry.block_count as u64;
            if payload_end > end {
                end = payload_end;
            }
        }
        end
    }

    /// Copy of the index buffer with one slot replaced
    ///
    /// The returned buffer is what a writer commits back through the block
    /// layer; the snapshot itself stays untouched so concurrent readers keep
    /// a consistent view.
    pub fn with_entry(&self, slot: usize, entry: IndexEntry) -> Result<Bytes> {
        let slot = check_slot(slot)?;
        let word = entry.pack_word()?;
        let mut copy = BytesMut::from(&self.buf[..]);
        copy[slot * 4..slot * 4 + 4].copy_from_slice(&word.to_be_bytes());
        let ts_at = slot * 4 + BLOCK_SIZE;
        copy[ts_at..ts_at + 4].copy_from_slice(&entry.timestamp.to_be_bytes());
        Ok(copy.freeze())
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Chunk payload compression discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    /// RFC 1952 gzip stream
    Gzip = 1,
    /// RFC 1951 deflate stream in a zlib wrapper
    Deflate = 2,
}

impl Compression {
    /// Convert from the on-disk discriminant byte
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Deflate),
            _ => Err(StrataError::UnknownCompression(val)),
        }
    }
}

/// The 5-byte framing at the start of a stored chunk payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Stored length: compression byte plus compressed byte count
    pub length: u32,
    /// Compression discriminant
    pub compression: Compression,
}

impl ChunkHeader {
    /// Parse the framing from the front of a raw block buffer
    ///
    /// Validates that the buffer actually contains the advertised compressed
    /// bytes; trailing block padding is ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(StrataError::TruncatedInput);
        }
        let length = read_u32(data, 0);
        if length == 0 {
            return Err(StrataError::InvalidArgument(
                "Chunk length prefix must cover the compression byte".to_string(),
            ));
        }
        let compressed_len = length as usize - 1;
        if data.len() < 5 + compressed_len {
            return Err(StrataError::TruncatedInput);
        }
        let compression = Compression::from_u8(data[4])?;
        Ok(Self {
            length,
            compression,
        })
    }

    /// Byte range of the compressed payload within the raw buffer
    pub fn compressed_range(&self) -> std::ops::Range<usize> {
        5..5 + (self.length as usize - 1)
    }

    /// Encode the framing in front of a compressed payload
    pub fn frame(compression: Compression, compressed: &[u8]) -> Result<Vec<u8>> {
        let length = compressed.len() + 1;
        let length = u32::try_from(length).map_err(|_| {
            StrataError::InvalidArgument("Compressed chunk payload too large".to_string())
        })?;
        let mut out = Vec::with_capacity(5 + compressed.len());
        out.extend_from_slice(&length.to_be_bytes());
        out.push(compression as u8);
        out.extend_from_slice(compressed);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(entries: &[(usize, IndexEntry)]) -> RegionIndex {
        let mut buf = vec![0u8; INDEX_BYTES];
        for (slot, entry) in entries {
            let word = entry.pack_word().unwrap();
            buf[slot * 4..slot * 4 + 4].copy_from_slice(&word.to_be_bytes());
            let at = slot * 4 + BLOCK_SIZE;
            buf[at..at + 4].copy_from_slice(&entry.timestamp.to_be_bytes());
        }
        RegionIndex::new(Bytes::from(buf), 7).unwrap()
    }

    #[test]
    fn slot_index_maps_row_major() {
        assert_eq!(slot_index(0, 0).unwrap(), 0);
        assert_eq!(slot_index(3, 7).unwrap(), 3 + 7 * 32);
        assert_eq!(slot_index(31, 31).unwrap(), 1023);
    }

    #[test]
    fn slot_index_bounds_checked() {
        assert!(slot_index(32, 0).is_err());
        assert!(slot_index(0, 32).is_err());
        assert!(check_slot(1024).is_err());
    }

    #[test]
    fn entry_word_roundtrip() {
        let entry = IndexEntry {
            offset: 0x123456,
            block_count: 0xAB,
            timestamp: 42,
        };
        let word = entry.pack_word().unwrap();
        assert_eq!(word, 0x123456AB);
        assert_eq!(IndexEntry::from_word(word, 42), entry);
    }

    #[test]
    fn entry_rejects_oversized_offset() {
        let entry = IndexEntry {
            offset: 1 << 24,
            block_count: 1,
            timestamp: 0,
        };
        assert!(entry.pack_word().is_err());
    }

    #[test]
    fn zero_word_means_empty() {
        let entry = IndexEntry::from_word(0, 99);
        assert!(entry.is_empty());
        assert_eq!(entry.timestamp, 99);
    }

    #[test]
    fn required_blocks_rounds_up() {
        assert_eq!(required_blocks(1), 1);
        assert_eq!(required_blocks(BLOCK_SIZE - 4), 1);
        assert_eq!(required_blocks(BLOCK_SIZE - 3), 2);
        assert_eq!(required_blocks(2 * BLOCK_SIZE), 3);
    }

    #[test]
    fn index_reports_entries_and_end_block() {
        let index = index_with(&[
            (
                5,
                IndexEntry {
                    offset: 2,
                    block_count: 3,
                    timestamp: 100,
                },
            ),
            (
                900,
                IndexEntry {
                    offset: 8,
                    block_count: 1,
                    timestamp: 200,
                },
            ),
        ]);
        assert_eq!(index.serial(), 7);
        assert_eq!(index.get(5).unwrap().offset, 2);
        assert!(index.get(6).unwrap().is_empty());
        let occupied: Vec<_> = index.occupied_slots().map(|(s, _)| s).collect();
        assert_eq!(occupied, [5, 900]);
        assert_eq!(index.end_block(), 9);
    }

    #[test]
    fn empty_index_end_block_is_index_end() {
        let index = index_with(&[]);
        assert_eq!(index.end_block(), INDEX_BLOCKS);
    }

    #[test]
    fn with_entry_patches_copy_only() {
        let index = index_with(&[]);
        let patched = index
            .with_entry(10, IndexEntry::tombstone(1234))
            .unwrap();
        let reread = RegionIndex::new(patched, 8).unwrap();
        assert_eq!(reread.get(10).unwrap().timestamp, 1234);
        assert!(reread.get(10).unwrap().is_empty());
        // Original snapshot untouched
        assert_eq!(index.get(10).unwrap().timestamp, 0);
    }

    #[test]
    fn chunk_header_parses_and_frames() {
        let framed = ChunkHeader::frame(Compression::Gzip, &[1, 2, 3]).unwrap();
        assert_eq!(framed.len(), 8);
        assert_eq!(&framed[..4], &4u32.to_be_bytes());
        let header = ChunkHeader::parse(&framed).unwrap();
        assert_eq!(header.compression, Compression::Gzip);
        assert_eq!(&framed[header.compressed_range()], &[1, 2, 3]);
    }

    #[test]
    fn chunk_header_rejects_unknown_compression() {
        let mut framed = ChunkHeader::frame(Compression::Deflate, &[0]).unwrap();
        framed[4] = 9;
        assert!(matches!(
            ChunkHeader::parse(&framed),
            Err(StrataError::UnknownCompression(9))
        ));
    }

    #[test]
    fn chunk_header_rejects_short_buffer() {
        assert!(matches!(
            ChunkHeader::parse(&[0, 0, 0]),
            Err(StrataError::TruncatedInput)
        ));
        // Length prefix promises more bytes than the buffer holds
        let mut framed = ChunkHeader::frame(Compression::Gzip, &[1, 2, 3]).unwrap();
        framed[3] = 200;
        assert!(matches!(
            ChunkHeader::parse(&framed),
            Err(StrataError::TruncatedInput)
        ));
    }
}
