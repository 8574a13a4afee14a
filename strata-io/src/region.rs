//! Region container access
//!
//! A region file packs up to 1024 chunk slots (a 32x32 square) behind a fixed
//! two-block index. [`RegionStore`] layers chunk-level operations over a
//! [`BlockFile`]: index snapshots are cached by serial, chunk payloads are
//! gzip or zlib streams behind a 5-byte frame, and index commits are
//! optimistic — a concurrent index change surfaces as
//! [`IndexUpdate::Conflict`] so the caller can re-read and retry.

use std::fs::OpenOptions;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use strata_codec::{encode_named_tag, TagDecoder};
use strata_format::{
    check_slot, required_blocks, ChunkHeader, Compression, IndexEntry, RegionIndex, Result,
    StrataError, Tag, TagObject, INDEX_BLOCKS, INDEX_BYTES, REGION_EDGE,
};

use crate::blockfile::{BlockFile, BlockFileOptions};
use crate::fs;

/// How many bytes of decompressed chunk data to feed the decoder at a time
const DECODE_CHUNK: usize = 8192;

/// Construction parameters for a [`RegionStore`]
#[derive(Debug, Clone)]
pub struct RegionOptions {
    /// Whether chunk writes are permitted; also controls file creation
    pub writable: bool,
    /// Cache the index snapshot between operations, revalidated by serial
    pub index_cache: bool,
    /// Initial serial for the underlying [`BlockFile`]
    pub initial_serial: u64,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            writable: false,
            index_cache: true,
            initial_serial: 0,
        }
    }
}

/// A slot's raw payload as stored on disk, framing included
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Last-modified timestamp from the index
    pub timestamp: u32,
    /// The slot's blocks, or `None` for an empty slot
    pub data: Option<Bytes>,
}

/// A decoded chunk together with its index timestamp
#[derive(Debug, Clone)]
pub struct ChunkObject {
    /// The chunk's root object
    pub object: TagObject,
    /// Last-modified timestamp from the index
    pub timestamp: u32,
}

/// An already-compressed chunk payload ready to store
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    /// Codec the payload was compressed with
    pub compression: Compression,
    /// The compressed byte stream
    pub compressed: Bytes,
}

/// Outcome of a chunk write against the region index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexUpdate {
    /// The index already recorded exactly this state; nothing was written
    Unchanged,
    /// The index was committed at this serial
    Written(u64),
    /// The index changed since it was read; nothing was committed
    Conflict(u64),
}

/// Streaming decompressor over one chunk's compressed payload
pub enum ChunkReader {
    /// RFC 1952 gzip stream
    Gzip(GzDecoder<Cursor<Bytes>>),
    /// RFC 1951 deflate stream in a zlib wrapper
    Deflate(ZlibDecoder<Cursor<Bytes>>),
}

impl ChunkReader {
    fn new(compression: Compression, compressed: Bytes) -> Self {
        match compression {
            Compression::Gzip => ChunkReader::Gzip(GzDecoder::new(Cursor::new(compressed))),
            Compression::Deflate => ChunkReader::Deflate(ZlibDecoder::new(Cursor::new(compressed))),
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ChunkReader::Gzip(r) => r.read(buf),
            ChunkReader::Deflate(r) => r.read(buf),
        }
    }
}

/// Block ranges claimed by in-flight payload writes
///
/// Two writers racing on the same index snapshot would otherwise compute the
/// same target blocks and clobber each other's payload before the index
/// commit settles who wins. A claim lives from allocation until the writer's
/// index commit has resolved, so a lost race orphans the loser's blocks
/// instead of corrupting the winner's.
#[derive(Default)]
struct ReservationSet {
    next_id: u64,
    active: Vec<(u64, u64, u64)>,
}

impl ReservationSet {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.active.iter().any(|&(_, s, e)| s < end && e > start)
    }

    fn claim(&mut self, start: u64, end: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.active.push((id, start, end));
        id
    }

    fn release(&mut self, id: u64) {
        self.active.retain(|&(i, _, _)| i != id);
    }
}

/// RAII claim on a payload block range; released on drop
struct Reservation<'a> {
    set: &'a StdMutex<ReservationSet>,
    id: u64,
    offset: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .release(self.id);
    }
}

/// Chunk-level access to one region file
pub struct RegionStore {
    path: PathBuf,
    region_x: i32,
    region_z: i32,
    index_cache: bool,
    file: BlockFile,
    index: Mutex<Option<RegionIndex>>,
    reservations: StdMutex<ReservationSet>,
}

impl RegionStore {
    /// Open the region file at `path` covering region `(region_x, region_z)`
    ///
    /// A writable store creates the file if missing and zero-fills the two
    /// index blocks when the file is shorter than the index, so a fresh
    /// region starts with every slot empty.
    pub fn open(
        path: impl AsRef<Path>,
        region_x: i32,
        region_z: i32,
        opts: RegionOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(opts.writable)
            .create(opts.writable)
            .open(&path)?;
        if opts.writable && file.metadata()?.len() < INDEX_BYTES as u64 {
            fs::write_all_at(&file, &vec![0u8; INDEX_BYTES], 0)?;
        }
        let file = BlockFile::new(
            file,
            BlockFileOptions {
                writable: opts.writable,
                initial_serial: opts.initial_serial,
                ..BlockFileOptions::default()
            },
        )?;
        debug!(path = %path.display(), region_x, region_z, "region opened");
        Ok(Self {
            path,
            region_x,
            region_z,
            index_cache: opts.index_cache,
            file,
            index: Mutex::new(None),
            reservations: StdMutex::new(ReservationSet::default()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Region X coordinate this file covers
    pub fn region_x(&self) -> i32 {
        self.region_x
    }

    /// Region Z coordinate this file covers
    pub fn region_z(&self) -> i32 {
        self.region_z
    }

    /// Whether chunk writes are permitted
    pub fn writable(&self) -> bool {
        self.file.writable()
    }

    /// Flush and release the store
    pub async fn close(self) -> Result<()> {
        if self.file.writable() {
            self.file.sync().await?;
        }
        Ok(())
    }

    /// Current snapshot of the region's two index blocks
    ///
    /// The cached snapshot is revalidated against the block serials on every
    /// call, so the result is never staler than the underlying file.
    /// Concurrent callers share a single in-flight load.
    pub async fn get_index(&self) -> Result<RegionIndex> {
        let mut cached = self.index.lock().await;
        let old_serial = cached.as_ref().map(RegionIndex::serial);
        let outcome = self.file.read_if_changed(0, INDEX_BLOCKS, old_serial).await?;
        let index = match outcome.data {
            Some(buf) => {
                trace!(serial = outcome.range_serial, "index loaded");
                RegionIndex::new(buf, outcome.range_serial)?
            }
            // data is None only when old_serial matched, so a snapshot exists
            None => cached.clone().ok_or_else(|| {
                StrataError::Internal("Index marked unchanged without a cached copy".to_string())
            })?,
        };
        if self.index_cache {
            *cached = Some(index.clone());
        }
        Ok(index)
    }

    /// Index entry for region-local chunk coordinates
    pub async fn get_index_entry(&self, x: usize, z: usize) -> Result<IndexEntry> {
        self.get_index().await?.get_xz(x, z)
    }

    /// Index entry for a flat slot index
    pub async fn get_index_entry_at(&self, slot: usize) -> Result<IndexEntry> {
        self.get_index().await?.get(slot)
    }

    /// Raw stored blocks for a chunk, framing included
    ///
    /// An empty slot returns `data: None` without touching the payload
    /// blocks; the timestamp is still reported.
    pub async fn get_raw_chunk_data(&self, x: usize, z: usize) -> Result<RawChunk> {
        let entry = self.get_index().await?.get_xz(x, z)?;
        if entry.is_empty() {
            return Ok(RawChunk {
                timestamp: entry.timestamp,
                data: None,
            });
        }
        let outcome = self
            .file
            .read(entry.offset as u64, entry.block_count as u64)
            .await?;
        let data = outcome.data.ok_or_else(|| {
            StrataError::Internal("Unconditional read returned no data".to_string())
        })?;
        Ok(RawChunk {
            timestamp: entry.timestamp,
            data: Some(data),
        })
    }

    /// Streaming decompressor over a chunk's payload, with its timestamp
    pub async fn get_chunk_reader(
        &self,
        x: usize,
        z: usize,
    ) -> Result<Option<(ChunkReader, u32)>> {
        let raw = self.get_raw_chunk_data(x, z).await?;
        let Some(data) = raw.data else {
            return Ok(None);
        };
        let header = ChunkHeader::parse(&data)?;
        let compressed = data.slice(header.compressed_range());
        Ok(Some((
            ChunkReader::new(header.compression, compressed),
            raw.timestamp,
        )))
    }

    /// Decode a chunk's payload into its root object
    ///
    /// The stored stream must hold exactly one top-level object with an empty
    /// name; anything else fails with [`StrataError::UnexpectedName`] or
    /// [`StrataError::TrailingValue`]. A stored-but-empty stream yields
    /// `None`, like an empty slot.
    pub async fn get_chunk_object(&self, x: usize, z: usize) -> Result<Option<ChunkObject>> {
        let Some((mut reader, timestamp)) = self.get_chunk_reader(x, z).await? else {
            return Ok(None);
        };
        let mut decoder = TagDecoder::new();
        let root = decoder.read_object();
        let trailing = decoder.read_value();
        let mut buf = [0u8; DECODE_CHUNK];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            decoder.feed(&buf[..n])?;
        }
        decoder.end()?;
        let Some((name, object)) = root.await? else {
            return Ok(None);
        };
        if !name.is_empty() {
            return Err(StrataError::UnexpectedName(name));
        }
        if trailing.await?.is_some() {
            return Err(StrataError::TrailingValue);
        }
        Ok(Some(ChunkObject { object, timestamp }))
    }

    /// Store or tombstone a slot's raw payload, committing the index
    /// optimistically
    ///
    /// `None` writes a tombstone: the slot's offset/count word is zeroed and
    /// only the timestamp survives. A tombstone matching the slot's current
    /// state is a no-op. `Some` stores an already-compressed payload: the
    /// slot's existing block span is reused in place when the framed payload
    /// fits, otherwise the payload is appended past the last used block.
    /// The target blocks are reserved while the write is in flight, so two
    /// racing writers never share a span. Payload blocks are written
    /// unconditionally; the index commit is keyed to the serial the snapshot
    /// was read at, so a concurrent index change returns
    /// [`IndexUpdate::Conflict`], leaves the index untouched, and orphans at
    /// most the loser's freshly written blocks.
    pub async fn write_raw_chunk_data(
        &self,
        slot: usize,
        payload: Option<ChunkPayload>,
        timestamp: u32,
    ) -> Result<IndexUpdate> {
        if !self.file.writable() {
            return Err(StrataError::NotWritable);
        }
        let slot = check_slot(slot)?;
        let index = self.get_index().await?;
        let current = index.get(slot)?;

        match payload {
            None => {
                if current.is_empty() && current.timestamp == timestamp {
                    trace!(slot, timestamp, "tombstone already in place");
                    return Ok(IndexUpdate::Unchanged);
                }
                let patched = index.with_entry(slot, IndexEntry::tombstone(timestamp))?;
                self.commit_index(slot, timestamp, index.serial(), patched)
                    .await
            }
            Some(payload) => {
                let blocks = required_blocks(payload.compressed.len() + 1);
                let block_count = u8::try_from(blocks).map_err(|_| {
                    StrataError::InvalidArgument(format!(
                        "Chunk payload needs {blocks} blocks, more than a slot can hold"
                    ))
                })?;
                // Held until the index commit below has resolved
                let reservation = self.reserve_payload_blocks(&index, &current, blocks);
                let offset = u32::try_from(reservation.offset).map_err(|_| {
                    StrataError::InvalidArgument(format!(
                        "Block offset {} out of range",
                        reservation.offset
                    ))
                })?;
                let entry = IndexEntry {
                    offset,
                    block_count,
                    timestamp,
                };
                let patched = index.with_entry(slot, entry)?;
                let framed = ChunkHeader::frame(payload.compression, &payload.compressed)?;
                self.file
                    .write(reservation.offset, Bytes::from(framed))
                    .await?;
                self.commit_index(slot, timestamp, index.serial(), patched)
                    .await
            }
        }
    }

    /// Allocate a block span for a framed payload and claim it
    ///
    /// In-place reuse applies only when the slot's existing span fits the
    /// payload and no in-flight write has claimed it; otherwise the span is
    /// appended past both the last used block and every other claim.
    fn reserve_payload_blocks(
        &self,
        index: &RegionIndex,
        current: &IndexEntry,
        blocks: u64,
    ) -> Reservation<'_> {
        let mut set = self
            .reservations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let in_place = !current.is_empty()
            && blocks <= current.block_count as u64
            && !set.overlaps(current.offset as u64, current.offset as u64 + blocks);
        let offset = if in_place {
            current.offset as u64
        } else {
            let mut start = index.end_block();
            for &(_, _, end) in &set.active {
                if end > start {
                    start = end;
                }
            }
            start
        };
        let id = set.claim(offset, offset + blocks);
        Reservation {
            set: &self.reservations,
            id,
            offset,
        }
    }

    async fn commit_index(
        &self,
        slot: usize,
        timestamp: u32,
        read_serial: u64,
        patched: Bytes,
    ) -> Result<IndexUpdate> {
        let outcome = self
            .file
            .write_unless_changed(0, patched, Some(read_serial))
            .await?;
        if outcome.wrote {
            debug!(slot, timestamp, serial = outcome.serial, "index committed");
            Ok(IndexUpdate::Written(outcome.serial))
        } else {
            debug!(slot, serial = outcome.serial, "index commit lost to a concurrent change");
            Ok(IndexUpdate::Conflict(outcome.serial))
        }
    }

    /// Encode, compress and store a chunk object at `slot`
    pub async fn write_chunk_object(
        &self,
        slot: usize,
        object: &TagObject,
        compression: Compression,
        timestamp: u32,
    ) -> Result<IndexUpdate> {
        let encoded = encode_named_tag("", &Tag::Object(object.clone()))?;
        let compressed = match compression {
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&encoded)?;
                encoder.finish()?
            }
            Compression::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&encoded)?;
                encoder.finish()?
            }
        };
        self.write_raw_chunk_data(
            slot,
            Some(ChunkPayload {
                compression,
                compressed: Bytes::from(compressed),
            }),
            timestamp,
        )
        .await
    }

    /// Visit every stored chunk in slot order, halting on the first error
    pub async fn for_all_chunks<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(usize, ChunkObject) -> Result<()>,
    {
        let index = self.get_index().await?;
        let slots: Vec<usize> = index.occupied_slots().map(|(slot, _)| slot).collect();
        for slot in slots {
            let (x, z) = (slot % REGION_EDGE, slot / REGION_EDGE);
            if let Some(chunk) = self.get_chunk_object(x, z).await? {
                visitor(slot, chunk)?;
            }
        }
        Ok(())
    }
}
