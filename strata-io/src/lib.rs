//! Strata I/O - Block-file access and region container stores
//!
//! This crate provides the storage layer of Strata:
//!
//! - [`BlockFile`]: serial-numbered, concurrency-safe read/write access over
//!   fixed-size blocks of a file, used to detect staleness and serialize
//!   overlapping I/O
//! - [`RegionStore`]: the region container — a fixed two-block index over
//!   4096-byte blocks holding compressed tag-encoded chunk payloads
//!
//! Nothing here blocks the executing thread on file I/O: operations suspend
//! on lock-queue admission and on `spawn_blocking` completion.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod blockfile;
mod fs;
pub mod region;

// Re-export commonly used types
pub use blockfile::{BlockFile, BlockFileOptions, ReadOutcome, WriteOutcome};
pub use region::{
    ChunkObject, ChunkPayload, ChunkReader, IndexUpdate, RawChunk, RegionOptions, RegionStore,
};
pub use strata_format::{
    Compression, IndexEntry, RegionIndex, Result, StrataError, Tag, TagObject, BLOCK_SIZE,
    REGION_EDGE, REGION_SLOTS,
};
