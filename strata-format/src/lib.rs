//! Strata Format - Core primitives for tagged-object region storage
//!
//! This crate provides the fundamental data model and layout rules for the
//! Strata container format with no I/O dependencies. It includes:
//!
//! - The tag data model (type discriminants and the `Tag` value tree)
//! - Region index layout (slot addressing, entry packing, index snapshots)
//! - Chunk payload framing (length prefix and compression discriminant)
//! - Error types
//! - Decode limits

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod limits;
pub mod region;
pub mod tag;

// Re-export commonly used types
pub use error::{Result, StrataError};
pub use limits::DecodeLimits;
pub use region::{
    check_slot, required_blocks, slot_index, ChunkHeader, Compression, IndexEntry, RegionIndex, BLOCK_SIZE,
    INDEX_BLOCKS, INDEX_BYTES, REGION_EDGE, REGION_SLOTS,
};
pub use tag::{NamedTag, Tag, TagList, TagObject, TagType};
