//! Strata Test Utilities
//!
//! Shared fixture builders for the workspace tests: an ergonomic builder for
//! tag objects and an on-disk region-file writer that lays out index blocks
//! and framed, compressed chunk payloads exactly as the storage layer expects
//! to find them.

#![deny(unsafe_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::write::{GzEncoder, ZlibEncoder};

use strata_codec::encode_named_tag;
use strata_format::{
    required_blocks, slot_index, ChunkHeader, Compression, Result, Tag, TagList, TagObject,
    TagType, BLOCK_SIZE, INDEX_BLOCKS, INDEX_BYTES,
};

/// Builder for tag objects with common field patterns
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    object: TagObject,
}

impl ObjectBuilder {
    /// Start an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a byte field
    pub fn byte(mut self, name: &str, value: i8) -> Self {
        self.object.insert(name, Tag::Byte(value));
        self
    }

    /// Add a short field
    pub fn short(mut self, name: &str, value: i16) -> Self {
        self.object.insert(name, Tag::Short(value));
        self
    }

    /// Add an int field
    pub fn int(mut self, name: &str, value: i32) -> Self {
        self.object.insert(name, Tag::Int(value));
        self
    }

    /// Add a long field
    pub fn long(mut self, name: &str, value: i64) -> Self {
        self.object.insert(name, Tag::Long(value));
        self
    }

    /// Add a double field
    pub fn double(mut self, name: &str, value: f64) -> Self {
        self.object.insert(name, Tag::Double(value));
        self
    }

    /// Add a string field
    pub fn string(mut self, name: &str, value: &str) -> Self {
        self.object.insert(name, Tag::String(value.to_string()));
        self
    }

    /// Add a byte-array field
    pub fn byte_array(mut self, name: &str, value: impl Into<bytes::Bytes>) -> Self {
        self.object.insert(name, Tag::ByteArray(value.into()));
        self
    }

    /// Add an int-array field from decoded values
    pub fn int_array(mut self, name: &str, values: &[i32]) -> Self {
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.object.insert(name, Tag::IntArray(raw.into()));
        self
    }

    /// Add a homogeneous list field; panics on mixed element types
    pub fn list(mut self, name: &str, element_type: TagType, values: Vec<Tag>) -> Self {
        let list = TagList::new(element_type, values).expect("fixture list must be homogeneous");
        self.object.insert(name, Tag::List(list));
        self
    }

    /// Add a nested object field
    pub fn object(mut self, name: &str, value: TagObject) -> Self {
        self.object.insert(name, Tag::Object(value));
        self
    }

    /// Add an arbitrary tag field
    pub fn tag(mut self, name: &str, value: Tag) -> Self {
        self.object.insert(name, value);
        self
    }

    /// Finish the object
    pub fn build(self) -> TagObject {
        self.object
    }
}

/// A chunk-shaped object with scalar, array and nested fields, handy as a
/// round-trip payload
pub fn sample_chunk_object() -> TagObject {
    ObjectBuilder::new()
        .int("xPos", -4)
        .int("zPos", 12)
        .long("LastUpdate", 0x1_2345_6789)
        .byte("TerrainPopulated", 1)
        .string("Status", "full")
        .byte_array("Blocks", vec![0x5Au8; 128])
        .int_array("HeightMap", &[64, 65, 66, 70])
        .object(
            "Level",
            ObjectBuilder::new()
                .double("Temperature", 0.75)
                .string("Biome", "plains")
                .build(),
        )
        .build()
}

struct FixtureChunk {
    slot: usize,
    timestamp: u32,
    framed: Vec<u8>,
}

/// Staged region-file contents, written out in one pass
///
/// Payloads are allocated sequentially after the two index blocks in the
/// order they were staged. `write_to` produces a complete, readable region
/// file.
#[derive(Default)]
pub struct RegionFixture {
    chunks: Vec<FixtureChunk>,
}

impl RegionFixture {
    /// Start an empty fixture
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a chunk object at region-local `(x, z)`, compressed with the
    /// given codec
    pub fn chunk(
        self,
        x: usize,
        z: usize,
        object: &TagObject,
        compression: Compression,
        timestamp: u32,
    ) -> Result<Self> {
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
        let framed = ChunkHeader::frame(compression, &compressed)?;
        self.framed_payload(x, z, framed, timestamp)
    }

    /// Stage an already-framed payload, for malformed-data scenarios
    pub fn framed_payload(
        mut self,
        x: usize,
        z: usize,
        framed: Vec<u8>,
        timestamp: u32,
    ) -> Result<Self> {
        let slot = slot_index(x, z)?;
        self.chunks.push(FixtureChunk {
            slot,
            timestamp,
            framed,
        });
        Ok(self)
    }

    /// Write the staged region file to `path`
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut index = vec![0u8; INDEX_BYTES];
        let mut body = Vec::new();
        let mut next_block = INDEX_BLOCKS;
        for chunk in &self.chunks {
            let blocks = required_blocks(chunk.framed.len().saturating_sub(4));
            let word = ((next_block as u32) << 8) | blocks as u32;
            let at = chunk.slot * 4;
            index[at..at + 4].copy_from_slice(&word.to_be_bytes());
            let ts_at = chunk.slot * 4 + BLOCK_SIZE;
            index[ts_at..ts_at + 4].copy_from_slice(&chunk.timestamp.to_be_bytes());

            let padded = blocks as usize * BLOCK_SIZE;
            body.extend_from_slice(&chunk.framed);
            body.resize(body.len() + (padded - chunk.framed.len()), 0);
            next_block += blocks;
        }
        let mut file = File::create(path)?;
        file.write_all(&index)?;
        file.write_all(&body)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_insertion_order() {
        let object = ObjectBuilder::new().int("a", 1).string("b", "two").build();
        let names: Vec<_> = object.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn fixture_lays_out_index_and_payloads() {
        let dir = std::env::temp_dir().join("strata-fixture-selftest");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("r.0.0.strata");
        RegionFixture::new()
            .chunk(3, 7, &sample_chunk_object(), Compression::Gzip, 1234)
            .unwrap()
            .write_to(&path)
            .unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert!(raw.len() > INDEX_BYTES);
        assert_eq!(raw.len() % BLOCK_SIZE, 0);
        let slot = slot_index(3, 7).unwrap();
        let word = u32::from_be_bytes(raw[slot * 4..slot * 4 + 4].try_into().unwrap());
        assert_eq!(word >> 8, 2);
        std::fs::remove_file(&path).unwrap();
    }
}
