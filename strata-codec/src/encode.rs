//! Tag encoder
//!
//! Produces the wire format the streaming decoder consumes: a discriminant
//! byte, a 2-byte-length name, then the type-specific payload. All integers
//! and floats are big-endian.

use bytes::Bytes;

use strata_format::{Result, StrataError, Tag, TagObject};

/// Appends named tags to an output buffer
#[derive(Debug, Default)]
pub struct TagEncoder {
    out: Vec<u8>,
}

impl TagEncoder {
    /// Empty encoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one named top-level tag
    pub fn encode_named(&mut self, name: &str, tag: &Tag) -> Result<()> {
        self.out.push(tag.tag_type() as u8);
        self.write_string(name)?;
        self.encode_payload(tag)
    }

    /// Take the encoded bytes
    pub fn finish(self) -> Bytes {
        Bytes::from(self.out)
    }

    fn write_string(&mut self, text: &str) -> Result<()> {
        let len = u16::try_from(text.len()).map_err(|_| {
            StrataError::InvalidArgument(format!(
                "String of {} bytes exceeds 16-bit length prefix",
                text.len()
            ))
        })?;
        self.out.extend_from_slice(&len.to_be_bytes());
        self.out.extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn write_i32_len(&mut self, len: usize, what: &str) -> Result<()> {
        let len = i32::try_from(len).map_err(|_| {
            StrataError::InvalidArgument(format!("{what} of {len} elements exceeds 32-bit length"))
        })?;
        self.out.extend_from_slice(&len.to_be_bytes());
        Ok(())
    }

    fn encode_payload(&mut self, tag: &Tag) -> Result<()> {
        match tag {
            Tag::Byte(v) => self.out.push(*v as u8),
            Tag::Short(v) => self.out.extend_from_slice(&v.to_be_bytes()),
            Tag::Int(v) => self.out.extend_from_slice(&v.to_be_bytes()),
            Tag::Long(v) => self.out.extend_from_slice(&v.to_be_bytes()),
            Tag::Float(v) => self.out.extend_from_slice(&v.to_be_bytes()),
            Tag::Double(v) => self.out.extend_from_slice(&v.to_be_bytes()),
            Tag::ByteArray(data) => {
                self.write_i32_len(data.len(), "Byte array")?;
                self.out.extend_from_slice(data);
            }
            Tag::String(text) => self.write_string(text)?,
            Tag::List(list) => {
                self.out.push(list.element_type() as u8);
                self.write_i32_len(list.len(), "List")?;
                for value in list.values() {
                    self.encode_payload(value)?;
                }
            }
            Tag::Object(obj) => self.encode_object(obj)?,
            Tag::IntArray(data) => {
                if data.len() % 4 != 0 {
                    return Err(StrataError::InvalidArgument(format!(
                        "Int array payload of {} bytes is not a multiple of 4",
                        data.len()
                    )));
                }
                self.write_i32_len(data.len() / 4, "Int array")?;
                self.out.extend_from_slice(data);
            }
        }
        Ok(())
    }

    fn encode_object(&mut self, obj: &TagObject) -> Result<()> {
        for (name, tag) in obj.entries() {
            self.out.push(tag.tag_type() as u8);
            self.write_string(name)?;
            self.encode_payload(tag)?;
        }
        self.out.push(0);
        Ok(())
    }
}

/// Encode a single named tag
pub fn encode_named_tag(name: &str, tag: &Tag) -> Result<Bytes> {
    let mut encoder = TagEncoder::new();
    encoder.encode_named(name, tag)?;
    Ok(encoder.finish())
}
