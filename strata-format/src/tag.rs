//! Tag data model
//!
//! A `Tag` is one typed value in the recursive, length-prefixed binary tree
//! format. Object and List are the only composite variants; an Object keeps
//! its entries in insertion order for round-trip fidelity.

use bytes::Bytes;

use crate::error::{Result, StrataError};

/// Type discriminant codes (one byte on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagType {
    /// Object/implicit-list terminator; never a standalone value
    End = 0,
    /// Single signed byte
    Byte = 1,
    /// Big-endian signed 16-bit integer
    Short = 2,
    /// Big-endian signed 32-bit integer
    Int = 3,
    /// Big-endian signed 64-bit integer
    Long = 4,
    /// Big-endian IEEE-754 single
    Float = 5,
    /// Big-endian IEEE-754 double
    Double = 6,
    /// Length-prefixed raw byte buffer
    ByteArray = 7,
    /// Length-prefixed UTF-8 text
    String = 8,
    /// Homogeneous sequence with its own element discriminant
    List = 9,
    /// Ordered name-to-tag mapping terminated by End
    Object = 10,
    /// Length-prefixed sequence of big-endian 32-bit integers
    IntArray = 11,
}

impl TagType {
    /// Convert from a wire discriminant byte
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            0 => Ok(TagType::End),
            1 => Ok(TagType::Byte),
            2 => Ok(TagType::Short),
            3 => Ok(TagType::Int),
            4 => Ok(TagType::Long),
            5 => Ok(TagType::Float),
            6 => Ok(TagType::Double),
            7 => Ok(TagType::ByteArray),
            8 => Ok(TagType::String),
            9 => Ok(TagType::List),
            10 => Ok(TagType::Object),
            11 => Ok(TagType::IntArray),
            _ => Err(StrataError::UnknownTagType(val)),
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            TagType::End => "End",
            TagType::Byte => "Byte",
            TagType::Short => "Short",
            TagType::Int => "Int",
            TagType::Long => "Long",
            TagType::Float => "Float",
            TagType::Double => "Double",
            TagType::ByteArray => "Byte Array",
            TagType::String => "String",
            TagType::List => "List",
            TagType::Object => "Object",
            TagType::IntArray => "Int Array",
        }
    }
}

impl std::fmt::Display for TagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded tagged value
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    /// Single signed byte
    Byte(i8),
    /// Signed 16-bit integer
    Short(i16),
    /// Signed 32-bit integer
    Int(i32),
    /// Signed 64-bit integer, assembled from both 32-bit halves
    Long(i64),
    /// IEEE-754 single
    Float(f32),
    /// IEEE-754 double
    Double(f64),
    /// Raw byte buffer
    ByteArray(Bytes),
    /// UTF-8 text
    String(String),
    /// Homogeneous sequence
    List(TagList),
    /// Ordered name-to-tag mapping
    Object(TagObject),
    /// Raw buffer of big-endian 32-bit integers, length is a multiple of 4
    IntArray(Bytes),
}

impl Tag {
    /// The discriminant this value carries on the wire
    pub fn tag_type(&self) -> TagType {
        match self {
            Tag::Byte(_) => TagType::Byte,
            Tag::Short(_) => TagType::Short,
            Tag::Int(_) => TagType::Int,
            Tag::Long(_) => TagType::Long,
            Tag::Float(_) => TagType::Float,
            Tag::Double(_) => TagType::Double,
            Tag::ByteArray(_) => TagType::ByteArray,
            Tag::String(_) => TagType::String,
            Tag::List(_) => TagType::List,
            Tag::Object(_) => TagType::Object,
            Tag::IntArray(_) => TagType::IntArray,
        }
    }

    /// Value as `i32` if this is an Int tag
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Tag::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Value as `i64` if this is any integer tag
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Tag::Byte(v) => Some(*v as i64),
            Tag::Short(v) => Some(*v as i64),
            Tag::Int(v) => Some(*v as i64),
            Tag::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Value as `&str` if this is a String tag
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(v) => Some(v),
            _ => None,
        }
    }

    /// Value as `&TagObject` if this is an Object tag
    pub fn as_object(&self) -> Option<&TagObject> {
        match self {
            Tag::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Value as `&TagList` if this is a List tag
    pub fn as_list(&self) -> Option<&TagList> {
        match self {
            Tag::List(v) => Some(v),
            _ => None,
        }
    }
}

/// A top-level or object-entry value together with its name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTag {
    /// Entry name; empty for the customary unnamed top-level object
    pub name: String,
    /// The value itself
    pub tag: Tag,
}

/// Homogeneous sequence of tags
///
/// The element discriminant is fixed for all members and is retained even for
/// an empty list (an empty list may be typed End).
#[derive(Debug, Clone, PartialEq)]
pub struct TagList {
    element_type: TagType,
    values: Vec<Tag>,
}

impl TagList {
    /// Create a list, validating every member against the element type
    pub fn new(element_type: TagType, values: Vec<Tag>) -> Result<Self> {
        for value in &values {
            if value.tag_type() != element_type {
                return Err(StrataError::InvalidArgument(format!(
                    "List of {} cannot hold a {} element",
                    element_type,
                    value.tag_type()
                )));
            }
        }
        Ok(Self {
            element_type,
            values,
        })
    }

    /// An empty list typed by the supplied discriminant
    pub fn empty(element_type: TagType) -> Self {
        Self {
            element_type,
            values: Vec::new(),
        }
    }

    /// The fixed element discriminant
    pub fn element_type(&self) -> TagType {
        self.element_type
    }

    /// The member values in order
    pub fn values(&self) -> &[Tag] {
        &self.values
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the list has no members
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered mapping of unique names to tags
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagObject {
    entries: Vec<(String, Tag)>,
}

impl TagObject {
    /// An object with no entries
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pre-collected entries, rejecting duplicate names
    pub fn from_entries(entries: Vec<(String, Tag)>) -> Result<Self> {
        let mut obj = Self::new();
        for (name, tag) in entries {
            if obj.get(&name).is_some() {
                return Err(StrataError::InvalidArgument(format!(
                    "Duplicate object entry {name:?}"
                )));
            }
            obj.entries.push((name, tag));
        }
        Ok(obj)
    }

    /// Insert an entry, replacing an existing one in place
    pub fn insert(&mut self, name: impl Into<String>, tag: Tag) {
        let name = name.into();
        if let Some(existing) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = tag;
        } else {
            self.entries.push((name, tag));
        }
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// The entries in insertion order
    pub fn entries(&self) -> &[(String, Tag)] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the object has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode an IntArray payload into big-endian 32-bit integers
pub fn int_array_values(data: &Bytes) -> impl Iterator<Item = i32> + '_ {
    data.chunks_exact(4)
        .map(|chunk| i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}
