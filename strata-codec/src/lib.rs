//! Strata Codec - Streaming decoder and encoder for the tag wire format
//!
//! The decoder consumes a tag stream delivered in arbitrarily sized chunks
//! without blocking: callers queue read requests that resolve as futures once
//! enough bytes have been fed. The parse state lives on an explicit frame
//! stack, so nesting depth is bounded by memory rather than the call stack.
//!
//! The encoder produces the same wire format from an in-memory [`Tag`] tree.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod decode;
pub mod encode;

// Re-export commonly used types
pub use decode::{ReadObject, ReadValue, TagDecoder};
pub use encode::{encode_named_tag, TagEncoder};
pub use strata_format::{DecodeLimits, NamedTag, Result, StrataError, Tag, TagList, TagObject, TagType};
