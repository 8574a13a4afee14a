//! Decode limits
//!
//! Guards against hostile or corrupt tag streams whose length prefixes would
//! otherwise drive unbounded allocation. Defaults are generous; well-formed
//! region payloads sit far below them.

/// Limits applied while decoding a tag stream
#[derive(Debug, Clone)]
pub struct DecodeLimits {
    /// Maximum open composite nesting depth (default: 512)
    pub max_depth: usize,
    /// Maximum bytes a single ByteArray/IntArray may claim (default: 256 MiB)
    pub max_array_bytes: usize,
    /// Maximum element count a single List may claim (default: 64 Mi)
    pub max_list_len: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_depth: 512,
            max_array_bytes: 256 * 1024 * 1024,
            max_list_len: 64 * 1024 * 1024,
        }
    }
}
