//! Binary folder index file format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (128 bytes, fixed)            │
//! │  magic: [u8; 8] = b"MSRCHIX\0"       │
//! │  version: u32                        │
//! │  flags: u32                          │
//! │  message_count: u64                  │
//! │  mbox_file_size: u64                 │
//! │  mbox_modified_time: i64             │
//! │  sha256_first_4kb: [u8; 32]          │
//! │  (padding to 128 bytes)              │
//! ├──────────────────────────────────────┤
//! │ PAYLOAD (variable)                   │
//! │  bincode-serialized FolderIndex      │
//! └──────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::model::message::MessageInfo;
use crate::search::word_index::WordIndex;

/// Magic bytes identifying a mailsearch folder index.
pub const MAGIC: &[u8; 8] = b"MSRCHIX\0";

/// Current index format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Size of the SHA-256 hash prefix used for integrity checking.
pub const HASH_PREFIX_LEN: usize = 4096;

/// Header flag: the payload carries a body word index.
pub const FLAG_WORD_INDEX: u32 = 1;

/// Serializable index header.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// [`FLAG_WORD_INDEX`] or 0.
    pub flags: u32,
    /// Number of summary records in the payload.
    pub message_count: u64,
    /// Size of the mbox file when the index was built.
    pub mbox_file_size: u64,
    /// Modification time of the mbox file (Unix timestamp in seconds).
    pub mbox_modified_time: i64,
    /// SHA-256 of the first 4 KB of the mbox file.
    pub sha256_first_4kb: [u8; 32],
}

impl IndexHeader {
    /// Validate that the header is well-formed and matches the current format.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }

    pub fn has_word_index(&self) -> bool {
        self.flags & FLAG_WORD_INDEX != 0
    }
}

/// Everything persisted for one mbox: the summary and, optionally, the body
/// word index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderIndex {
    /// Summary records in mbox order; uids are 1-based sequence numbers.
    pub infos: Vec<MessageInfo>,
    pub words: Option<WordIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(magic: [u8; 8], version: u32) -> IndexHeader {
        IndexHeader {
            magic,
            version,
            flags: FLAG_WORD_INDEX,
            message_count: 0,
            mbox_file_size: 0,
            mbox_modified_time: 0,
            sha256_first_4kb: [0; 32],
        }
    }

    #[test]
    fn test_validate() {
        assert!(header(*MAGIC, VERSION).validate().is_ok());
        assert!(header(*b"MBOXTUI\0", VERSION).validate().is_err());
        let err = header(*MAGIC, VERSION + 1).validate().unwrap_err();
        assert!(err.contains("Incompatible version"));
    }

    #[test]
    fn test_header_fits_fixed_size() {
        let bytes = bincode::serialize(&header(*MAGIC, VERSION)).expect("serialize");
        assert!(bytes.len() <= HEADER_SIZE);
        assert!(header(*MAGIC, VERSION).has_word_index());
    }
}
