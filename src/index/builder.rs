//! Index construction, validation, and persistence.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{cache_dir, Config};
use crate::error::{Result, SearchError};
use crate::index::format::{
    FolderIndex, IndexHeader, FLAG_WORD_INDEX, HASH_PREFIX_LEN, HEADER_SIZE, MAGIC, VERSION,
};
use crate::parser::header::message_info_from_raw;
use crate::parser::mbox::MboxReader;
use crate::parser::mime::parse_full_message;
use crate::search::word_index::WordIndex;

/// Build (or load) the folder index for an mbox file.
///
/// 1. If a valid index already exists and `force_rebuild` is false, load it.
///    An index without a word index is only reused when none is wanted.
/// 2. Otherwise, split the mbox, summarize every message, decode bodies into
///    a word index when `config.search.build_word_index` is set, and write a
///    new index file.
///
/// `progress` receives `(bytes_processed, total_bytes)`.
pub fn build_index(
    mbox_path: &Path,
    config: &Config,
    force_rebuild: bool,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<FolderIndex> {
    let want_words = config.search.build_word_index;
    if !force_rebuild {
        match load_index(mbox_path, config)? {
            Some(index) if index.words.is_some() || !want_words => {
                debug!(
                    path = %mbox_path.display(),
                    count = index.infos.len(),
                    "Loaded existing index"
                );
                return Ok(index);
            }
            Some(_) => debug!("Existing index has no word index, rebuilding"),
            None => {}
        }
    }

    info!(path = %mbox_path.display(), "Building index");

    let total = std::fs::metadata(mbox_path)
        .map_err(|e| SearchError::io(mbox_path, e))?
        .len();
    let reader = MboxReader::open(mbox_path)?
        .with_max_message_size(config.performance.max_message_size);

    let mut index = FolderIndex {
        infos: Vec::new(),
        words: want_words.then(WordIndex::new),
    };
    for message in reader {
        let message = message?;
        let uid = (index.infos.len() + 1).to_string();
        index
            .infos
            .push(message_info_from_raw(&uid, &message.bytes, Some(message.span)));
        if let Some(words) = index.words.as_mut() {
            words.add_message(&uid, &parse_full_message(&message.bytes).body_text());
        }
        if let Some(report) = progress {
            report(message.span.offset + message.span.length, total);
        }
    }

    if let Err(e) = write_index(mbox_path, config, &index) {
        warn!(error = %e, "Could not write index file; continuing without persistence");
    }

    Ok(index)
}

/// Attempt to load an existing index. Returns `None` if the index is missing
/// or stale.
pub fn load_index(mbox_path: &Path, config: &Config) -> Result<Option<FolderIndex>> {
    let idx_path = index_path_for(mbox_path);
    if !idx_path.exists() {
        let cache_path = cache_index_path_for(mbox_path, config);
        if cache_path.exists() {
            return load_index_from_file(&cache_path, mbox_path);
        }
        return Ok(None);
    }
    load_index_from_file(&idx_path, mbox_path)
}

/// Load and validate an index from a specific file.
fn load_index_from_file(idx_path: &Path, mbox_path: &Path) -> Result<Option<FolderIndex>> {
    let data = std::fs::read(idx_path).map_err(|e| SearchError::io(idx_path, e))?;

    if data.len() < HEADER_SIZE {
        debug!("Index file too small");
        return Ok(None);
    }

    let header: IndexHeader =
        bincode::deserialize(&data[..HEADER_SIZE]).map_err(|e| SearchError::InvalidIndex {
            path: idx_path.to_path_buf(),
            reason: format!("Header deserialization failed: {e}"),
        })?;

    if let Err(reason) = header.validate() {
        debug!(reason = %reason, "Index header invalid");
        return Ok(None);
    }

    let (size, mtime) = mbox_stamp(mbox_path)?;
    if header.mbox_file_size != size {
        debug!("Mbox file size changed");
        return Ok(None);
    }
    if header.mbox_modified_time != mtime {
        debug!("Mbox modification time changed");
        return Ok(None);
    }
    if header.sha256_first_4kb != sha256_first_n(mbox_path, HASH_PREFIX_LEN)? {
        debug!("Mbox content hash changed");
        return Ok(None);
    }

    let index: FolderIndex =
        bincode::deserialize(&data[HEADER_SIZE..]).map_err(|e| SearchError::InvalidIndex {
            path: idx_path.to_path_buf(),
            reason: format!("Payload deserialization failed: {e}"),
        })?;

    if index.infos.len() as u64 != header.message_count
        || index.words.is_some() != header.has_word_index()
    {
        debug!("Index header does not describe its payload");
        return Ok(None);
    }

    Ok(Some(index))
}

/// Write the index to disk, next to the mbox if possible, else in the cache
/// directory.
fn write_index(mbox_path: &Path, config: &Config, index: &FolderIndex) -> Result<()> {
    let (size, mtime) = mbox_stamp(mbox_path)?;
    let header = IndexHeader {
        magic: *MAGIC,
        version: VERSION,
        flags: if index.words.is_some() { FLAG_WORD_INDEX } else { 0 },
        message_count: index.infos.len() as u64,
        mbox_file_size: size,
        mbox_modified_time: mtime,
        sha256_first_4kb: sha256_first_n(mbox_path, HASH_PREFIX_LEN)?,
    };

    let encode = |e: bincode::Error| SearchError::InvalidIndex {
        path: mbox_path.to_path_buf(),
        reason: format!("Serialization failed: {e}"),
    };
    let header_bytes = bincode::serialize(&header).map_err(encode)?;
    let payload = bincode::serialize(index).map_err(encode)?;

    // Pad header to HEADER_SIZE
    let mut padded_header = vec![0u8; HEADER_SIZE];
    let copy_len = header_bytes.len().min(HEADER_SIZE);
    padded_header[..copy_len].copy_from_slice(&header_bytes[..copy_len]);

    let idx_path = index_path_for(mbox_path);
    match write_index_to_file(&idx_path, &padded_header, &payload) {
        Ok(()) => {
            info!(path = %idx_path.display(), "Index written");
            return Ok(());
        }
        Err(e) => {
            debug!(error = %e, "Cannot write index next to mbox, trying cache dir");
        }
    }

    let cache_path = cache_index_path_for(mbox_path, config);
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SearchError::io(parent, e))?;
    }
    write_index_to_file(&cache_path, &padded_header, &payload)?;
    info!(path = %cache_path.display(), "Index written to cache");
    Ok(())
}

fn write_index_to_file(path: &Path, header: &[u8], payload: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| SearchError::io(path, e))?;
    file.write_all(header).map_err(|e| SearchError::io(path, e))?;
    file.write_all(payload).map_err(|e| SearchError::io(path, e))?;
    file.flush().map_err(|e| SearchError::io(path, e))?;
    Ok(())
}

/// Size and modification time (Unix seconds) of the mbox file.
fn mbox_stamp(mbox_path: &Path) -> Result<(u64, i64)> {
    let meta = std::fs::metadata(mbox_path).map_err(|e| SearchError::io(mbox_path, e))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((meta.len(), mtime))
}

/// Compute SHA-256 of the first `n` bytes of a file.
fn sha256_first_n(path: &Path, n: usize) -> Result<[u8; 32]> {
    let mut file = File::open(path).map_err(|e| SearchError::io(path, e))?;
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = file
            .read(&mut buf[filled..])
            .map_err(|e| SearchError::io(path, e))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    let mut hasher = Sha256::new();
    hasher.update(&buf[..filled]);
    Ok(hasher.finalize().into())
}

/// Primary index path: hidden file next to the mbox.
///
/// Example: `/data/inbox.mbox` → `/data/.inbox.mbox.mailsearch.idx`
pub fn index_path_for(mbox_path: &Path) -> PathBuf {
    let filename = mbox_path.file_name().unwrap_or_default().to_string_lossy();
    mbox_path.with_file_name(format!(".{filename}.mailsearch.idx"))
}

/// Fallback index path inside the cache directory, keyed by a hash of the
/// mbox path.
pub fn cache_index_path_for(mbox_path: &Path, config: &Config) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(mbox_path.to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    cache_dir(config).join(format!("{hash}.idx"))
}

/// Size in bytes of the index file for the given mbox (0 if missing).
pub fn index_file_size(mbox_path: &Path, config: &Config) -> u64 {
    std::fs::metadata(index_path_for(mbox_path))
        .or_else(|_| std::fs::metadata(cache_index_path_for(mbox_path, config)))
        .map(|m| m.len())
        .unwrap_or(0)
}
