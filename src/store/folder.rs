//! Concrete searchable folder: summary records, a message source, and an LRU
//! cache of decoded messages.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use lru::LruCache;
use tracing::{debug, warn};

use super::sqlite::SqliteStore;
use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::folder::{BackingStore, BodyIndex, Folder};
use crate::index::{build_index, FolderIndex};
use crate::model::message::{MessageInfo, MimeMessage};
use crate::parser::header::message_info_from_raw;
use crate::parser::mbox::read_span;
use crate::parser::mime::parse_full_message;
use crate::search::word_index::WordIndex;

/// Default number of decoded messages to keep in the LRU cache.
const DEFAULT_CACHE_SIZE: usize = 50;

/// Where full messages come from.
enum Source {
    /// Raw messages held in memory, by uid.
    Memory(HashMap<String, Vec<u8>>),
    /// An mbox file; each summary record carries its byte span.
    Mbox(PathBuf),
}

/// A folder loaded from an mbox file or built from raw messages.
///
/// Metadata changes (flags, labels, tags) mark the folder dirty; the next
/// [`Folder::save_changes`] writes the summary to the attached store.
pub struct MailFolder {
    location: String,
    table: String,
    infos: Vec<MessageInfo>,
    positions: HashMap<String, usize>,
    source: Source,
    cache: RefCell<LruCache<String, Rc<MimeMessage>>>,
    words: Option<WordIndex>,
    store: Option<SqliteStore>,
    memory_only: bool,
    dirty: bool,
    unavailable: HashSet<String>,
}

impl MailFolder {
    fn new(location: String, table: String, infos: Vec<MessageInfo>, source: Source, cache_size: usize) -> Self {
        let positions = infos
            .iter()
            .enumerate()
            .map(|(i, info)| (info.uid.clone(), i))
            .collect();
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            location,
            table,
            infos,
            positions,
            source,
            cache: RefCell::new(LruCache::new(capacity)),
            words: None,
            store: None,
            memory_only: false,
            dirty: false,
            unavailable: HashSet::new(),
        }
    }

    /// Build a folder from `(uid, raw message)` pairs, kept in the given order.
    pub fn from_messages(location: &str, messages: Vec<(String, Vec<u8>)>) -> Self {
        let infos = messages
            .iter()
            .map(|(uid, raw)| message_info_from_raw(uid, raw, None))
            .collect();
        let table = table_name_for(location.rsplit('/').next().unwrap_or_default());
        Self::new(
            location.to_string(),
            table,
            infos,
            Source::Memory(messages.into_iter().collect()),
            DEFAULT_CACHE_SIZE,
        )
    }

    /// Open an mbox file, loading or building its persisted index, and
    /// attach the configured backing store.
    pub fn open_mbox(path: &Path, config: &Config) -> Result<Self> {
        let index = build_index(path, config, false, None)?;
        Self::from_index(path, index, config)
    }

    /// Wrap an already built index of the mbox at `path`.
    pub fn from_index(path: &Path, index: FolderIndex, config: &Config) -> Result<Self> {
        let absolute = std::fs::canonicalize(path).map_err(|e| SearchError::io(path, e))?;
        let stem = absolute
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let table = config
            .store
            .table
            .clone()
            .unwrap_or_else(|| table_name_for(&stem));

        let mut folder = Self::new(
            format!("mbox://{}", absolute.display()),
            table,
            index.infos,
            Source::Mbox(absolute),
            config.performance.lru_cache_size,
        );
        folder.words = index.words;
        folder.memory_only = config.search.memory_only;
        if let Some(db) = &config.store.database {
            folder.store = Some(SqliteStore::open(db)?);
        }
        debug!(
            location = %folder.location,
            messages = folder.infos.len(),
            indexed = folder.words.is_some(),
            "Opened folder"
        );
        Ok(folder)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn attach_store(&mut self, store: SqliteStore) {
        self.store = Some(store);
    }

    pub fn set_memory_only(&mut self, memory_only: bool) {
        self.memory_only = memory_only;
    }

    pub fn set_table_name(&mut self, table: &str) {
        self.table = table.to_string();
    }

    pub fn word_index(&self) -> Option<&WordIndex> {
        self.words.as_ref()
    }

    fn info_mut(&mut self, uid: &str) -> Option<&mut MessageInfo> {
        let i = *self.positions.get(uid)?;
        self.dirty = true;
        self.infos.get_mut(i)
    }

    /// Set or clear a [`crate::model::flags::SystemFlags`] bit.
    pub fn set_flag(&mut self, uid: &str, bit: u32, on: bool) {
        if let Some(info) = self.info_mut(uid) {
            info.flags.set(bit, on);
        }
    }

    pub fn add_user_flag(&mut self, uid: &str, flag: &str) {
        if let Some(info) = self.info_mut(uid) {
            info.user_flags.insert(flag.to_string());
        }
    }

    /// Set a user tag; an empty value removes it.
    pub fn set_user_tag(&mut self, uid: &str, name: &str, value: &str) {
        if let Some(info) = self.info_mut(uid) {
            if value.is_empty() {
                info.user_tags.remove(name);
            } else {
                info.user_tags.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// Make a message's content unfetchable, as if it were expunged
    /// or the folder went offline. Its summary record stays.
    pub fn drop_content(&mut self, uid: &str) {
        self.cache.borrow_mut().pop(uid);
        self.unavailable.insert(uid.to_string());
    }

    /// Index the decoded body of every message. Messages that cannot be
    /// fetched are left out.
    pub fn build_word_index(&mut self) {
        let mut words = WordIndex::new();
        for info in &self.infos {
            match self.fetch(&info.uid) {
                Ok(message) => words.add_message(&info.uid, &message.body_text()),
                Err(e) => warn!(uid = %info.uid, error = %e, "Message left out of word index"),
            }
        }
        debug!(words = words.word_count(), "Built word index");
        self.words = Some(words);
    }

    /// Write the whole summary to the attached store.
    pub fn sync_store(&mut self) -> Result<usize> {
        let Some(store) = self.store.as_mut() else {
            return Ok(0);
        };
        let written = store.sync(&self.table, &self.infos)?;
        self.dirty = false;
        Ok(written)
    }

    fn read_raw(&self, info: &MessageInfo) -> Result<Vec<u8>> {
        match &self.source {
            Source::Memory(messages) => messages
                .get(&info.uid)
                .cloned()
                .ok_or_else(|| SearchError::FetchUnavailable(info.uid.clone())),
            Source::Mbox(path) => match info.span {
                Some(span) => read_span(path, span),
                None => Err(SearchError::FetchUnavailable(info.uid.clone())),
            },
        }
    }
}

impl Folder for MailFolder {
    fn uids(&self) -> Vec<String> {
        self.infos.iter().map(|i| i.uid.clone()).collect()
    }

    fn info(&self, uid: &str) -> Option<&MessageInfo> {
        self.positions.get(uid).and_then(|&i| self.infos.get(i))
    }

    fn infos(&self) -> Vec<&MessageInfo> {
        self.infos.iter().collect()
    }

    fn fetch(&self, uid: &str) -> Result<Rc<MimeMessage>> {
        if self.unavailable.contains(uid) {
            return Err(SearchError::FetchUnavailable(uid.to_string()));
        }
        if let Some(message) = self.cache.borrow_mut().get(uid) {
            return Ok(Rc::clone(message));
        }
        let info = self
            .info(uid)
            .ok_or_else(|| SearchError::FetchUnavailable(uid.to_string()))?;
        let message = Rc::new(parse_full_message(&self.read_raw(info)?));
        self.cache
            .borrow_mut()
            .put(uid.to_string(), Rc::clone(&message));
        Ok(message)
    }

    fn save_changes(&mut self) -> Result<()> {
        if self.dirty && self.store.is_some() {
            self.sync_store()?;
        }
        Ok(())
    }

    fn is_memory_only(&self) -> bool {
        self.memory_only
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn body_index(&self) -> Option<&dyn BodyIndex> {
        self.words.as_ref().map(|w| w as &dyn BodyIndex)
    }

    fn store(&self) -> Option<&dyn BackingStore> {
        self.store.as_ref().map(|s| s as &dyn BackingStore)
    }
}

/// SQL-safe table name derived from a folder name.
fn table_name_for(name: &str) -> String {
    let mut table: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if table.is_empty() {
        table.push_str("folder");
    }
    if table.starts_with(|c: char| c.is_ascii_digit()) {
        table.insert_str(0, "f_");
    }
    table
}
