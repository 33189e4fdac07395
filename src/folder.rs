//! Collaborator interfaces consumed by the search engine.
//!
//! The router and evaluator only ever see a folder through these traits;
//! [`crate::store::MailFolder`] and [`crate::store::SqliteStore`] are the
//! concrete implementations shipped with the crate.

use std::rc::Rc;

use crate::error::Result;
use crate::model::message::{MessageInfo, MimeMessage};

/// A compiled body word index: vocabulary plus postings.
pub trait BodyIndex {
    /// Every indexed word.
    fn words(&self) -> Box<dyn Iterator<Item = &str> + '_>;

    /// Uids of the messages containing exactly this vocabulary word.
    fn postings(&self, word: &str) -> Box<dyn Iterator<Item = &str> + '_>;
}

/// The relational store holding one table per folder.
pub trait BackingStore {
    /// Run a statement that returns no rows.
    fn execute(&self, sql: &str) -> Result<()>;

    /// Run a `SELECT COUNT(*)` style query.
    fn count(&self, sql: &str) -> Result<u64>;

    /// Run a query and hand the first column of each row to `row`.
    fn select(&self, sql: &str, row: &mut dyn FnMut(&str)) -> Result<()>;

    /// Quote a string literal for inclusion in SQL text.
    fn quote(&self, value: &str) -> String {
        crate::sql::quote(value)
    }
}

/// A searchable message folder.
pub trait Folder {
    /// Uids in summary order.
    fn uids(&self) -> Vec<String>;

    /// Summary metadata for one message.
    fn info(&self, uid: &str) -> Option<&MessageInfo>;

    /// Every summary record, in summary order.
    fn infos(&self) -> Vec<&MessageInfo>;

    /// Fetch and decode a full message.
    ///
    /// Returns [`crate::error::SearchError::FetchUnavailable`] when the
    /// message cannot be provided right now.
    fn fetch(&self, uid: &str) -> Result<Rc<MimeMessage>>;

    /// Flush pending metadata changes to the backing store.
    fn save_changes(&mut self) -> Result<()>;

    /// The summary lives only in memory; never route queries to SQL.
    fn is_memory_only(&self) -> bool;

    /// Canonical location string, e.g. `mbox:///home/ana/mail/inbox`.
    fn location(&self) -> String;

    /// Table holding this folder's rows in the backing store.
    fn table_name(&self) -> &str;

    fn body_index(&self) -> Option<&dyn BodyIndex>;

    fn store(&self) -> Option<&dyn BackingStore>;
}
