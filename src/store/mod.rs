//! Concrete collaborators of the search engine: the mail folder and the
//! SQLite backing store.

pub mod folder;
pub mod sqlite;

pub use folder::MailFolder;
pub use sqlite::SqliteStore;
