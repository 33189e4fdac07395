//! SQLite backing store: one table per folder with the historical column set.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::{Result, SearchError};
use crate::folder::BackingStore;
use crate::model::flags::SystemFlags;
use crate::model::message::MessageInfo;
use crate::sql::quote_identifier;

/// Column definitions, in insert order.
const COLUMNS: [(&str, &str); 18] = [
    ("uid", "TEXT PRIMARY KEY"),
    ("flags", "INTEGER"),
    ("read", "INTEGER"),
    ("deleted", "INTEGER"),
    ("replied", "INTEGER"),
    ("important", "INTEGER"),
    ("junk", "INTEGER"),
    ("attachment", "INTEGER"),
    ("size", "INTEGER"),
    ("dsent", "INTEGER"),
    ("dreceived", "INTEGER"),
    ("subject", "TEXT"),
    ("mail_from", "TEXT"),
    ("mail_to", "TEXT"),
    ("mail_cc", "TEXT"),
    ("mlist", "TEXT"),
    ("labels", "TEXT"),
    ("usertags", "TEXT"),
];

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened backing store");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create the folder table if it does not exist yet.
    pub fn create_table(&self, table: &str) -> Result<()> {
        let columns = COLUMNS
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns})",
            quote_identifier(table)
        ))?;
        Ok(())
    }

    /// Replace the rows of `table` with one row per summary record.
    ///
    /// Empty header text is stored as NULL so `IS NOT NULL` tests mean
    /// "header present". `labels` and `usertags` always hold text, so
    /// negated and `NOT LIKE` tests still see untagged rows.
    pub fn sync<'a>(
        &mut self,
        table: &str,
        infos: impl IntoIterator<Item = &'a MessageInfo>,
    ) -> Result<usize> {
        self.create_table(table)?;
        let table = quote_identifier(table);
        let placeholders = vec!["?"; COLUMNS.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DELETE FROM {table}"), [])?;
        let mut written = 0;
        {
            let mut insert = tx.prepare(&format!("INSERT INTO {table} VALUES ({placeholders})"))?;
            for info in infos {
                let flag = |bit: u32| i64::from(info.flags.contains(bit));
                let labels = info.labels_column();
                let usertags = info.usertags_column();
                insert.execute(params![
                    info.uid,
                    i64::from(info.flags.bits()),
                    flag(SystemFlags::SEEN),
                    flag(SystemFlags::DELETED),
                    flag(SystemFlags::ANSWERED),
                    flag(SystemFlags::FLAGGED),
                    flag(SystemFlags::JUNK),
                    flag(SystemFlags::ATTACHMENTS),
                    i64::try_from(info.size).unwrap_or(i64::MAX),
                    info.date_sent,
                    info.date_received,
                    non_empty(&info.subject),
                    non_empty(&info.from),
                    non_empty(&info.to),
                    non_empty(&info.cc),
                    non_empty(&info.mlist),
                    labels,
                    usertags,
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        info!(table = %table, rows = written, "Synchronized folder table");
        Ok(written)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl BackingStore for SqliteStore {
    fn execute(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        u64::try_from(n).map_err(|_| SearchError::Store(format!("negative count {n}")))
    }

    fn select(&self, sql: &str, row: &mut dyn FnMut(&str)) -> Result<()> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            match r.get_ref(0)? {
                ValueRef::Text(bytes) => row(&String::from_utf8_lossy(bytes)),
                ValueRef::Integer(n) => row(&n.to_string()),
                ValueRef::Real(x) => row(&x.to_string()),
                ValueRef::Null | ValueRef::Blob(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(uid: &str, subject: &str, flags: u32) -> MessageInfo {
        let mut info = MessageInfo::new(uid);
        info.subject = subject.to_string();
        info.flags = SystemFlags::new(flags);
        info.size = 4096;
        info
    }

    #[test]
    fn test_sync_and_select() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let infos = [
            info("1", "hello", SystemFlags::SEEN),
            info("2", "", SystemFlags::DELETED | SystemFlags::JUNK),
        ];
        assert_eq!(store.sync("inbox", &infos).expect("sync"), 2);

        let mut uids = Vec::new();
        store
            .select("SELECT uid FROM \"inbox\" WHERE subject IS NULL", &mut |uid| {
                uids.push(uid.to_string())
            })
            .expect("select");
        assert_eq!(uids, ["2"]);
        assert_eq!(
            store.count("SELECT COUNT(*) FROM \"inbox\" WHERE junk = 1").expect("count"),
            1
        );
        assert_eq!(
            store.count("SELECT COUNT(*) FROM \"inbox\" WHERE (size / 1024) = 4").expect("count"),
            2
        );

        // A second sync replaces the rows
        assert_eq!(store.sync("inbox", &infos[..1]).expect("sync"), 1);
        assert_eq!(store.count("SELECT COUNT(*) FROM \"inbox\"").expect("count"), 1);
    }

    #[test]
    fn test_untagged_rows_match_negated_filters() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let mut labelled = info("1", "a", 0);
        labelled.user_flags.insert("work".to_string());
        let mut tagged = info("2", "b", 0);
        tagged.user_tags.insert("follow-up".to_string(), "call".to_string());
        let plain = info("3", "c", 0);
        store.sync("inbox", [&labelled, &tagged, &plain]).expect("sync");

        let uids = |sql: &str| {
            let mut out = Vec::new();
            store.select(sql, &mut |uid| out.push(uid.to_string())).expect("select");
            out.sort();
            out
        };
        assert_eq!(
            uids("SELECT uid FROM \"inbox\" WHERE (NOT ((labels LIKE '%work%')))"),
            ["2", "3"]
        );
        assert_eq!(
            uids("SELECT uid FROM \"inbox\" WHERE ( usertags NOT LIKE '%follow-up%' )"),
            ["1", "3"]
        );
        assert_eq!(
            store
                .count("SELECT COUNT(*) FROM \"inbox\" WHERE labels IS NULL OR usertags IS NULL")
                .expect("count"),
            0
        );
    }

    #[test]
    fn test_missing_table_is_distinguished() {
        let store = SqliteStore::open_in_memory().expect("open");
        let err = store.count("SELECT COUNT(*) FROM \"nowhere\"").unwrap_err();
        assert!(matches!(err, SearchError::MissingTable(ref t) if t == "nowhere"), "{err}");
        let err = store.execute("SELECT FROM").unwrap_err();
        assert!(matches!(err, SearchError::Store(_)));
    }

    #[test]
    fn test_quote() {
        let store = SqliteStore::open_in_memory().expect("open");
        assert_eq!(store.quote("it's"), "'it''s'");
    }
}
