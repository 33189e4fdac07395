//! Query routing: decide per query whether the memory evaluator or the SQL
//! backing store answers it, then normalize the result order.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::evaluator::Evaluator;
use super::result::SearchValue;
use crate::error::{Result, SearchError};
use crate::folder::Folder;
use crate::sexp::{self, Term};
use crate::sql::{select_sql, RecursiveCompiler, SqlCompiler};

/// Expression used when the caller gives none.
pub const MATCH_EVERYTHING: &str = "(match-all)";

/// Builtins that only the memory evaluator implements.
const MEMORY_ONLY_FUNCTIONS: [&str; 9] = [
    "body-contains",
    "body-regex",
    "match-threads",
    "message-location",
    "header-soundex",
    "header-regex",
    "header-full-regex",
    "header-contains",
    "header-has-words",
];

/// Whether the expression text names a memory-only builtin.
///
/// A plain substring test over the unparsed text: a quoted value that
/// happens to spell one of these names also routes to memory, which is
/// slower but never wrong.
pub fn needs_memory(expression: &str) -> bool {
    MEMORY_ONLY_FUNCTIONS
        .iter()
        .any(|function| expression.contains(function))
}

/// Which execution path answers a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Memory,
    Database,
}

/// Pick the execution path for one query.
pub fn route(folder: &dyn Folder, expression: &str, subset: Option<&[String]>) -> Route {
    if folder.is_memory_only()
        || folder.store().is_none()
        || subset.is_some_and(|s| !s.is_empty())
        || needs_memory(expression)
    {
        Route::Memory
    } else {
        Route::Database
    }
}

/// Search entry point for one folder.
///
/// Holds the last parsed expression so repeating the same text skips the
/// parser, and a cancellation flag that other threads may raise through
/// [`FolderSearch::cancel_handle`]. The flag is lowered again when each call
/// returns.
pub struct FolderSearch {
    last: Option<(String, Rc<Term>)>,
    compiler: Box<dyn SqlCompiler>,
    cancel: Arc<AtomicBool>,
    now: Option<i64>,
}

impl Default for FolderSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderSearch {
    pub fn new() -> Self {
        Self {
            last: None,
            compiler: Box::new(RecursiveCompiler::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            now: None,
        }
    }

    /// Use another SQL compiler for the database path.
    pub fn with_compiler(mut self, compiler: Box<dyn SqlCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Pin the clock of the memory evaluator.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Uids matching `expression`, in summary order (or in `subset` order
    /// when a subset is given). Empty text matches everything.
    pub fn search(
        &mut self,
        folder: &mut dyn Folder,
        expression: &str,
        subset: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let expression = effective(expression);
        let result = match route(folder, expression, subset) {
            Route::Memory => self.search_memory(folder, expression, subset),
            Route::Database => self.search_database(folder, expression),
        };
        self.cancel.store(false, Ordering::Relaxed);
        result
    }

    /// Number of messages matching `expression`.
    pub fn count(&mut self, folder: &mut dyn Folder, expression: &str) -> Result<u64> {
        let expression = effective(expression);
        let result = match route(folder, expression, None) {
            Route::Memory => self
                .search_memory(folder, expression, None)
                .map(|uids| uids.len() as u64),
            Route::Database => self.count_database(folder, expression),
        };
        self.cancel.store(false, Ordering::Relaxed);
        result
    }

    fn parsed(&mut self, expression: &str) -> Result<Rc<Term>> {
        if let Some((text, term)) = &self.last {
            if text == expression {
                return Ok(Rc::clone(term));
            }
        }
        let term = Rc::new(sexp::parse(expression)?);
        self.last = Some((expression.to_string(), Rc::clone(&term)));
        Ok(term)
    }

    fn search_memory(
        &mut self,
        folder: &dyn Folder,
        expression: &str,
        subset: Option<&[String]>,
    ) -> Result<Vec<String>> {
        debug!(expression, "Evaluating in memory");
        let term = self.parsed(expression)?;
        let working: Vec<String> = match subset {
            Some(uids) if !uids.is_empty() => uids
                .iter()
                .filter(|uid| folder.info(uid).is_some())
                .cloned()
                .collect(),
            _ => folder.uids(),
        };

        let mut evaluator = Evaluator::new(folder, &working).with_cancel(&self.cancel);
        if let Some(now) = self.now {
            evaluator = evaluator.with_now(now);
        }
        match evaluator.evaluate(&term)? {
            SearchValue::Uids(hits) => Ok(working.into_iter().filter(|uid| hits.contains(uid)).collect()),
            SearchValue::Bool(true) => Ok(working),
            SearchValue::Bool(false) => Ok(Vec::new()),
            other => Err(SearchError::type_error(
                "search",
                format!("expression evaluates to {}, not a uid array", other.kind()),
            )),
        }
    }

    /// Compile for the store, or `None` when the memory path must answer.
    fn compile(&mut self, folder: &mut dyn Folder, expression: &str) -> Result<Option<String>> {
        folder.save_changes()?;
        match self.compiler.compile(expression) {
            Ok(fragment) => Ok(Some(fragment)),
            Err(SearchError::UnknownFunction(function)) => {
                debug!(%function, "No SQL form, falling back to memory");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn search_database(&mut self, folder: &mut dyn Folder, expression: &str) -> Result<Vec<String>> {
        let Some(fragment) = self.compile(folder, expression)? else {
            return self.search_memory(folder, expression, None);
        };
        let Some(store) = folder.store() else {
            return self.search_memory(folder, expression, None);
        };
        if self.cancel.load(Ordering::Relaxed) {
            return Err(SearchError::Cancelled);
        }

        let sql = select_sql("uid", folder.table_name(), &fragment);
        debug!(compiler = self.compiler.name(), %sql, "Querying backing store");
        let mut hits = HashSet::new();
        match store.select(&sql, &mut |uid| {
            hits.insert(uid.to_string());
        }) {
            Ok(()) => {}
            Err(SearchError::MissingTable(table)) => {
                debug!(%table, "Folder has no table yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        }
        Ok(folder.uids().into_iter().filter(|uid| hits.contains(uid)).collect())
    }

    fn count_database(&mut self, folder: &mut dyn Folder, expression: &str) -> Result<u64> {
        let Some(fragment) = self.compile(folder, expression)? else {
            return self.search_memory(folder, expression, None).map(|uids| uids.len() as u64);
        };
        let Some(store) = folder.store() else {
            return self.search_memory(folder, expression, None).map(|uids| uids.len() as u64);
        };
        if self.cancel.load(Ordering::Relaxed) {
            return Err(SearchError::Cancelled);
        }

        let sql = select_sql("COUNT(*)", folder.table_name(), &fragment);
        debug!(%sql, "Counting in backing store");
        match store.count(&sql) {
            Err(SearchError::MissingTable(table)) => {
                debug!(%table, "Folder has no table yet");
                Ok(0)
            }
            other => other,
        }
    }
}

fn effective(expression: &str) -> &str {
    if expression.trim().is_empty() {
        MATCH_EVERYTHING
    } else {
        expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::flags::SystemFlags;
    use crate::store::{MailFolder, SqliteStore};

    fn raw(n: usize, subject: &str) -> (String, Vec<u8>) {
        (
            n.to_string(),
            format!(
                "From a@example.org Thu Jan  4 10:00:00 2024\nSubject: {subject}\nFrom: a@example.org\n\nbody {n}\n"
            )
            .into_bytes(),
        )
    }

    fn folder() -> MailFolder {
        let mut f = MailFolder::from_messages(
            "mbox:///tmp/route",
            vec![raw(1, "one"), raw(2, "two"), raw(3, "three")],
        );
        f.set_flag("2", SystemFlags::DELETED, true);
        f
    }

    #[test]
    fn test_needs_memory() {
        assert!(needs_memory(r#"(match-all (body-contains "x"))"#));
        assert!(needs_memory(r#"(match-threads "all" (match-all))"#));
        assert!(needs_memory(r#"(match-all (header-contains "subject" "x"))"#));
        // Conservative: a value spelling a builtin name counts too
        assert!(needs_memory(r#"(match-all (user-flag "body-regex"))"#));
        assert!(!needs_memory(r#"(match-all (system-flag "deleted"))"#));
        assert!(!needs_memory(r#"(match-all (header-matches "to" "x"))"#));
    }

    #[test]
    fn test_route_decisions() {
        let mut f = folder();
        let flag = r#"(match-all (system-flag "deleted"))"#;
        assert_eq!(route(&f, flag, None), Route::Memory);

        f.attach_store(SqliteStore::open_in_memory().expect("store"));
        assert_eq!(route(&f, flag, None), Route::Database);
        assert_eq!(route(&f, flag, Some(&[][..])), Route::Database);
        assert_eq!(route(&f, flag, Some(&["1".to_string()][..])), Route::Memory);
        assert_eq!(route(&f, r#"(body-contains "x")"#, None), Route::Memory);

        f.set_memory_only(true);
        assert_eq!(route(&f, flag, None), Route::Memory);
    }

    #[test]
    fn test_memory_search_and_subset_order() {
        let mut f = folder();
        let mut search = FolderSearch::new();
        let expr = r#"(match-all (not (system-flag "deleted")))"#;
        assert_eq!(search.search(&mut f, expr, None).expect("search"), ["1", "3"]);

        let subset = vec!["3".to_string(), "2".to_string(), "1".to_string()];
        assert_eq!(search.search(&mut f, expr, Some(&subset)).expect("search"), ["3", "1"]);
        assert_eq!(search.search(&mut f, "", None).expect("search"), ["1", "2", "3"]);
        assert_eq!(search.count(&mut f, expr).expect("count"), 2);
    }

    #[test]
    fn test_database_search() {
        let mut f = folder();
        f.attach_store(SqliteStore::open_in_memory().expect("store"));
        let mut search = FolderSearch::new();
        let expr = r#"(match-all (system-flag "deleted"))"#;
        assert_eq!(search.search(&mut f, expr, None).expect("search"), ["2"]);
        assert_eq!(search.count(&mut f, expr).expect("count"), 1);

        // Changes are flushed before compiling
        f.set_flag("3", SystemFlags::DELETED, true);
        assert_eq!(search.search(&mut f, expr, None).expect("search"), ["2", "3"]);
    }

    #[test]
    fn test_missing_table_is_empty() {
        // Nothing changed since loading, so nothing is flushed
        let mut f = MailFolder::from_messages("mbox:///tmp/unsynced", vec![raw(1, "one")]);
        f.attach_store(SqliteStore::open_in_memory().expect("store"));
        let mut search = FolderSearch::new();
        assert!(search.search(&mut f, "(match-all)", None).expect("search").is_empty());
        assert_eq!(search.count(&mut f, "(match-all)").expect("count"), 0);
    }

    #[test]
    fn test_unknown_sql_function_falls_back() {
        let mut f = folder();
        f.attach_store(SqliteStore::open_in_memory().expect("store"));
        let mut search = FolderSearch::new();
        // uid has no SQL lowering
        assert_eq!(search.search(&mut f, r#"(uid "3" "1")"#, None).expect("search"), ["1", "3"]);
    }

    #[test]
    fn test_errors_and_cancel() {
        let mut f = folder();
        let mut search = FolderSearch::new();
        assert!(matches!(search.search(&mut f, "(match-all", None), Err(SearchError::Parse { .. })));
        assert!(matches!(search.search(&mut f, "42", None), Err(SearchError::Type { .. })));

        search.cancel_handle().store(true, Ordering::Relaxed);
        assert!(matches!(search.search(&mut f, "(match-all)", None), Err(SearchError::Cancelled)));
        // Lowered again for the next call
        assert_eq!(search.search(&mut f, "(match-all)", None).expect("search").len(), 3);
    }
}
