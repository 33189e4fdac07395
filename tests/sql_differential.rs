//! Differential tests: the memory evaluator and both SQL compilers must
//! select the same messages from the fixture mailbox.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use mailsearch::config::Config;
use mailsearch::folder::Folder;
use mailsearch::index::builder;
use mailsearch::search::{Evaluator, SearchValue};
use mailsearch::sexp;
use mailsearch::sql::{select_sql, LegacyCompiler, RecursiveCompiler, SqlCompiler};
use mailsearch::store::{MailFolder, SqliteStore};

/// Fixed clock: 2024-02-01T00:00:00Z.
const NOW: i64 = 1_706_745_600;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn synced_folder(tmp: &TempDir) -> MailFolder {
    let path = tmp.path().join("search.mbox");
    std::fs::copy(fixture("search.mbox"), &path).unwrap();
    let mut config = Config::default();
    config.general.cache_dir = Some(tmp.path().join("cache"));
    let index = builder::build_index(&path, &config, true, None).unwrap();
    let mut folder = MailFolder::from_index(&path, index, &config).unwrap();
    folder.set_user_tag("3", "label", "personal");
    folder.attach_store(SqliteStore::open_in_memory().unwrap());
    folder.sync_store().unwrap();
    folder
}

fn memory(folder: &MailFolder, expression: &str) -> Vec<String> {
    let uids = folder.uids();
    let term = sexp::parse(expression).unwrap();
    let value = Evaluator::new(folder, &uids)
        .with_now(NOW)
        .evaluate(&term)
        .unwrap();
    match value {
        SearchValue::Uids(hits) => uids.into_iter().filter(|u| hits.contains(u)).collect(),
        SearchValue::Bool(true) => uids,
        SearchValue::Bool(false) => Vec::new(),
        other => panic!("{expression} evaluated to {other:?}"),
    }
}

fn database(folder: &MailFolder, compiler: &dyn SqlCompiler, expression: &str) -> Vec<String> {
    let fragment = compiler
        .compile(expression)
        .unwrap_or_else(|e| panic!("{} failed on {expression}: {e}", compiler.name()));
    let sql = select_sql("uid", folder.table_name(), &fragment);
    let mut hits = Vec::new();
    folder
        .store()
        .unwrap()
        .select(&sql, &mut |uid| hits.push(uid.to_string()))
        .unwrap_or_else(|e| panic!("{sql}: {e}"));
    folder.uids().into_iter().filter(|u| hits.contains(u)).collect()
}

const CORPUS: [(&str, &[&str]); 23] = [
    (r#"(match-all (system-flag "deleted"))"#, &["7"]),
    (r#"(match-all (not (system-flag "seen")))"#, &["3", "5"]),
    (
        r#"(match-all (and (system-flag "seen") (not (system-flag "deleted"))))"#,
        &["1", "2", "4", "6", "8"],
    ),
    (
        r#"(match-all (or (system-flag "junk") (system-flag "flagged")))"#,
        &["4", "5"],
    ),
    (r#"(match-all (user-flag "work"))"#, &["1", "8"]),
    (
        r#"(match-all (header-matches "subject" "lunch on friday"))"#,
        &["3"],
    ),
    (
        r#"(match-all (header-starts-with "subject" "re:"))"#,
        &["2", "4"],
    ),
    (
        r#"(match-all (header-ends-with "subject" "budget"))"#,
        &["1", "2", "4"],
    ),
    (
        r#"(match-all (> (get-sent-date) (make-time "2024-01-11")))"#,
        &["5", "6", "7", "8"],
    ),
    (
        "(match-all (< (get-size) 100))",
        &["1", "2", "3", "4", "5", "6", "7", "8"],
    ),
    (r#"(match-all (header-exists "cc"))"#, &["4", "6"]),
    (
        r#"(match-all (= (user-tag "label") "personal"))"#,
        &["3"],
    ),
    (
        r#"(match-all (header-contains "x-camel-mlist" "rust-users"))"#,
        &["6"],
    ),
    (r#"(match-all (header-contains "from" "bob"))"#, &["2"]),
    (r#"(not (match-all (system-flag "seen")))"#, &["3", "5"]),
    (
        r#"(match-all (and (system-flag "seen") (or (user-flag "finance") (system-flag "answered"))))"#,
        &["2", "8"],
    ),
    (
        r#"(and (match-all (system-flag "seen")) (match-all #t))"#,
        &["1", "2", "4", "6", "7", "8"],
    ),
    (
        r#"(match-all (> (get-received-date) (- (make-time "2024-01-13") 86400)))"#,
        &["6", "7", "8"],
    ),
    (
        r#"(match-all (not (user-flag "work")))"#,
        &["2", "3", "4", "5", "6", "7"],
    ),
    (
        r#"(match-all (= (user-tag "follow-up") ""))"#,
        &["1", "2", "3", "4", "5", "6", "7", "8"],
    ),
    (
        r#"(match-all (not (= (user-tag "label") "personal")))"#,
        &["1", "2", "4", "5", "6", "7", "8"],
    ),
    (r#"(match-all (and #f (system-flag "junk")))"#, &[]),
    (
        r#"(match-all (or #t (system-flag "junk")))"#,
        &["1", "2", "3", "4", "5", "6", "7", "8"],
    ),
];

// ─── Test 1: Memory evaluator answers the corpus ───────────────────

#[test]
fn test_memory_corpus() {
    let tmp = TempDir::new().unwrap();
    let folder = synced_folder(&tmp);
    for (expression, expected) in CORPUS {
        assert_eq!(memory(&folder, expression), expected, "{expression}");
    }
}

// ─── Test 2: Both compilers agree with the memory path ─────────────

#[test]
fn test_compilers_match_memory() {
    let tmp = TempDir::new().unwrap();
    let folder = synced_folder(&tmp);
    let recursive = RecursiveCompiler::new().with_now(NOW);
    let legacy = LegacyCompiler::new().with_now(NOW);
    for (expression, _) in CORPUS {
        let expected = memory(&folder, expression);
        assert_eq!(database(&folder, &recursive, expression), expected, "recursive: {expression}");
        assert_eq!(database(&folder, &legacy, expression), expected, "legacy: {expression}");
    }
}

// ─── Test 3: Encodings only SQL understands still agree ────────────

#[test]
fn test_compilers_agree_on_tag_encodings() {
    let tmp = TempDir::new().unwrap();
    let mut folder = synced_folder(&tmp);
    folder.set_user_tag("2", "follow-up", "call back");
    folder.set_user_tag("4", "follow-up", "reply");
    folder.set_user_tag("4", "completed-on", "1705000000");
    folder.sync_store().unwrap();

    let recursive = RecursiveCompiler::new().with_now(NOW);
    let legacy = LegacyCompiler::new().with_now(NOW);
    for expression in [
        r#"(match-all (= (user-tag "follow-up") ""))"#,
        r#"(match-all (not (= (user-tag "follow-up") "")))"#,
        r#"(match-all (and (not (= (user-tag "follow-up") "")) (= (user-tag "completed-on") 0)))"#,
        r#"(match-all (< (get-sent-date) (get-relative-months -1)))"#,
    ] {
        assert_eq!(
            database(&folder, &recursive, expression),
            database(&folder, &legacy, expression),
            "{expression}"
        );
    }
    let untagged = r#"(match-all (= (user-tag "follow-up") ""))"#;
    assert_eq!(database(&folder, &recursive, untagged), memory(&folder, untagged));
    assert_eq!(
        database(&folder, &recursive, untagged),
        ["1", "3", "5", "6", "7", "8"]
    );
}
