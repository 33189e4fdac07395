//! Integration tests for index persistence: build, reload, staleness, and
//! the word-index flag.

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use predicates::prelude::*;

use mailsearch::config::Config;
use mailsearch::folder::Folder;
use mailsearch::index::builder;
use mailsearch::store::MailFolder;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn config_in(temp: &assert_fs::TempDir) -> Config {
    let mut config = Config::default();
    config.general.cache_dir = Some(temp.path().join("cache"));
    config
}

const EXTRA_MESSAGE: &str = "\nFrom hal@example.org Mon Jan 15 10:00:00 2024\n\
From: Hal <hal@example.org>\n\
To: ana@example.org\n\
Subject: One more thing\n\
Date: Mon, 15 Jan 2024 10:00:00 +0000\n\
Message-ID: <extra@example.org>\n\
\n\
Forgot the projector.\n";

// ─── Test 1: Build writes a hidden index next to the mbox ──────────

#[test]
fn test_build_writes_index() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mbox = temp.child("inbox.mbox");
    mbox.write_file(&fixture("search.mbox")).unwrap();
    let config = config_in(&temp);

    let index = builder::build_index(mbox.path(), &config, false, None).unwrap();
    assert_eq!(index.infos.len(), 8);
    assert!(index.words.is_some());
    assert_eq!(index.infos[0].uid, "1");
    assert_eq!(index.infos[7].uid, "8");

    temp.child(".inbox.mbox.mailsearch.idx")
        .assert(predicate::path::is_file());
    assert!(builder::index_file_size(mbox.path(), &config) > 0);
}

// ─── Test 2: Reload returns the same summary ───────────────────────

#[test]
fn test_reload_index() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mbox = temp.child("inbox.mbox");
    mbox.write_file(&fixture("search.mbox")).unwrap();
    let config = config_in(&temp);

    let built = builder::build_index(mbox.path(), &config, false, None).unwrap();
    let loaded = builder::load_index(mbox.path(), &config)
        .unwrap()
        .expect("fresh index should load");
    assert_eq!(loaded.infos.len(), built.infos.len());
    assert_eq!(loaded.infos[1].subject, "Re: Quarterly budget");
    assert_eq!(loaded.infos[1].in_reply_to.as_deref(), Some("budget-1@example.org"));
    assert!(loaded.words.is_some());
}

// ─── Test 3: Appending a message makes the index stale ─────────────

#[test]
fn test_stale_index_is_rebuilt() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mbox = temp.child("inbox.mbox");
    mbox.write_file(&fixture("search.mbox")).unwrap();
    let config = config_in(&temp);
    builder::build_index(mbox.path(), &config, false, None).unwrap();

    let mut text = std::fs::read_to_string(mbox.path()).unwrap();
    text.push_str(EXTRA_MESSAGE);
    mbox.write_str(&text).unwrap();

    assert!(builder::load_index(mbox.path(), &config).unwrap().is_none());
    let rebuilt = builder::build_index(mbox.path(), &config, false, None).unwrap();
    assert_eq!(rebuilt.infos.len(), 9);
    assert_eq!(rebuilt.infos[8].subject, "One more thing");
}

// ─── Test 4: Word index is rebuilt on demand ───────────────────────

#[test]
fn test_word_index_flag() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mbox = temp.child("inbox.mbox");
    mbox.write_file(&fixture("search.mbox")).unwrap();
    let mut config = config_in(&temp);

    config.search.build_word_index = false;
    let plain = builder::build_index(mbox.path(), &config, false, None).unwrap();
    assert!(plain.words.is_none());
    // Reused while no word index is wanted
    let again = builder::build_index(mbox.path(), &config, false, None).unwrap();
    assert!(again.words.is_none());

    config.search.build_word_index = true;
    let with_words = builder::build_index(mbox.path(), &config, false, None).unwrap();
    assert!(with_words.words.is_some());
    let reloaded = builder::load_index(mbox.path(), &config).unwrap().unwrap();
    assert!(reloaded.words.is_some());
}

// ─── Test 5: Progress reaches the end of the file ──────────────────

#[test]
fn test_progress_callback() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mbox = temp.child("inbox.mbox");
    mbox.write_file(&fixture("search.mbox")).unwrap();
    let config = config_in(&temp);

    let last = std::cell::Cell::new((0u64, 0u64));
    let report = |done: u64, total: u64| last.set((done, total));
    builder::build_index(mbox.path(), &config, true, Some(&report)).unwrap();
    let (done, total) = last.get();
    assert!(total > 0);
    assert!(done <= total);
    assert!(done * 10 >= total * 9, "progress stopped at {done}/{total}");
}

// ─── Test 6: Garbage index files are ignored ───────────────────────

#[test]
fn test_corrupt_index_is_ignored() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mbox = temp.child("inbox.mbox");
    mbox.write_file(&fixture("search.mbox")).unwrap();
    let config = config_in(&temp);

    temp.child(".inbox.mbox.mailsearch.idx")
        .write_binary(&[0u8; 256])
        .unwrap();
    assert!(builder::load_index(mbox.path(), &config).unwrap().is_none());

    let folder = MailFolder::open_mbox(mbox.path(), &config).unwrap();
    assert_eq!(folder.uids().len(), 8);
    assert_eq!(folder.table_name(), "inbox");
}
