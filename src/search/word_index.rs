//! Body word index and the multi-word matcher that runs against it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::result::UidSet;
use super::words::{contains_ci, WordQuery};
use crate::error::{Result, SearchError};
use crate::folder::BodyIndex;

/// Most words one query can carry: one bit each in the match mask.
pub const MAX_QUERY_WORDS: usize = 32;

/// Vocabulary to postings map built from decoded message bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordIndex {
    vocabulary: BTreeMap<String, Vec<String>>,
}

impl WordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every word of `text` under `uid`.
    ///
    /// Words are maximal runs of letters and digits, lowercased.
    pub fn add_message(&mut self, uid: &str, text: &str) {
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let postings = self.vocabulary.entry(word.to_lowercase()).or_default();
            if postings.last().map(String::as_str) != Some(uid) {
                postings.push(uid.to_string());
            }
        }
    }

    pub fn word_count(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }
}

impl BodyIndex for WordIndex {
    fn words(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.vocabulary.keys().map(String::as_str))
    }

    fn postings(&self, word: &str) -> Box<dyn Iterator<Item = &str> + '_> {
        match self.vocabulary.get(word) {
            Some(uids) => Box::new(uids.iter().map(String::as_str)),
            None => Box::new(std::iter::empty()),
        }
    }
}

/// Uids whose bodies contain every word of `query`.
///
/// A vocabulary entry counts for a query word when it contains that word as
/// a case-insensitive substring. Each hit ORs the word's bit into a per-uid
/// mask; a uid matches once its mask is full.
pub fn match_words(
    index: &dyn BodyIndex,
    query: &WordQuery,
    cancel: Option<&AtomicBool>,
) -> Result<UidSet> {
    let mut words: Vec<&str> = query.texts().collect();
    if words.is_empty() {
        return Ok(UidSet::new());
    }
    if words.len() > MAX_QUERY_WORDS {
        warn!(
            words = words.len(),
            "Too many search words, only the first {MAX_QUERY_WORDS} are used"
        );
        words.truncate(MAX_QUERY_WORDS);
    }
    let full: u64 = (1u64 << words.len()) - 1;

    let mut masks: HashMap<&str, u64> = HashMap::new();
    for vocab in index.words() {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(SearchError::Cancelled);
        }
        for (bit, word) in words.iter().enumerate() {
            if contains_ci(vocab, word) {
                for uid in index.postings(vocab) {
                    *masks.entry(uid).or_default() |= 1 << bit;
                }
            }
        }
    }

    let out: UidSet = masks
        .into_iter()
        .filter(|(_, mask)| *mask == full)
        .map(|(uid, _)| uid.to_string())
        .collect();
    debug!(words = words.len(), hits = out.len(), "Word index lookup");
    Ok(out)
}

/// Whether `uid` appears under any vocabulary entry containing `word`.
pub fn match_message_index(index: &dyn BodyIndex, uid: &str, word: &str) -> bool {
    index
        .words()
        .filter(|vocab| contains_ci(vocab, word))
        .any(|vocab| index.postings(vocab).any(|p| p == uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::words::split_words;

    fn sample() -> WordIndex {
        let mut index = WordIndex::new();
        index.add_message("1", "The quarterly budget review is on Friday.");
        index.add_message("2", "Budget approved; see you Friday!");
        index.add_message("3", "Lunch on Friday? The review can wait.");
        index
    }

    #[test]
    fn test_add_message_dedups_postings() {
        let mut index = WordIndex::new();
        index.add_message("1", "echo echo ECHO");
        assert_eq!(index.postings("echo").collect::<Vec<_>>(), vec!["1"]);
        assert_eq!(index.word_count(), 1);
    }

    #[test]
    fn test_three_words_need_every_bit() {
        let index = sample();
        let hits = match_words(&index, &split_words("budget review friday"), None).expect("match");
        let expected: UidSet = ["1".to_string()].into_iter().collect();
        assert_eq!(hits, expected);

        // Each word alone
        for (word, n) in [("budget", 2), ("review", 2), ("friday", 3)] {
            let hits = match_words(&index, &split_words(word), None).expect("match");
            assert_eq!(hits.len(), n, "{word}");
        }
    }

    #[test]
    fn test_vocabulary_substring_hits() {
        let index = sample();
        let hits = match_words(&index, &split_words("quarter"), None).expect("match");
        assert!(hits.contains("1"));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_match_message_index() {
        let index = sample();
        assert!(match_message_index(&index, "2", "approv"));
        assert!(!match_message_index(&index, "3", "approv"));
    }

    #[test]
    fn test_cancelled() {
        let index = sample();
        let cancel = AtomicBool::new(true);
        let err = match_words(&index, &split_words("budget"), Some(&cancel)).unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
    }
}
