//! Word splitting and header text matching shared by the evaluator.

use crate::model::address::Address;
use crate::parser::header::decode_words;

/// One search word, lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    /// Contains characters other than letters and digits.
    pub complex: bool,
}

/// Words extracted from one search phrase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordQuery {
    pub words: Vec<Word>,
    /// Any word is complex; such a query cannot be answered from the word
    /// index alone.
    pub complex: bool,
}

impl WordQuery {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(|w| w.text.as_str())
    }
}

/// Split a phrase into words.
///
/// Whitespace separates words, `"..."` groups a quoted phrase into one word,
/// and a backslash escapes the next character. Letters and digits are
/// lowercased; any other character marks its word complex.
pub fn split_words(input: &str) -> WordQuery {
    let mut query = WordQuery::default();
    let mut current = String::new();
    let mut complex = false;
    let mut in_quote = false;
    let mut chars = input.chars();

    let flush = |current: &mut String, complex: &mut bool, query: &mut WordQuery| {
        if !current.is_empty() {
            query.complex |= *complex;
            query.words.push(Word {
                text: std::mem::take(current),
                complex: *complex,
            });
        }
        *complex = false;
    };

    while let Some(c) = chars.next() {
        if (in_quote && c == '"') || (!in_quote && c.is_whitespace()) {
            flush(&mut current, &mut complex, &mut query);
            in_quote = false;
        } else if c == '\\' {
            match chars.next() {
                Some(escaped) => push_char(&mut current, &mut complex, escaped),
                None => flush(&mut current, &mut complex, &mut query),
            }
        } else if c == '"' {
            in_quote = true;
        } else {
            push_char(&mut current, &mut complex, c);
        }
    }
    flush(&mut current, &mut complex, &mut query);
    query
}

fn push_char(word: &mut String, complex: &mut bool, c: char) {
    if c.is_alphanumeric() {
        word.extend(c.to_lowercase());
    } else {
        *complex = true;
        word.push(c);
    }
}

/// Reduce a query to simple words only, splitting complex words on every
/// non-alphanumeric character.
pub fn simple_words(query: &WordQuery) -> WordQuery {
    let mut out = WordQuery::default();
    for word in &query.words {
        if !word.complex {
            out.words.push(word.clone());
            continue;
        }
        for part in word.text.split(|c: char| !c.is_alphanumeric()) {
            if !part.is_empty() {
                out.words.push(Word {
                    text: part.to_string(),
                    complex: false,
                });
            }
        }
    }
    out
}

/// Case-insensitive substring test.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Four-character soundex code of the first word in `s`.
pub fn soundex(s: &str) -> String {
    fn digit(c: char) -> Option<char> {
        match c.to_ascii_lowercase() {
            'b' | 'f' | 'p' | 'v' => Some('1'),
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
            'd' | 't' => Some('3'),
            'l' => Some('4'),
            'm' | 'n' => Some('5'),
            'r' => Some('6'),
            _ => None,
        }
    }

    let mut letters = s.chars().skip_while(|c| !c.is_ascii_alphabetic());
    let Some(first) = letters.next() else {
        return String::new();
    };
    let mut code = String::with_capacity(4);
    code.push(first.to_ascii_uppercase());
    let mut last = digit(first);
    for c in letters.filter(|c| c.is_ascii_alphabetic()) {
        let d = digit(c);
        if let Some(d) = d {
            if Some(d) != last {
                code.push(d);
                if code.len() == 4 {
                    break;
                }
            }
        }
        last = d;
    }
    while code.len() < 4 {
        code.push('0');
    }
    code
}

/// Comparison style of the `header-*` builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// `header-matches`
    Exact,
    /// `header-contains`
    Contains,
    /// `header-has-words`
    Word,
    /// `header-starts-with`
    StartsWith,
    /// `header-ends-with`
    EndsWith,
    /// `header-soundex`
    Soundex,
}

/// How a header value is interpreted before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Already decoded text, compared as is.
    Plain,
    /// Raw header text, RFC 2047 words decoded first.
    Encoded,
    /// Address list: the whole text, then each name and address separately.
    Address,
    /// Mailing-list id: an old-style id without `@` is matched against the
    /// local part of the pattern only.
    MailingList,
}

/// Match one header value against one pattern.
pub fn header_match(value: &str, pattern: &str, how: MatchKind, kind: HeaderKind) -> bool {
    let unfolded: String = value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
    let value = unfolded.trim_start();

    match kind {
        HeaderKind::Plain => text_match(value, pattern, how),
        HeaderKind::Encoded => text_match(&decode_words(value), pattern, how),
        HeaderKind::MailingList => {
            let pattern = match pattern.find('@') {
                Some(at) if at > 0 && !value.contains('@') => &pattern[..at],
                _ => pattern,
            };
            text_match(value, pattern, how)
        }
        HeaderKind::Address => {
            if text_match(value, pattern, how) {
                return true;
            }
            Address::parse_list(&decode_words(value)).iter().any(|a| {
                (!a.name.is_empty() && text_match(&a.name, pattern, how))
                    || text_match(&a.email, pattern, how)
            })
        }
    }
}

fn text_match(value: &str, pattern: &str, how: MatchKind) -> bool {
    if how == MatchKind::Soundex {
        let code = soundex(pattern);
        return !code.is_empty()
            && value
                .split_whitespace()
                .any(|w| soundex(&w.chars().filter(|c| c.is_ascii_alphabetic()).collect::<String>()) == code);
    }
    if value.len() < pattern.len() {
        return false;
    }
    let v = value.to_lowercase();
    let p = pattern.to_lowercase();
    match how {
        MatchKind::Exact => v == p,
        MatchKind::Contains => v.contains(&p),
        MatchKind::StartsWith => v.starts_with(&p),
        MatchKind::EndsWith => v.ends_with(&p),
        MatchKind::Word => has_words(value, pattern),
        MatchKind::Soundex => false,
    }
}

/// Every word of `needle` equals (case-insensitively) some word of
/// `haystack`; punctuation separates words.
pub fn has_words(haystack: &str, needle: &str) -> bool {
    let depunct = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
            .collect()
    };
    let needle = split_words(&depunct(needle));
    if needle.is_empty() {
        return true;
    }
    let hay = split_words(&depunct(haystack));
    let all = needle.texts().all(|n| hay.texts().any(|h| h == n));
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words_quotes_and_case() {
        let q = split_words(r#"Hello "big world" foo\ bar"#);
        let texts: Vec<&str> = q.texts().collect();
        assert_eq!(texts, vec!["hello", "big world", "foo bar"]);
        assert!(q.complex);
        assert!(!q.words[0].complex);
        assert!(q.words[1].complex);
    }

    #[test]
    fn test_simple_words_splits_complex() {
        let q = simple_words(&split_words("alpha beta-gamma"));
        let texts: Vec<&str> = q.texts().collect();
        assert_eq!(texts, vec!["alpha", "beta", "gamma"]);
        assert!(!q.complex);
    }

    #[test]
    fn test_soundex() {
        assert_eq!(soundex("Robert"), "R163");
        assert_eq!(soundex("Rupert"), "R163");
        assert_eq!(soundex("Tymczak"), "T522");
        assert_eq!(soundex("  Lee"), "L000");
        assert_eq!(soundex("123"), "");
    }

    #[test]
    fn test_match_kinds() {
        assert!(header_match(" Quarterly Report", "report", MatchKind::Contains, HeaderKind::Plain));
        assert!(header_match("Quarterly Report", "QUARTERLY report", MatchKind::Exact, HeaderKind::Plain));
        assert!(header_match("Quarterly Report", "quart", MatchKind::StartsWith, HeaderKind::Plain));
        assert!(header_match("Quarterly Report", "port", MatchKind::EndsWith, HeaderKind::Plain));
        assert!(!header_match("Report", "Quarterly Report", MatchKind::Contains, HeaderKind::Plain));
        assert!(header_match("Meeting with Robert", "Rupert", MatchKind::Soundex, HeaderKind::Plain));
    }

    #[test]
    fn test_address_match_parts() {
        let value = "Ana Ruiz <ana@example.org>, bob@example.net";
        assert!(header_match(value, "ana ruiz", MatchKind::Exact, HeaderKind::Address));
        assert!(header_match(value, "bob@example.net", MatchKind::Exact, HeaderKind::Address));
        assert!(header_match(value, "example.org", MatchKind::EndsWith, HeaderKind::Address));
        assert!(!header_match(value, "carol", MatchKind::Contains, HeaderKind::Address));
    }

    #[test]
    fn test_mailing_list_old_style() {
        assert!(header_match("evo-hackers", "evo-hackers@gnome.org", MatchKind::Exact, HeaderKind::MailingList));
        assert!(!header_match("evo@lists.org", "evo-hackers@gnome.org", MatchKind::Exact, HeaderKind::MailingList));
    }

    #[test]
    fn test_has_words() {
        assert!(has_words("Re: [dev] build, broken!", "broken dev"));
        assert!(!has_words("Re: [dev] build broken", "brok"));
        assert!(has_words("anything", ""));
    }

    #[test]
    fn test_encoded_header() {
        assert!(header_match(" =?UTF-8?Q?Caf=C3=A9?=", "café", MatchKind::Exact, HeaderKind::Encoded));
    }
}
