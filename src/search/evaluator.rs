//! In-memory evaluation of search expressions.
//!
//! Every builtin answers in one of two modes. With a current message bound
//! (inside `match-all`) it returns a `Bool` verdict for that message; with no
//! current message it answers for the whole working uid sequence, usually as
//! a `Uids` set. The current message is passed down each recursive call, so
//! nested calls can only narrow the mode, never widen it.

use std::cell::OnceCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use super::dates;
use super::result::{SearchValue, UidSet};
use super::threads::{ThreadMatch, ThreadTree};
use super::word_index::{match_message_index, match_words};
use super::words::{header_match, simple_words, split_words, HeaderKind, MatchKind, WordQuery};
use crate::error::{Result, SearchError};
use crate::folder::Folder;
use crate::model::message::{MessageInfo, MimeMessage};
use crate::sexp::Term;

/// Functions the memory path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    And,
    Or,
    Not,
    Eq,
    Lt,
    Gt,
    Add,
    Sub,
    If,
    CastInt,
    CastString,
    MatchAll,
    MatchThreads,
    Header(MatchKind),
    HeaderExists,
    HeaderRegex,
    HeaderFullRegex,
    BodyContains,
    BodyRegex,
    UserTag,
    UserFlag,
    SystemFlag,
    SentDate,
    ReceivedDate,
    CurrentDate,
    RelativeMonths,
    Size,
    Uid,
    MessageLocation,
    MakeTime,
    CompareDate,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "=" => Self::Eq,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "+" => Self::Add,
            "-" => Self::Sub,
            "if" => Self::If,
            "cast-int" => Self::CastInt,
            "cast-string" => Self::CastString,
            "match-all" => Self::MatchAll,
            "match-threads" => Self::MatchThreads,
            "header-contains" => Self::Header(MatchKind::Contains),
            "header-matches" => Self::Header(MatchKind::Exact),
            "header-starts-with" => Self::Header(MatchKind::StartsWith),
            "header-ends-with" => Self::Header(MatchKind::EndsWith),
            "header-soundex" => Self::Header(MatchKind::Soundex),
            "header-has-words" => Self::Header(MatchKind::Word),
            "header-exists" => Self::HeaderExists,
            "header-regex" => Self::HeaderRegex,
            "header-full-regex" => Self::HeaderFullRegex,
            "body-contains" => Self::BodyContains,
            "body-regex" => Self::BodyRegex,
            "user-tag" => Self::UserTag,
            "user-flag" => Self::UserFlag,
            "system-flag" => Self::SystemFlag,
            "get-sent-date" => Self::SentDate,
            "get-received-date" => Self::ReceivedDate,
            "get-current-date" => Self::CurrentDate,
            "get-relative-months" => Self::RelativeMonths,
            "get-size" => Self::Size,
            "uid" => Self::Uid,
            "message-location" => Self::MessageLocation,
            "make-time" => Self::MakeTime,
            "compare-date" => Self::CompareDate,
            _ => return None,
        })
    }
}

/// Per-search evaluation state: the folder, the working uid sequence, the
/// cancellation flag and the lazily built thread tree.
pub struct Evaluator<'a> {
    folder: &'a dyn Folder,
    working: &'a [String],
    cancel: Option<&'a AtomicBool>,
    now: i64,
    threads: OnceCell<ThreadTree>,
}

impl<'a> Evaluator<'a> {
    pub fn new(folder: &'a dyn Folder, working: &'a [String]) -> Self {
        Self {
            folder,
            working,
            cancel: None,
            now: dates::now(),
            threads: OnceCell::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Pin the clock read by `get-current-date` and `get-relative-months`.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    /// Evaluate in whole-folder mode.
    pub fn evaluate(&self, term: &Term) -> Result<SearchValue> {
        self.check_cancel()?;
        self.eval(term, None)
    }

    /// Evaluate against one message.
    pub fn evaluate_message(&self, term: &Term, info: &'a MessageInfo) -> Result<SearchValue> {
        self.check_cancel()?;
        self.eval(term, Some(info))
    }

    fn eval(&self, term: &Term, current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let (name, args) = match term {
            Term::Bool(b) => return Ok(SearchValue::Bool(*b)),
            Term::Int(n) => return Ok(SearchValue::Int(*n)),
            Term::String(s) => return Ok(SearchValue::String(s.clone())),
            Term::Call { name, args } => (name.as_str(), args.as_slice()),
        };
        let builtin =
            Builtin::from_name(name).ok_or_else(|| SearchError::UnknownFunction(name.to_string()))?;

        // These see their argument terms unevaluated
        match builtin {
            Builtin::And => return self.and(args, current),
            Builtin::Or => return self.or(args, current),
            Builtin::If => return self.if_then(args, current),
            Builtin::MatchAll => return self.match_all(args, current),
            Builtin::MatchThreads => return self.match_threads(args, current),
            _ => {}
        }

        let values = args
            .iter()
            .map(|arg| self.eval(arg, current))
            .collect::<Result<Vec<_>>>()?;
        self.call(builtin, name, values, current)
    }

    fn call(
        &self,
        builtin: Builtin,
        name: &str,
        values: Vec<SearchValue>,
        current: Option<&'a MessageInfo>,
    ) -> Result<SearchValue> {
        match builtin {
            Builtin::Not => self.not(values, current),
            Builtin::Eq | Builtin::Lt | Builtin::Gt => compare(builtin, name, &values),
            Builtin::Add => add(&values),
            Builtin::Sub => subtract(&values),
            Builtin::CastInt => cast_int(&values),
            Builtin::CastString => cast_string(&values),
            Builtin::Header(how) => self.header(name, how, &values, current),
            Builtin::HeaderExists => self.header_exists(&values, current),
            Builtin::HeaderRegex => self.header_regex(&values, current),
            Builtin::HeaderFullRegex => self.header_full_regex(&values, current),
            Builtin::BodyContains => self.body_contains(&values, current),
            Builtin::BodyRegex => self.body_regex(&values, current),
            Builtin::UserTag => {
                let tag = first_string(name, &values)?;
                Ok(SearchValue::String(
                    current.map(|info| info.user_tag(tag).to_string()).unwrap_or_default(),
                ))
            }
            Builtin::UserFlag => Ok(match current {
                Some(info) => strings(&values).any(|f| info.user_flag(f)).into(),
                None => SearchValue::empty_uids(),
            }),
            Builtin::SystemFlag => {
                let flag = first_string(name, &values)?;
                Ok(match current {
                    Some(info) => info.flags.is_set(flag).into(),
                    None => SearchValue::empty_uids(),
                })
            }
            Builtin::SentDate => Ok(per_message(current, |info| info.date_sent)),
            Builtin::ReceivedDate => Ok(per_message(current, |info| info.date_received)),
            Builtin::Size => Ok(per_message(current, |info| (info.size / 1024) as i64)),
            Builtin::CurrentDate => Ok(SearchValue::Int(self.now)),
            Builtin::RelativeMonths => Ok(match values.as_slice() {
                [SearchValue::Int(months)] => SearchValue::Int(dates::add_months(self.now, *months)),
                [time, months] => match (time.as_number(), months.as_number()) {
                    (Some(t), Some(m)) => SearchValue::Int(dates::add_months(t, m)),
                    _ => SearchValue::Bool(false),
                },
                _ => SearchValue::Bool(false),
            }),
            Builtin::Uid => Ok(match current {
                Some(info) => strings(&values).any(|u| u == info.uid).into(),
                None => SearchValue::Uids(strings(&values).map(str::to_string).collect()),
            }),
            Builtin::MessageLocation => {
                let same = match values.as_slice() {
                    [SearchValue::String(location)] => *location == self.folder.location(),
                    _ => false,
                };
                match current {
                    Some(_) => Ok(same.into()),
                    None if same => self.each_working(|_| Ok(true)).map(SearchValue::Uids),
                    None => Ok(SearchValue::empty_uids()),
                }
            }
            Builtin::MakeTime => Ok(SearchValue::Time(
                values.first().map(dates::make_time).unwrap_or(-1),
            )),
            Builtin::CompareDate => match values.as_slice() {
                [a, b] => Ok(SearchValue::Int(dates::compare_date(a, b))),
                _ => Err(SearchError::arity(name, "expected 2 arguments")),
            },
            Builtin::And
            | Builtin::Or
            | Builtin::If
            | Builtin::MatchAll
            | Builtin::MatchThreads => Err(SearchError::type_error(
                name,
                "takes unevaluated arguments",
            )),
        }
    }

    // ─── Combinators ──────────────────────────────────────────────

    fn and(&self, args: &[Term], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut mode: Option<&'static str> = None;
        for arg in args {
            let value = self.eval(arg, current)?;
            check_mode("and", &mut mode, &value)?;
            match value {
                SearchValue::Bool(false) => return Ok(SearchValue::Bool(false)),
                SearchValue::Uids(set) => {
                    for uid in set {
                        *counts.entry(uid).or_default() += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(match mode {
            Some("uid array") => SearchValue::Uids(
                counts
                    .into_iter()
                    .filter(|(_, n)| *n == args.len())
                    .map(|(uid, _)| uid)
                    .collect(),
            ),
            _ => SearchValue::Bool(true),
        })
    }

    fn or(&self, args: &[Term], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let mut union = UidSet::new();
        let mut mode: Option<&'static str> = None;
        for arg in args {
            let value = self.eval(arg, current)?;
            check_mode("or", &mut mode, &value)?;
            match value {
                SearchValue::Bool(true) => return Ok(SearchValue::Bool(true)),
                SearchValue::Uids(set) => union.extend(set),
                _ => {}
            }
        }
        Ok(match mode {
            Some("uid array") => SearchValue::Uids(union),
            _ => SearchValue::Bool(false),
        })
    }

    fn not(&self, values: Vec<SearchValue>, current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        match values.into_iter().next() {
            None => Ok(SearchValue::Bool(true)),
            Some(SearchValue::Bool(b)) => Ok(SearchValue::Bool(!b)),
            Some(SearchValue::Uids(set)) => Ok(match current {
                Some(info) => SearchValue::Bool(!set.contains(&info.uid)),
                None => SearchValue::Uids(
                    self.working
                        .iter()
                        .filter(|uid| !set.contains(*uid))
                        .cloned()
                        .collect(),
                ),
            }),
            Some(other) => Err(SearchError::type_error(
                "not",
                format!("cannot negate a {}", other.kind()),
            )),
        }
    }

    fn if_then(&self, args: &[Term], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        if !(2..=3).contains(&args.len()) {
            return Err(SearchError::arity("if", "expected a condition and one or two branches"));
        }
        if self.eval(&args[0], current)?.expect_bool("if")? {
            self.eval(&args[1], current)
        } else if let Some(otherwise) = args.get(2) {
            self.eval(otherwise, current)
        } else {
            Ok(SearchValue::Bool(false))
        }
    }

    // ─── Iteration ────────────────────────────────────────────────

    fn match_all(&self, args: &[Term], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        if args.len() > 1 {
            warn!(args = args.len(), "match-all only takes a single argument, other arguments ignored");
        }
        let inner = args.first();
        if let Some(info) = current {
            return match inner {
                None => Ok(SearchValue::Bool(true)),
                Some(term) => Ok(self.eval(term, Some(info))?.expect_bool("match-all")?.into()),
            };
        }
        self.each_working(|info| match inner {
            None => Ok(true),
            Some(term) => self.eval(term, Some(info))?.expect_bool("match-all"),
        })
        .map(SearchValue::Uids)
    }

    fn match_threads(&self, args: &[Term], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        if current.is_some() {
            return Err(SearchError::type_error(
                "match-threads",
                "cannot be used inside match-all",
            ));
        }
        let how = match args.first().map(|t| self.eval(t, None)).transpose()? {
            Some(SearchValue::String(kind)) => ThreadMatch::parse(&kind),
            _ => {
                return Err(SearchError::arity(
                    "match-threads",
                    "requires a match type string",
                ))
            }
        };

        let mut last = None;
        for term in &args[1..] {
            last = Some(self.eval(term, None)?);
        }
        let seeds = last
            .ok_or_else(|| SearchError::type_error("match-threads", "expects an array result"))?
            .expect_uids("match-threads")?;

        if how == ThreadMatch::None {
            return Ok(SearchValue::Uids(seeds));
        }
        Ok(SearchValue::Uids(how.expand(self.thread_tree(), seeds)))
    }

    fn thread_tree(&self) -> &ThreadTree {
        self.threads.get_or_init(|| {
            let infos = self.folder.infos();
            debug!(messages = infos.len(), "Building thread tree");
            ThreadTree::build(&infos)
        })
    }

    // ─── Headers ──────────────────────────────────────────────────

    fn header(
        &self,
        name: &str,
        how: MatchKind,
        values: &[SearchValue],
        current: Option<&'a MessageInfo>,
    ) -> Result<SearchValue> {
        let header = first_string(name, values)?;
        let patterns: Vec<&str> = strings(&values[1..]).collect();
        match current {
            Some(info) => Ok(self.check_header(info, header, &patterns, how)?.into()),
            None => self
                .each_working(|info| self.check_header(info, header, &patterns, how))
                .map(SearchValue::Uids),
        }
    }

    /// OR of `patterns` against one header of one message.
    fn check_header(
        &self,
        info: &MessageInfo,
        header: &str,
        patterns: &[&str],
        how: MatchKind,
    ) -> Result<bool> {
        if patterns.is_empty() {
            return Ok(false);
        }
        if patterns.iter().any(|p| p.is_empty()) {
            return Ok(true);
        }

        let date;
        let summary: Option<(&str, HeaderKind)> = match header.to_ascii_lowercase().as_str() {
            "subject" => Some((info.subject.as_str(), HeaderKind::Plain)),
            "date" => {
                date = info.date_sent.to_string();
                Some((date.as_str(), HeaderKind::Plain))
            }
            "from" => Some((info.from.as_str(), HeaderKind::Address)),
            "to" => Some((info.to.as_str(), HeaderKind::Address)),
            "cc" => Some((info.cc.as_str(), HeaderKind::Address)),
            "x-camel-mlist" => Some((info.mlist.as_str(), HeaderKind::MailingList)),
            _ => None,
        };
        let message = match summary {
            Some(_) => None,
            None => match self.fetch(&info.uid)? {
                Some(message) => Some(message),
                None => return Ok(false),
            },
        };

        let test = |pattern: &str| match (summary, &message) {
            (Some((value, kind)), _) => header_match(value, pattern, how, kind),
            (None, Some(message)) => message
                .headers_named(header)
                .any(|value| header_match(value, pattern, how, HeaderKind::Encoded)),
            (None, None) => false,
        };

        Ok(patterns.iter().any(|&pattern| {
            if how == MatchKind::Contains {
                split_words(pattern).texts().all(|word| test(word))
            } else {
                test(pattern)
            }
        }))
    }

    fn header_exists(&self, values: &[SearchValue], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let Some(info) = current else {
            return Ok(SearchValue::empty_uids());
        };
        let Some(message) = self.fetch(&info.uid)? else {
            return Ok(SearchValue::Bool(false));
        };
        Ok(strings(values).any(|name| message.header(name).is_some()).into())
    }

    fn header_regex(&self, values: &[SearchValue], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let (header, patterns) = match values {
            [SearchValue::String(header), rest @ ..] if !rest.is_empty() => (header, rest),
            _ => {
                return Err(SearchError::arity(
                    "header-regex",
                    "expected a header name and a pattern",
                ))
            }
        };
        let Some(info) = current else {
            return Ok(SearchValue::empty_uids());
        };
        let regex = build_regex("header-regex", &strings(patterns).collect::<Vec<_>>(), false)?;
        let Some(message) = self.fetch(&info.uid)? else {
            return Ok(SearchValue::Bool(false));
        };
        let hit = message
            .headers_named(header)
            .any(|value| regex.is_match(&crate::parser::header::decode_words(value)));
        Ok(hit.into())
    }

    fn header_full_regex(&self, values: &[SearchValue], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let Some(info) = current else {
            return Ok(SearchValue::empty_uids());
        };
        let regex = build_regex("header-full-regex", &strings(values).collect::<Vec<_>>(), true)?;
        let Some(message) = self.fetch(&info.uid)? else {
            return Ok(SearchValue::Bool(false));
        };
        Ok(regex.is_match(&message.header_block()).into())
    }

    // ─── Bodies ───────────────────────────────────────────────────

    fn body_contains(&self, values: &[SearchValue], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let phrases: Vec<&str> = strings(values).collect();
        if let [""] = phrases.as_slice() {
            return match current {
                Some(_) => Ok(SearchValue::Bool(true)),
                None => self.each_working(|_| Ok(true)).map(SearchValue::Uids),
            };
        }

        if let Some(info) = current {
            for phrase in phrases {
                let words = split_words(phrase);
                if !words.is_empty() && self.message_has_words(info, &words)? {
                    return Ok(SearchValue::Bool(true));
                }
            }
            return Ok(SearchValue::Bool(false));
        }

        let mut out = UidSet::new();
        for phrase in phrases {
            let words = split_words(phrase);
            if words.is_empty() {
                continue;
            }
            let hits = match self.folder.body_index() {
                Some(index) if !words.complex => match_words(index, &words, self.cancel)?,
                _ => self.match_words_messages(&words)?,
            };
            out.extend(hits);
        }
        Ok(SearchValue::Uids(out))
    }

    fn message_has_words(&self, info: &MessageInfo, words: &WordQuery) -> Result<bool> {
        match self.folder.body_index() {
            Some(index) if !words.complex => Ok(words
                .texts()
                .all(|word| match_message_index(index, &info.uid, word))),
            _ => self.match_words_1message(&info.uid, words),
        }
    }

    /// Full-content scan, narrowed through the index by the query's simple
    /// words when an index exists.
    fn match_words_messages(&self, words: &WordQuery) -> Result<UidSet> {
        let simple = simple_words(words);
        let candidates = match self.folder.body_index() {
            Some(index) if !simple.is_empty() => Some(match_words(index, &simple, self.cancel)?),
            _ => None,
        };
        let mut out = UidSet::new();
        for uid in self.working {
            if candidates.as_ref().is_some_and(|c| !c.contains(uid)) {
                continue;
            }
            self.check_cancel()?;
            if self.match_words_1message(uid, words)? {
                out.insert(uid.clone());
            }
        }
        Ok(out)
    }

    fn match_words_1message(&self, uid: &str, words: &WordQuery) -> Result<bool> {
        let Some(message) = self.fetch(uid)? else {
            return Ok(false);
        };
        let body = message.body_text().to_lowercase();
        Ok(words.texts().all(|word| body.contains(&word.to_lowercase())))
    }

    fn body_regex(&self, values: &[SearchValue], current: Option<&'a MessageInfo>) -> Result<SearchValue> {
        let regex = build_regex("body-regex", &strings(values).collect::<Vec<_>>(), true)?;
        let test = |uid: &str| -> Result<bool> {
            Ok(self
                .fetch(uid)?
                .is_some_and(|message| regex.is_match(&message.body_text())))
        };
        match current {
            Some(info) => Ok(test(&info.uid)?.into()),
            None => self.each_working(|info| test(&info.uid)).map(SearchValue::Uids),
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(SearchError::Cancelled);
        }
        Ok(())
    }

    /// Uids of the working sequence for which `test` holds.
    fn each_working(&self, mut test: impl FnMut(&'a MessageInfo) -> Result<bool>) -> Result<UidSet> {
        let folder: &'a dyn Folder = self.folder;
        let mut out = UidSet::new();
        for uid in self.working {
            self.check_cancel()?;
            if let Some(info) = folder.info(uid) {
                if test(info)? {
                    out.insert(uid.clone());
                }
            }
        }
        Ok(out)
    }

    /// Fetch a full message; an unavailable message is a non-match.
    fn fetch(&self, uid: &str) -> Result<Option<Rc<MimeMessage>>> {
        match self.folder.fetch(uid) {
            Ok(message) => Ok(Some(message)),
            Err(e @ SearchError::FetchUnavailable(_)) => {
                debug!(uid, error = %e, "Message not available, treating as non-match");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Record the result kind of an `and`/`or` term; kinds may not mix.
fn check_mode(function: &str, mode: &mut Option<&'static str>, value: &SearchValue) -> Result<()> {
    let kind = value.kind();
    if !matches!(value, SearchValue::Bool(_) | SearchValue::Uids(_)) {
        return Err(SearchError::type_error(
            function,
            format!("invalid operand type {kind}"),
        ));
    }
    match mode {
        Some(seen) if *seen != kind => Err(SearchError::type_error(
            function,
            format!("cannot mix {seen} and {kind} results"),
        )),
        _ => {
            *mode = Some(kind);
            Ok(())
        }
    }
}

fn per_message(current: Option<&MessageInfo>, get: impl Fn(&MessageInfo) -> i64) -> SearchValue {
    match current {
        Some(info) => SearchValue::Int(get(info)),
        None => SearchValue::empty_uids(),
    }
}

fn strings(values: &[SearchValue]) -> impl Iterator<Item = &str> {
    values.iter().filter_map(SearchValue::as_str)
}

fn first_string<'v>(function: &str, values: &'v [SearchValue]) -> Result<&'v str> {
    values
        .first()
        .and_then(SearchValue::as_str)
        .ok_or_else(|| SearchError::arity(function, "expected a string argument"))
}

/// Case-insensitive regex from one or more alternatives.
fn build_regex(function: &str, patterns: &[&str], multi_line: bool) -> Result<Regex> {
    let pattern = match patterns {
        [] => return Err(SearchError::arity(function, "expected a pattern")),
        [single] => (*single).to_string(),
        many => many
            .iter()
            .map(|p| format!("(?:{p})"))
            .collect::<Vec<_>>()
            .join("|"),
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .multi_line(multi_line)
        .build()
        .map_err(|e| SearchError::Regex {
            pattern,
            reason: e.to_string(),
        })
}

fn compare(builtin: Builtin, name: &str, values: &[SearchValue]) -> Result<SearchValue> {
    let [a, b] = values else {
        return Err(SearchError::arity(name, "expected 2 arguments"));
    };
    let ordering = match (a, b) {
        (SearchValue::String(x), SearchValue::String(y)) => x.cmp(y),
        (SearchValue::Bool(x), SearchValue::Bool(y)) => x.cmp(y),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                return Err(SearchError::type_error(
                    name,
                    format!("cannot compare {} with {}", a.kind(), b.kind()),
                ))
            }
        },
    };
    Ok(SearchValue::Bool(match builtin {
        Builtin::Lt => ordering == CmpOrdering::Less,
        Builtin::Gt => ordering == CmpOrdering::Greater,
        _ => ordering == CmpOrdering::Equal,
    }))
}

fn add(values: &[SearchValue]) -> Result<SearchValue> {
    if values.iter().all(|v| v.as_str().is_some()) && !values.is_empty() {
        return Ok(SearchValue::String(strings(values).collect()));
    }
    let mut sum = 0i64;
    for v in values {
        sum = sum.saturating_add(v.as_number().ok_or_else(|| {
            SearchError::type_error("+", format!("cannot add a {}", v.kind()))
        })?);
    }
    Ok(match values.first() {
        Some(SearchValue::Time(_)) => SearchValue::Time(sum),
        _ => SearchValue::Int(sum),
    })
}

fn subtract(values: &[SearchValue]) -> Result<SearchValue> {
    let mut numbers = values.iter().map(|v| {
        v.as_number()
            .ok_or_else(|| SearchError::type_error("-", format!("cannot subtract a {}", v.kind())))
    });
    let Some(first) = numbers.next() else {
        return Ok(SearchValue::Int(0));
    };
    let mut total = first?;
    for n in numbers {
        total = total.saturating_sub(n?);
    }
    Ok(match values.first() {
        Some(SearchValue::Time(_)) => SearchValue::Time(total),
        _ => SearchValue::Int(total),
    })
}

fn cast_int(values: &[SearchValue]) -> Result<SearchValue> {
    match values {
        [SearchValue::Int(n)] | [SearchValue::Time(n)] => Ok(SearchValue::Int(*n)),
        [SearchValue::Bool(b)] => Ok(SearchValue::Int(i64::from(*b))),
        [SearchValue::String(s)] => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            Ok(SearchValue::Int(digits.parse().unwrap_or(0)))
        }
        _ => Err(SearchError::arity("cast-int", "expected one scalar argument")),
    }
}

fn cast_string(values: &[SearchValue]) -> Result<SearchValue> {
    match values {
        [SearchValue::Int(n)] | [SearchValue::Time(n)] => Ok(SearchValue::String(n.to_string())),
        [SearchValue::Bool(b)] => Ok(SearchValue::String(i64::from(*b).to_string())),
        [SearchValue::String(s)] => Ok(SearchValue::String(s.clone())),
        _ => Err(SearchError::arity("cast-string", "expected one scalar argument")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::flags::SystemFlags;
    use crate::sexp::parse;
    use crate::store::MailFolder;

    fn raw(n: usize, subject: &str, from: &str, extra: &str, body: &str) -> (String, Vec<u8>) {
        (
            n.to_string(),
            format!(
                "From sender@example.org Thu Jan  4 10:00:00 2024\n\
Subject: {subject}\nFrom: {from}\nMessage-ID: <m{n}@example.org>\n{extra}\n{body}\n"
            )
            .into_bytes(),
        )
    }

    fn folder() -> MailFolder {
        let mut folder = MailFolder::from_messages(
            "mbox:///tmp/inbox",
            vec![
                raw(1, "Budget plan", "Ana Ruiz <ana@example.org>", "X-Team: finance\n", "The quarterly budget review."),
                raw(2, "Re: Budget plan", "Bob <bob@example.org>", "In-Reply-To: <m1@example.org>\n", "Approved, see attached."),
                raw(3, "Lunch", "Carol <carol@example.net>", "", "Pizza on Friday?"),
            ],
        );
        folder.set_flag("2", SystemFlags::DELETED, true);
        folder.add_user_flag("3", "social");
        folder.set_user_tag("1", "label", "work");
        folder
    }

    fn run(folder: &MailFolder, expr: &str) -> Result<SearchValue> {
        let uids = folder.uids();
        Evaluator::new(folder, &uids).with_now(1_704_362_400).evaluate(&parse(expr)?)
    }

    fn uids(list: &[&str]) -> SearchValue {
        SearchValue::Uids(list.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_match_all_system_flag() {
        let f = folder();
        assert_eq!(run(&f, r#"(match-all (system-flag "deleted"))"#).expect("eval"), uids(&["2"]));
        assert_eq!(run(&f, "(match-all)").expect("eval"), uids(&["1", "2", "3"]));
    }

    #[test]
    fn test_not_modes() {
        let f = folder();
        assert_eq!(
            run(&f, r#"(not (match-all (system-flag "deleted")))"#).expect("eval"),
            uids(&["1", "3"])
        );
        assert_eq!(
            run(&f, r#"(not (not (match-all (user-flag "social"))))"#).expect("eval"),
            uids(&["3"])
        );
        assert_eq!(
            run(&f, r#"(match-all (not (system-flag "deleted")))"#).expect("eval"),
            uids(&["1", "3"])
        );
        assert_eq!(run(&f, "(not)").expect("eval"), SearchValue::Bool(true));
    }

    #[test]
    fn test_and_or_over_arrays() {
        let f = folder();
        let and = r#"(and (match-all (header-contains "subject" "budget")) (match-all (not (system-flag "deleted"))))"#;
        assert_eq!(run(&f, and).expect("eval"), uids(&["1"]));
        let or = r#"(or (match-all (system-flag "deleted")) (match-all (user-flag "social")))"#;
        assert_eq!(run(&f, or).expect("eval"), uids(&["2", "3"]));
    }

    #[test]
    fn test_and_rejects_mixed_results() {
        let f = folder();
        let err = run(&f, r#"(and #t (match-all (system-flag "seen")))"#).unwrap_err();
        assert!(matches!(err, SearchError::Type { .. }));
        let err = run(&f, r#"(match-all (and "x" (system-flag "seen")))"#).unwrap_err();
        assert!(matches!(err, SearchError::Type { .. }));
    }

    #[test]
    fn test_header_builtins() {
        let f = folder();
        assert_eq!(
            run(&f, r#"(match-all (header-contains "From" "ana"))"#).expect("eval"),
            uids(&["1"])
        );
        assert_eq!(
            run(&f, r#"(match-all (header-matches "from" "bob@example.org"))"#).expect("eval"),
            uids(&["2"])
        );
        assert_eq!(
            run(&f, r#"(match-all (header-ends-with "from" "example.net"))"#).expect("eval"),
            uids(&["3"])
        );
        assert_eq!(
            run(&f, r#"(match-all (header-contains "X-Team" "fin"))"#).expect("eval"),
            uids(&["1"])
        );
        // An empty value is trivially true
        assert_eq!(
            run(&f, r#"(match-all (header-contains "Subject" ""))"#).expect("eval"),
            uids(&["1", "2", "3"])
        );
        // Whole-folder mode iterates the working uids
        assert_eq!(run(&f, r#"(header-starts-with "subject" "re:")"#).expect("eval"), uids(&["2"]));
    }

    #[test]
    fn test_header_exists_and_regex() {
        let f = folder();
        assert_eq!(run(&f, r#"(header-exists "X-Team")"#).expect("eval"), uids(&[]));
        assert_eq!(
            run(&f, r#"(match-all (header-exists "X-Team"))"#).expect("eval"),
            uids(&["1"])
        );
        assert_eq!(
            run(&f, r#"(match-all (header-regex "subject" "^re: b"))"#).expect("eval"),
            uids(&["2"])
        );
        assert_eq!(
            run(&f, r#"(match-all (header-full-regex "^in-reply-to:"))"#).expect("eval"),
            uids(&["2"])
        );
        let err = run(&f, r#"(match-all (header-regex "subject" "("))"#).unwrap_err();
        assert!(matches!(err, SearchError::Regex { .. }));
    }

    #[test]
    fn test_body_contains_with_and_without_index() {
        let mut f = folder();
        for indexed in [false, true] {
            if indexed {
                f.build_word_index();
            }
            assert_eq!(run(&f, r#"(body-contains "budget review")"#).expect("eval"), uids(&["1"]));
            assert_eq!(
                run(&f, r#"(body-contains "pizza" "approved")"#).expect("eval"),
                uids(&["2", "3"])
            );
            assert_eq!(
                run(&f, r#"(match-all (body-contains "friday?"))"#).expect("eval"),
                uids(&["3"])
            );
            assert_eq!(run(&f, r#"(body-contains "")"#).expect("eval"), uids(&["1", "2", "3"]));
        }
    }

    #[test]
    fn test_unavailable_message_is_non_match() {
        let mut f = folder();
        f.drop_content("3");
        assert_eq!(run(&f, r#"(body-contains "pizza")"#).expect("eval"), uids(&[]));
        assert_eq!(
            run(&f, r#"(match-all (header-exists "subject"))"#).expect("eval"),
            uids(&["1", "2"])
        );
    }

    #[test]
    fn test_body_regex() {
        let f = folder();
        assert_eq!(run(&f, r#"(body-regex "piz+a")"#).expect("eval"), uids(&["3"]));
    }

    #[test]
    fn test_match_threads() {
        let f = folder();
        assert_eq!(
            run(&f, r#"(match-threads "all" (match-all (uid "2")))"#).expect("eval"),
            uids(&["1", "2"])
        );
        assert_eq!(
            run(&f, r#"(match-threads "single" (match-all))"#).expect("eval"),
            uids(&["3"])
        );
        assert_eq!(
            run(&f, r#"(match-threads "none" (uid "2" "x"))"#).expect("eval"),
            uids(&["2", "x"])
        );
        assert!(matches!(
            run(&f, r#"(match-all (match-threads "all" (uid "1")))"#),
            Err(SearchError::Type { .. })
        ));
        assert!(matches!(run(&f, "(match-threads)"), Err(SearchError::Arity { .. })));
        assert!(matches!(
            run(&f, r#"(match-threads "all" #t)"#),
            Err(SearchError::Type { .. })
        ));
    }

    #[test]
    fn test_tags_dates_and_arithmetic() {
        let f = folder();
        assert_eq!(
            run(&f, r#"(match-all (= (user-tag "label") "work"))"#).expect("eval"),
            uids(&["1"])
        );
        assert_eq!(
            run(&f, r#"(match-all (= (user-tag "label") ""))"#).expect("eval"),
            uids(&["2", "3"])
        );
        assert_eq!(
            run(&f, "(match-all (= (get-received-date) (get-current-date)))").expect("eval"),
            uids(&["1", "2", "3"])
        );
        assert_eq!(
            run(&f, "(match-all (< (get-size) 1))").expect("eval"),
            uids(&["1", "2", "3"])
        );
        assert_eq!(run(&f, r#"(+ "$Label" "work")"#).expect("eval"), SearchValue::String("$Labelwork".into()));
        assert_eq!(run(&f, "(- 10 3 2)").expect("eval"), SearchValue::Int(5));
        assert_eq!(run(&f, r#"(cast-int "42abc")"#).expect("eval"), SearchValue::Int(42));
        assert_eq!(run(&f, r#"(if (= 1 1) "y" "n")"#).expect("eval"), SearchValue::String("y".into()));
        assert_eq!(run(&f, r#"(get-relative-months "x")"#).expect("eval"), SearchValue::Bool(false));
    }

    #[test]
    fn test_uid_and_location() {
        let f = folder();
        assert_eq!(run(&f, r#"(match-all (uid "1" "3"))"#).expect("eval"), uids(&["1", "3"]));
        assert_eq!(
            run(&f, r#"(message-location "mbox:///tmp/inbox")"#).expect("eval"),
            uids(&["1", "2", "3"])
        );
        assert_eq!(run(&f, r#"(message-location "imap://x")"#).expect("eval"), uids(&[]));
    }

    #[test]
    fn test_unknown_function_and_cancel() {
        let f = folder();
        assert!(matches!(
            run(&f, r#"(sql-exp "1")"#),
            Err(SearchError::UnknownFunction(name)) if name == "sql-exp"
        ));

        let uids = f.uids();
        let cancel = AtomicBool::new(true);
        let err = Evaluator::new(&f, &uids)
            .with_cancel(&cancel)
            .evaluate(&parse("(match-all)").expect("parse"))
            .unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
    }
}
