//! Lowering search expressions to SQL `WHERE` fragments.
//!
//! Two compilers share the leaf rules in this module: [`RecursiveCompiler`]
//! folds the parsed term tree, [`LegacyCompiler`] reduces the token stream
//! with explicit stacks. Only the memory path understands body, thread and
//! regex builtins; compiling them fails with
//! [`SearchError::UnknownFunction`].
//!
//! Backing table columns: `uid`, `flags`, `read`, `deleted`, `replied`,
//! `important`, `junk`, `attachment`, `size` (bytes), `dsent`, `dreceived`,
//! `subject`, `mail_from`, `mail_to`, `mail_cc`, `mlist`, `labels`
//! (space-separated user flags) and `usertags` (`name value` pairs). Empty
//! header columns are stored as NULL; `labels` and `usertags` hold `''`
//! when empty.

pub mod legacy;
pub mod recursive;

pub use legacy::LegacyCompiler;
pub use recursive::RecursiveCompiler;

use crate::error::{Result, SearchError};
use crate::model::flags::SystemFlags;
use crate::search::dates;
use crate::search::result::SearchValue;
use crate::search::words::MatchKind;

/// Completed-on encoding: tagged, with a zero value.
pub const COMPLETED_ON: &str =
    "(usertags LIKE '%completed-on 0%' AND usertags LIKE '%completed-on%')";

/// Negated completed-on encoding.
pub const NOT_COMPLETED_ON: &str =
    "( (not (usertags LIKE '%completed-on 0%')) AND usertags LIKE '%completed-on%' )";

/// Follow-up encoding: no follow-up tag at all.
pub const NO_FOLLOW_UP: &str = "usertags NOT LIKE '%follow-up%'";

/// A strategy turning expression text into a `WHERE` fragment.
///
/// An empty fragment means "no condition".
pub trait SqlCompiler {
    fn name(&self) -> &'static str;

    fn compile(&self, expression: &str) -> Result<String>;
}

/// Backing-store column for a header or flag name (case-insensitive).
pub fn column_name(raw: &str) -> Option<&'static str> {
    const COLUMNS: [(&str, &str); 13] = [
        ("subject", "subject"),
        ("from", "mail_from"),
        ("cc", "mail_cc"),
        ("to", "mail_to"),
        ("flagged", "important"),
        ("deleted", "deleted"),
        ("junk", "junk"),
        ("answered", "replied"),
        ("seen", "read"),
        ("user-tag", "usertags"),
        ("user-flag", "labels"),
        ("attachments", "attachment"),
        ("x-camel-mlist", "mlist"),
    ];
    COLUMNS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(raw))
        .map(|(_, column)| *column)
}

/// Quote a string literal the way SQLite's `%Q` does.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a table or column identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `SELECT <what> FROM <table> [WHERE <fragment>]`.
pub fn select_sql(what: &str, table: &str, fragment: &str) -> String {
    let mut sql = format!("SELECT {what} FROM {}", quote_identifier(table));
    if !fragment.trim().is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(fragment);
    }
    sql
}

/// Intermediate value of a lowered term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operand {
    /// A condition.
    Sql(String),
    /// A column or scalar SQL expression.
    Column(String),
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Operand {
    fn kind(&self) -> &'static str {
        match self {
            Self::Sql(_) => "condition",
            Self::Column(_) => "column",
            Self::Str(_) => "string",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Scalar SQL text for either side of a comparison.
    fn scalar(&self) -> Option<String> {
        match self {
            Self::Column(c) => Some(c.clone()),
            Self::Int(n) => Some(n.to_string()),
            Self::Bool(b) => Some(i64::from(*b).to_string()),
            Self::Str(s) => Some(quote(s)),
            Self::Sql(_) => None,
        }
    }

    fn to_value(&self) -> SearchValue {
        match self {
            Self::Int(n) => SearchValue::Int(*n),
            Self::Bool(b) => SearchValue::Bool(*b),
            Self::Str(s) => SearchValue::String(s.clone()),
            Self::Sql(_) | Self::Column(_) => SearchValue::Bool(false),
        }
    }
}

/// Fragment text of a finished expression.
pub(crate) fn finish(operand: Operand) -> Result<String> {
    match operand {
        Operand::Sql(s) => Ok(s),
        Operand::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
        other => Err(SearchError::type_error(
            "sql",
            format!("expression lowers to a {}, not a condition", other.kind()),
        )),
    }
}

/// Join the conditions of an `and`/`or` group. Boolean literals become `1`
/// or `0`. The empty fragment stands for "every row": `and` drops it, `or`
/// keeps it as `1`. An `and` with no conditions lowers to the empty string
/// and an `or` with none lowers to `0`.
pub(crate) fn join(function: &str, operands: Vec<Operand>) -> Result<Operand> {
    let is_and = function == "and";
    let mut parts = Vec::with_capacity(operands.len());
    for operand in operands {
        match operand {
            Operand::Sql(s) if s.is_empty() => {
                if !is_and {
                    parts.push("1".to_string());
                }
            }
            Operand::Sql(s) => parts.push(s),
            Operand::Bool(b) => parts.push(if b { "1" } else { "0" }.to_string()),
            other => {
                return Err(SearchError::type_error(
                    function,
                    format!("expected a condition, got a {}", other.kind()),
                ))
            }
        }
    }
    if parts.is_empty() {
        return Ok(Operand::Sql(if is_and { String::new() } else { "0".into() }));
    }
    let glue = if is_and { " AND " } else { " OR " };
    Ok(Operand::Sql(format!("( {} )", parts.join(glue))))
}

pub(crate) fn negate(operand: Option<Operand>) -> Result<Operand> {
    match operand {
        None => Ok(Operand::Sql("0".into())),
        Some(Operand::Bool(b)) => Ok(Operand::Sql(if b { "0" } else { "1" }.into())),
        Some(Operand::Sql(s)) if s.is_empty() => Ok(Operand::Sql(s)),
        Some(Operand::Sql(s)) if s == format!("( {COMPLETED_ON} )") => {
            Ok(Operand::Sql(NOT_COMPLETED_ON.to_string()))
        }
        Some(Operand::Sql(s)) => Ok(Operand::Sql(format!("(NOT ({s}))"))),
        Some(other) => Err(SearchError::type_error(
            "not",
            format!("cannot negate a {}", other.kind()),
        )),
    }
}

/// `=`, `<` or `>` between two operands.
///
/// Comparisons against the tag and label columns become substring `LIKE`
/// tests; the completed-on and follow-up encodings already carry their
/// comparison and pass through.
pub(crate) fn comparison(op: &str, args: Vec<Operand>) -> Result<Operand> {
    let [lhs, rhs]: [Operand; 2] = match args.try_into() {
        Ok(pair) => pair,
        Err(_) => return Ok(Operand::Sql("(0)".into())),
    };
    if let Operand::Sql(fragment) = &lhs {
        if op == "=" && (fragment == COMPLETED_ON || fragment == NO_FOLLOW_UP) {
            return Ok(Operand::Sql(format!("( {fragment} )")));
        }
    }
    let left = lhs.scalar().ok_or_else(|| {
        SearchError::type_error(op, format!("cannot compare a {}", lhs.kind()))
    })?;
    if left == "usertags" || left == "labels" {
        let value = match &rhs {
            Operand::Str(s) => s.clone(),
            Operand::Int(n) => n.to_string(),
            Operand::Bool(b) => i64::from(*b).to_string(),
            other => {
                return Err(SearchError::type_error(
                    op,
                    format!("cannot match a {} against {left}", other.kind()),
                ))
            }
        };
        return Ok(Operand::Sql(format!("( {left} LIKE {} )", quote(&format!("%{value}%")))));
    }
    let right = rhs.scalar().ok_or_else(|| {
        SearchError::type_error(op, format!("cannot compare with a {}", rhs.kind()))
    })?;
    Ok(Operand::Sql(format!("( {left} {op} {right} )")))
}

/// `header-contains` and friends.
pub(crate) fn header_condition(function: &str, how: MatchKind, args: &[Operand]) -> Result<Operand> {
    let Some(header) = args.first().and_then(Operand::as_str) else {
        return Err(SearchError::arity(function, "expected a header name"));
    };
    let column = column_name(header)
        .ok_or_else(|| SearchError::UnknownFunction(format!("{function} \"{header}\"")))?;
    let values: Vec<&str> = args[1..].iter().filter_map(Operand::as_str).collect();
    if values.is_empty() {
        return Ok(Operand::Sql("(0)".into()));
    }
    if values.iter().any(|v| v.is_empty()) {
        return Ok(Operand::Sql("(1)".into()));
    }
    let parts: Vec<String> = values
        .iter()
        .map(|value| {
            let pattern = match how {
                MatchKind::StartsWith => format!("{value}%"),
                MatchKind::EndsWith => format!("%{value}"),
                _ => format!("%{value}%"),
            };
            format!("({column} IS NOT NULL AND {column} LIKE {})", quote(&pattern))
        })
        .collect();
    Ok(Operand::Sql(match parts.as_slice() {
        [single] => single.clone(),
        _ => format!("( {} )", parts.join(" OR ")),
    }))
}

pub(crate) fn header_exists_condition(args: &[Operand]) -> Result<Operand> {
    let Some(header) = args.first().and_then(Operand::as_str) else {
        return Err(SearchError::arity("header-exists", "expected a header name"));
    };
    let column = column_name(header)
        .ok_or_else(|| SearchError::UnknownFunction(format!("header-exists \"{header}\"")))?;
    Ok(Operand::Sql(format!("({column} NOTNULL)")))
}

pub(crate) fn system_flag_condition(args: &[Operand]) -> Result<Operand> {
    const FLAG_COLUMNS: [&str; 6] = ["important", "deleted", "junk", "replied", "read", "attachment"];
    let Some(flag) = args.first().and_then(Operand::as_str) else {
        return Err(SearchError::arity("system-flag", "expected a flag name"));
    };
    if let Some(column) = column_name(flag).filter(|c| FLAG_COLUMNS.contains(c)) {
        return Ok(Operand::Sql(format!("({column} = 1)")));
    }
    Ok(Operand::Sql(match SystemFlags::bit_for_name(flag) {
        0 => "(0)".to_string(),
        bit => format!("((flags & {bit}) != 0)"),
    }))
}

pub(crate) fn user_flag_condition(args: &[Operand]) -> Operand {
    match args {
        [Operand::Str(flag)] => Operand::Sql(format!("(labels LIKE {})", quote(&format!("%{flag}%")))),
        _ => Operand::Sql("(0)".into()),
    }
}

/// `user-tag`: the two legacy encodings, else the tag column itself.
pub(crate) fn user_tag_operand(args: &[Operand]) -> Result<Operand> {
    match args.first().and_then(Operand::as_str) {
        Some("completed-on") => Ok(Operand::Sql(COMPLETED_ON.to_string())),
        Some("follow-up") => Ok(Operand::Sql(NO_FOLLOW_UP.to_string())),
        Some(_) => Ok(Operand::Column("usertags".into())),
        None => Err(SearchError::arity("user-tag", "expected a tag name")),
    }
}

/// `+` and `-`: folded when every operand is a literal, else an SQL
/// arithmetic expression.
pub(crate) fn arithmetic(op: &str, args: Vec<Operand>) -> Result<Operand> {
    if op == "+" && !args.is_empty() && args.iter().all(|a| a.as_str().is_some()) {
        return Ok(Operand::Str(args.iter().filter_map(Operand::as_str).collect()));
    }
    if args.iter().all(|a| matches!(a, Operand::Int(_))) {
        let mut numbers = args.iter().map(|a| match a {
            Operand::Int(n) => *n,
            _ => 0,
        });
        let first = numbers.next().unwrap_or(0);
        let total = numbers.fold(first, |acc, n| {
            if op == "+" {
                acc.saturating_add(n)
            } else {
                acc.saturating_sub(n)
            }
        });
        return Ok(Operand::Int(total));
    }
    let mut parts = Vec::with_capacity(args.len());
    for arg in &args {
        match arg {
            Operand::Column(_) | Operand::Int(_) => parts.push(arg.scalar().unwrap_or_default()),
            other => {
                return Err(SearchError::type_error(
                    op,
                    format!("cannot do arithmetic on a {}", other.kind()),
                ))
            }
        }
    }
    Ok(Operand::Column(format!("({})", parts.join(&format!(" {op} ")))))
}

pub(crate) fn cast_int(args: &[Operand]) -> Result<Operand> {
    match args {
        [Operand::Int(n)] => Ok(Operand::Int(*n)),
        [Operand::Bool(b)] => Ok(Operand::Int(i64::from(*b))),
        [Operand::Str(s)] => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            Ok(Operand::Int(digits.parse().unwrap_or(0)))
        }
        [Operand::Column(c)] => Ok(Operand::Column(format!("CAST({c} AS INTEGER)"))),
        _ => Err(SearchError::arity("cast-int", "expected one scalar argument")),
    }
}

pub(crate) fn cast_string(args: &[Operand]) -> Result<Operand> {
    match args {
        [Operand::Int(n)] => Ok(Operand::Str(n.to_string())),
        [Operand::Bool(b)] => Ok(Operand::Str(i64::from(*b).to_string())),
        [Operand::Str(s)] => Ok(Operand::Str(s.clone())),
        [Operand::Column(c)] => Ok(Operand::Column(format!("CAST({c} AS TEXT)"))),
        _ => Err(SearchError::arity("cast-string", "expected one scalar argument")),
    }
}

pub(crate) fn make_time(args: &[Operand]) -> Operand {
    Operand::Int(args.first().map(|a| dates::make_time(&a.to_value())).unwrap_or(-1))
}

pub(crate) fn relative_months(now: i64, args: &[Operand]) -> Operand {
    match args {
        [Operand::Int(months)] => Operand::Int(dates::add_months(now, *months)),
        [Operand::Int(time), Operand::Int(months)] => Operand::Int(dates::add_months(*time, *months)),
        [Operand::Column(c), Operand::Int(months)] => Operand::Column(format!(
            "CAST(strftime('%s', {c}, 'unixepoch', '{months:+} months') AS INTEGER)"
        )),
        _ => Operand::Bool(false),
    }
}

pub(crate) fn compare_date(args: &[Operand]) -> Result<Operand> {
    let [a, b] = args else {
        return Err(SearchError::arity("compare-date", "expected 2 arguments"));
    };
    let local_date = |o: &Operand| match o {
        Operand::Column(_) | Operand::Int(_) => o.scalar().map(|s| {
            format!("CAST(strftime('%Y%m%d', {s}, 'unixepoch', 'localtime') AS INTEGER)")
        }),
        _ => None,
    };
    Ok(match (local_date(a), local_date(b)) {
        (Some(a), Some(b)) => Operand::Column(format!("({a} - {b})")),
        _ => Operand::Int(0),
    })
}

pub(crate) fn sql_exp(args: &[Operand]) -> Operand {
    Operand::Sql(args.iter().filter_map(Operand::as_str).collect())
}
