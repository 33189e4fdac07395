//! Tree-walking SQL compiler.

use tracing::debug;

use super::{
    arithmetic, cast_int, cast_string, compare_date, comparison, finish, header_condition,
    header_exists_condition, join, make_time, negate, relative_months, sql_exp,
    system_flag_condition, user_flag_condition, user_tag_operand, Operand, SqlCompiler,
};
use crate::error::{Result, SearchError};
use crate::search::dates;
use crate::search::words::MatchKind;
use crate::sexp::{self, Term};

/// Folds the parsed term tree bottom-up into a `WHERE` fragment.
#[derive(Debug, Clone)]
pub struct RecursiveCompiler {
    now: i64,
}

impl Default for RecursiveCompiler {
    fn default() -> Self {
        Self { now: dates::now() }
    }
}

impl RecursiveCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock used for `get-current-date`.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    /// Compile an already parsed expression.
    pub fn compile_term(&self, term: &Term) -> Result<String> {
        finish(self.lower(term)?)
    }

    fn lower(&self, term: &Term) -> Result<Operand> {
        let (name, args) = match term {
            Term::Bool(b) => return Ok(Operand::Bool(*b)),
            Term::Int(n) => return Ok(Operand::Int(*n)),
            Term::String(s) => return Ok(Operand::Str(s.clone())),
            Term::Call { name, args } => (name.as_str(), args.as_slice()),
        };

        match name {
            "match-all" => {
                return match args.first() {
                    None => Ok(Operand::Sql("1".into())),
                    Some(Term::Bool(b)) => Ok(Operand::Sql(if *b { "1" } else { "0" }.into())),
                    Some(inner) => self.lower(inner),
                }
            }
            // Thread expansion has no SQL form; keep the plain conjuncts
            "match-threads" => {
                let parts = args
                    .iter()
                    .skip(1)
                    .map(|a| self.lower(a))
                    .collect::<Result<Vec<_>>>()?;
                return join("and", parts);
            }
            _ => {}
        }

        let lowered = args
            .iter()
            .map(|a| self.lower(a))
            .collect::<Result<Vec<_>>>()?;

        match name {
            "and" | "or" => join(name, lowered),
            "not" => negate(lowered.into_iter().next()),
            "=" | "<" | ">" => comparison(name, lowered),
            "+" | "-" => arithmetic(name, lowered),
            "header-contains" => header_condition(name, MatchKind::Contains, &lowered),
            "header-matches" => header_condition(name, MatchKind::Exact, &lowered),
            "header-starts-with" => header_condition(name, MatchKind::StartsWith, &lowered),
            "header-ends-with" => header_condition(name, MatchKind::EndsWith, &lowered),
            "header-has-words" => header_condition(name, MatchKind::Word, &lowered),
            "header-exists" => header_exists_condition(&lowered),
            "system-flag" => system_flag_condition(&lowered),
            "user-flag" => Ok(user_flag_condition(&lowered)),
            "user-tag" => user_tag_operand(&lowered),
            "get-sent-date" => Ok(Operand::Column("dsent".into())),
            "get-received-date" => Ok(Operand::Column("dreceived".into())),
            "get-size" => Ok(Operand::Column("(size / 1024)".into())),
            "get-current-date" => Ok(Operand::Int(self.now)),
            "get-relative-months" => Ok(relative_months(self.now, &lowered)),
            "make-time" => Ok(make_time(&lowered)),
            "compare-date" => compare_date(&lowered),
            "cast-int" => cast_int(&lowered),
            "cast-string" => cast_string(&lowered),
            "sql-exp" => Ok(sql_exp(&lowered)),
            other => Err(SearchError::UnknownFunction(other.to_string())),
        }
    }
}

impl SqlCompiler for RecursiveCompiler {
    fn name(&self) -> &'static str {
        "recursive"
    }

    fn compile(&self, expression: &str) -> Result<String> {
        let fragment = self.compile_term(&sexp::parse(expression)?)?;
        debug!(compiler = self.name(), %fragment, "Compiled expression");
        Ok(fragment)
    }
}
