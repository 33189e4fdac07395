//! Stack-based SQL compiler.
//!
//! Works on the token stream rather than a parsed tree, in two passes.
//!
//! The first pass walks the tokens left to right. Every builtin with a leaf
//! rule is a *system node* that declares how many tokens it consumes
//! (operands plus itself). Its operands collect on the operand stack, and it
//! is reduced as soon as its count drops to one; `+`, `-`, `sql-exp` and
//! `get-relative-months` consume everything up to their closing paren
//! instead. Reduced conditions, together with the `and`/`or`/`not` operators
//! and their nesting level, go into one flat list. `match-all` adds nothing
//! of its own and `match-threads` behaves as `and` once its match type is
//! dropped.
//!
//! The second pass walks that list from the right. Each operator folds every
//! condition deeper than itself into one parenthesized condition.
//!
//! Only kept to cross-check [`super::RecursiveCompiler`]; new builtins go
//! there.

use tracing::debug;

use super::{
    arithmetic, cast_int, cast_string, compare_date, comparison, finish, header_condition,
    header_exists_condition, join, make_time, negate, relative_months, sql_exp,
    system_flag_condition, user_flag_condition, user_tag_operand, Operand, SqlCompiler,
};
use crate::error::{Result, SearchError};
use crate::search::dates;
use crate::search::words::MatchKind;
use crate::sexp::lexer::{tokenize, Token};

/// How many tokens a system node consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consume {
    /// Operands plus the node itself.
    Count(usize),
    /// Everything up to the node's closing paren.
    UntilClose,
}

fn system_node(name: &str) -> Option<Consume> {
    Some(match name {
        "header-contains" | "header-matches" | "header-starts-with" | "header-ends-with"
        | "header-has-words" => Consume::Count(3),
        "=" | "<" | ">" | "compare-date" => Consume::Count(3),
        "header-exists" | "system-flag" | "user-tag" | "user-flag" | "make-time" | "cast-int"
        | "cast-string" => Consume::Count(2),
        "get-sent-date" | "get-received-date" | "get-size" | "get-current-date" => Consume::Count(1),
        "+" | "-" | "sql-exp" | "get-relative-months" => Consume::UntilClose,
        _ => return None,
    })
}

/// An open system node on the operator stack.
#[derive(Debug)]
struct Node {
    id: usize,
    name: String,
    consume: Consume,
    /// Operand stack height when the node was opened.
    base: usize,
}

/// What an open paren turned out to be.
#[derive(Debug)]
enum Frame {
    /// `and`, `or`, `not`, `match-threads`.
    Logic,
    /// `match-all`; `mark` is the output length when it opened.
    MatchAll { mark: usize },
    System { id: usize, reduced: bool },
}

/// One entry of the flattened first-pass output.
#[derive(Debug)]
enum Item {
    Op { name: &'static str, level: usize },
    Operand { operand: Operand, level: usize },
}

/// Compiles through operator and operand stacks instead of a tree walk.
#[derive(Debug, Clone)]
pub struct LegacyCompiler {
    now: i64,
}

impl Default for LegacyCompiler {
    fn default() -> Self {
        Self { now: dates::now() }
    }
}

impl LegacyCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock used for `get-current-date`.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    fn reduce(&self, name: &str, args: Vec<Operand>) -> Result<Operand> {
        match name {
            "header-contains" => header_condition(name, MatchKind::Contains, &args),
            "header-matches" => header_condition(name, MatchKind::Exact, &args),
            "header-starts-with" => header_condition(name, MatchKind::StartsWith, &args),
            "header-ends-with" => header_condition(name, MatchKind::EndsWith, &args),
            "header-has-words" => header_condition(name, MatchKind::Word, &args),
            "header-exists" => header_exists_condition(&args),
            "system-flag" => system_flag_condition(&args),
            "user-flag" => Ok(user_flag_condition(&args)),
            "user-tag" => user_tag_operand(&args),
            "get-sent-date" => Ok(Operand::Column("dsent".into())),
            "get-received-date" => Ok(Operand::Column("dreceived".into())),
            "get-size" => Ok(Operand::Column("(size / 1024)".into())),
            "get-current-date" => Ok(Operand::Int(self.now)),
            "get-relative-months" => Ok(relative_months(self.now, &args)),
            "=" | "<" | ">" => comparison(name, args),
            "+" | "-" => arithmetic(name, args),
            "make-time" => Ok(make_time(&args)),
            "compare-date" => compare_date(&args),
            "cast-int" => cast_int(&args),
            "cast-string" => cast_string(&args),
            "sql-exp" => Ok(sql_exp(&args)),
            other => Err(SearchError::UnknownFunction(other.to_string())),
        }
    }
}

/// First-pass state.
#[derive(Default)]
struct Reducer {
    frames: Vec<Frame>,
    operators: Vec<Node>,
    operands: Vec<Operand>,
    all: Vec<Item>,
    level: usize,
    next_id: usize,
}

impl Reducer {
    /// Hand a value to the frame at `frame` (an index into `frames`), or to
    /// the output when that frame is not a system node.
    fn deliver(&mut self, compiler: &LegacyCompiler, frame: Option<usize>, operand: Operand) -> Result<()> {
        match frame.map(|i| (i, &self.frames[i])) {
            Some((_, Frame::System { reduced: true, .. })) => Err(SearchError::arity(
                "sql",
                "too many values for a single-value builtin",
            )),
            Some((i, Frame::System { id, .. })) => {
                let id = *id;
                self.operands.push(operand);
                let ready = match self.operators.last() {
                    Some(node) if node.id == id => match node.consume {
                        Consume::Count(n) => self.operands.len() - node.base + 1 >= n,
                        Consume::UntilClose => false,
                    },
                    _ => false,
                };
                if ready {
                    self.reduce_top(compiler, i)?;
                }
                Ok(())
            }
            _ => {
                self.all.push(Item::Operand {
                    operand,
                    level: self.level,
                });
                Ok(())
            }
        }
    }

    /// Reduce the top operator, whose frame is `frames[frame]`, and pass the
    /// result outward.
    fn reduce_top(&mut self, compiler: &LegacyCompiler, frame: usize) -> Result<()> {
        let Some(node) = self.operators.pop() else {
            return Ok(());
        };
        let args = self.operands.split_off(node.base);
        let result = compiler.reduce(&node.name, args)?;
        if let Some(Frame::System { reduced, .. }) = self.frames.get_mut(frame) {
            *reduced = true;
        }
        let parent = frame.checked_sub(1);
        self.deliver(compiler, parent, result)
    }
}

impl SqlCompiler for LegacyCompiler {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn compile(&self, expression: &str) -> Result<String> {
        let tokens = tokenize(expression)?;
        let mut r = Reducer::default();
        let mut iter = tokens.into_iter().peekable();

        // Pass 1: eager reduction
        while let Some(spanned) = iter.next() {
            let offset = spanned.offset;
            match spanned.token {
                Token::LParen => {
                    let name = match iter.next().map(|s| s.token) {
                        Some(Token::Symbol(name)) => name,
                        _ => {
                            return Err(SearchError::Parse {
                                offset,
                                reason: "expected a function name after '('".into(),
                            })
                        }
                    };
                    match name.as_str() {
                        "and" | "or" | "not" | "match-threads" => {
                            if name == "match-threads" {
                                if let Some(Token::Str(_)) = iter.peek().map(|s| &s.token) {
                                    iter.next();
                                }
                            }
                            let op = match name.as_str() {
                                "or" => "or",
                                "not" => "not",
                                _ => "and",
                            };
                            r.all.push(Item::Op { name: op, level: r.level });
                            r.level += 1;
                            r.frames.push(Frame::Logic);
                        }
                        "match-all" => {
                            let literal = match iter.peek().map(|s| &s.token) {
                                Some(Token::Bool(b)) => Some(*b),
                                _ => None,
                            };
                            if let Some(b) = literal {
                                iter.next();
                                r.all.push(Item::Operand {
                                    operand: Operand::Sql(if b { "1" } else { "0" }.into()),
                                    level: r.level,
                                });
                            }
                            r.frames.push(Frame::MatchAll { mark: r.all.len() - usize::from(literal.is_some()) });
                        }
                        _ => {
                            let consume = system_node(&name)
                                .ok_or_else(|| SearchError::UnknownFunction(name.clone()))?;
                            let id = r.next_id;
                            r.next_id += 1;
                            r.frames.push(Frame::System { id, reduced: false });
                            r.operators.push(Node {
                                id,
                                name,
                                consume,
                                base: r.operands.len(),
                            });
                            if consume == Consume::Count(1) {
                                let frame = r.frames.len() - 1;
                                r.reduce_top(self, frame)?;
                            }
                        }
                    }
                }
                Token::RParen => {
                    let frame = r.frames.pop().ok_or_else(|| SearchError::Parse {
                        offset,
                        reason: "unbalanced ')'".into(),
                    })?;
                    match frame {
                        Frame::Logic => r.level -= 1,
                        Frame::MatchAll { mark } => {
                            if r.all.len() == mark {
                                r.all.push(Item::Operand {
                                    operand: Operand::Sql("1".into()),
                                    level: r.level,
                                });
                            }
                        }
                        Frame::System { reduced: true, .. } => {}
                        // Greedy node, or one closed with fewer operands
                        // than it declared
                        Frame::System { reduced: false, .. } => {
                            let index = r.frames.len();
                            r.reduce_top(self, index)?;
                        }
                    }
                }
                Token::Str(s) => {
                    let top = r.frames.len().checked_sub(1);
                    r.deliver(self, top, Operand::Str(s))?;
                }
                Token::Int(n) => {
                    let top = r.frames.len().checked_sub(1);
                    r.deliver(self, top, Operand::Int(n))?;
                }
                Token::Bool(b) => {
                    let top = r.frames.len().checked_sub(1);
                    r.deliver(self, top, Operand::Bool(b))?;
                }
                Token::Symbol(s) => {
                    return Err(SearchError::Parse {
                        offset,
                        reason: format!("unexpected symbol '{s}'"),
                    })
                }
            }
        }
        if !r.frames.is_empty() {
            return Err(SearchError::Parse {
                offset: expression.len(),
                reason: "unexpected end of expression".into(),
            });
        }

        // Pass 2: fold operator groups, right to left
        let mut stack: Vec<(Operand, usize)> = Vec::new();
        for item in r.all.into_iter().rev() {
            match item {
                Item::Operand { operand, level } => stack.push((operand, level)),
                Item::Op { name, level } => {
                    let mut group = Vec::new();
                    while stack.last().is_some_and(|(_, l)| *l > level) {
                        if let Some((operand, _)) = stack.pop() {
                            group.push(operand);
                        }
                    }
                    let folded = match name {
                        "not" => negate(group.into_iter().next())?,
                        _ => join(name, group)?,
                    };
                    stack.push((folded, level));
                }
            }
        }

        let fragment = match stack.len() {
            0 => {
                return Err(SearchError::Parse {
                    offset: 0,
                    reason: "empty expression".into(),
                })
            }
            1 => finish(stack.remove(0).0)?,
            _ => {
                return Err(SearchError::Parse {
                    offset: 0,
                    reason: "more than one top-level expression".into(),
                })
            }
        };
        debug!(compiler = self.name(), %fragment, "Compiled expression");
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{RecursiveCompiler, NOT_COMPLETED_ON, NO_FOLLOW_UP};

    fn compile(expr: &str) -> Result<String> {
        LegacyCompiler::new().with_now(1_000_000).compile(expr)
    }

    #[test]
    fn test_junk_conjunction() {
        assert_eq!(
            compile(r#"(and (match-all (system-flag "junk")) (match-all (system-flag "junk")))"#)
                .expect("sql"),
            "( (junk = 1) AND (junk = 1) )"
        );
    }

    #[test]
    fn test_sibling_levels_do_not_leak() {
        // The trailing match-all sits at the same logic level as the `or`
        assert_eq!(
            compile(
                r#"(and (or (match-all (system-flag "seen")) (match-all (system-flag "junk"))) (match-all (system-flag "deleted")))"#
            )
            .expect("sql"),
            "( ( (read = 1) OR (junk = 1) ) AND (deleted = 1) )"
        );
    }

    #[test]
    fn test_legacy_tag_rewrites() {
        assert_eq!(
            compile(r#"(match-all (not (= (user-tag "completed-on") "")))"#).expect("sql"),
            NOT_COMPLETED_ON
        );
        assert_eq!(
            compile(r#"(match-all (= (user-tag "follow-up") ""))"#).expect("sql"),
            format!("( {NO_FOLLOW_UP} )")
        );
    }

    #[test]
    fn test_greedy_arithmetic() {
        assert_eq!(
            compile(r#"(match-all (user-flag (+ "$Label" "work")))"#).expect("sql"),
            "(labels LIKE '%$Labelwork%')"
        );
        assert_eq!(
            compile("(match-all (= (get-received-date) (- (get-current-date) 604800)))").expect("sql"),
            "( dreceived = 395200 )"
        );
    }

    #[test]
    fn test_match_all_forms() {
        assert_eq!(compile("(match-all)").expect("sql"), "1");
        assert_eq!(compile("(and (match-all #t) (and (match-all #t)))").expect("sql"), "( 1 AND ( 1 ) )");
        assert_eq!(
            compile(r#"(match-threads "replies_parents" (and (match-all (header-matches "to" "maw"))))"#)
                .expect("sql"),
            "( ( (mail_to IS NOT NULL AND mail_to LIKE '%maw%') ) )"
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(compile(r#"(body-contains "x")"#), Err(SearchError::UnknownFunction(_))));
        assert!(matches!(compile("(and (match-all)"), Err(SearchError::Parse { .. })));
        assert!(matches!(compile("(match-all))"), Err(SearchError::Parse { .. })));
        assert!(matches!(
            compile(r#"(match-all (header-contains "subject" "a" "b"))"#),
            Err(SearchError::Arity { .. })
        ));
    }

    #[test]
    fn test_same_text_as_recursive_on_typical_filters() {
        let recursive = RecursiveCompiler::new().with_now(1_000_000);
        for expr in [
            r#"(match-all (not (system-flag "deleted")))"#,
            r#"(and (match-all (and (not (system-flag "deleted")) (not (system-flag "junk")))) (and (or (match-all (header-contains "Subject" "org")) (match-all (header-contains "From" "org")) (match-all (system-flag "Flagged")))))"#,
            r#"(and (match-all (and (not (system-flag "deleted")) (not (system-flag "junk")))) (and (or (match-all (or (= (user-tag "label") "important") (user-flag (+ "$Label" "important")) (user-flag "important"))))))"#,
            r#"(and (match-all (and (not (system-flag "deleted")) (not (system-flag "junk")))) (and (or (match-all (> (get-sent-date) (- (get-current-date) 100))))))"#,
            r#"(and (sql-exp "folder_key = 'a'") (match-threads "all" (and (match-all (header-starts-with "subject" "re")))))"#,
        ] {
            assert_eq!(compile(expr).expect("legacy"), recursive.compile(expr).expect("recursive"), "{expr}");
        }
    }
}
