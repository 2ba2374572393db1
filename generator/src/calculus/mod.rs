// calculus — the process-calculus behavior language.
//
// A process's behavior is a small expression over named actions: receives
// `(!name)`, dispatches `[@name]`, conditions `<name>`, subprocess jumps
// `{name}`, composed with `.` (sequence) and `|` (choice). The lexer and
// parser live in submodules; this module owns the expression tree and the
// usage rules every process must satisfy.

pub mod lexer;
pub mod parser;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EmgError, Result};

// ── Expression tree ─────────────────────────────────────────────────────────

/// Repetition suffix on a signal or condition: a literal count or a label
/// whose bound value supplies the count at translation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repetition {
    Literal(u64),
    Label(String),
}

/// A parsed behavior expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExpr {
    Null,
    Receive {
        name: String,
        replicative: bool,
        repetition: Option<Repetition>,
    },
    Dispatch {
        name: String,
        broadcast: bool,
        repetition: Option<Repetition>,
    },
    Condition {
        name: String,
        repetition: Option<Repetition>,
    },
    Subprocess {
        name: String,
    },
    Sequence(Vec<ProcessExpr>),
    Choice(Vec<ProcessExpr>),
}

/// The syntactic role a name plays in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageRole {
    Receive,
    Dispatch,
    Condition,
    Subprocess,
}

impl fmt::Display for UsageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UsageRole::Receive => "receive",
            UsageRole::Dispatch => "dispatch",
            UsageRole::Condition => "condition",
            UsageRole::Subprocess => "subprocess",
        };
        f.write_str(text)
    }
}

impl ProcessExpr {
    /// Record every named action and its role into `usage`. A name seen in
    /// two distinct roles anywhere across a process's expressions is a
    /// specification error.
    pub fn collect_usage(
        &self,
        context: &str,
        usage: &mut BTreeMap<String, UsageRole>,
    ) -> Result<()> {
        match self {
            ProcessExpr::Null => Ok(()),
            ProcessExpr::Receive { name, .. } => record(context, usage, name, UsageRole::Receive),
            ProcessExpr::Dispatch { name, .. } => record(context, usage, name, UsageRole::Dispatch),
            ProcessExpr::Condition { name, .. } => {
                record(context, usage, name, UsageRole::Condition)
            }
            ProcessExpr::Subprocess { name } => record(context, usage, name, UsageRole::Subprocess),
            ProcessExpr::Sequence(items) | ProcessExpr::Choice(items) => {
                for item in items {
                    item.collect_usage(context, usage)?;
                }
                Ok(())
            }
        }
    }

    /// The repetition attached to the first occurrence of `name`, if any.
    pub fn repetition_of(&self, name: &str) -> Option<&Repetition> {
        match self {
            ProcessExpr::Receive {
                name: n,
                repetition,
                ..
            }
            | ProcessExpr::Dispatch {
                name: n,
                repetition,
                ..
            }
            | ProcessExpr::Condition {
                name: n,
                repetition,
            } if n == name => repetition.as_ref(),
            ProcessExpr::Sequence(items) | ProcessExpr::Choice(items) => {
                items.iter().find_map(|item| item.repetition_of(name))
            }
            _ => None,
        }
    }
}

fn record(
    context: &str,
    usage: &mut BTreeMap<String, UsageRole>,
    name: &str,
    role: UsageRole,
) -> Result<()> {
    match usage.get(name) {
        Some(existing) if *existing != role => Err(EmgError::spec(
            context,
            format!("action '{name}' is used differently at once: {existing} and {role}"),
        )),
        _ => {
            usage.insert(name.to_string(), role);
            Ok(())
        }
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Parse a behavior expression, treating any lex or parse error as a fatal
/// specification error naming the owning process.
pub fn parse_expression(context: &str, expression: &str) -> Result<ProcessExpr> {
    let result = parser::parse(expression);
    if let Some(error) = result.errors.first() {
        return Err(EmgError::spec(
            context,
            format!("cannot parse process expression {expression:?}: {error}"),
        ));
    }
    result
        .expr
        .ok_or_else(|| EmgError::spec(context, format!("empty process expression {expression:?}")))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_collected_per_role() {
        let expr = parse_expression("p", "(!register).[probe].<done>").unwrap();
        let mut usage = BTreeMap::new();
        expr.collect_usage("p", &mut usage).unwrap();
        assert_eq!(usage["register"], UsageRole::Receive);
        assert_eq!(usage["probe"], UsageRole::Dispatch);
        assert_eq!(usage["done"], UsageRole::Condition);
    }

    #[test]
    fn conflicting_roles_rejected() {
        let expr = parse_expression("p", "(go).[go]").unwrap();
        let mut usage = BTreeMap::new();
        let err = expr.collect_usage("p", &mut usage).unwrap_err();
        assert!(format!("{err}").contains("used differently at once"));
    }

    #[test]
    fn same_role_twice_accepted() {
        let expr = parse_expression("p", "<check>.<check>").unwrap();
        let mut usage = BTreeMap::new();
        expr.collect_usage("p", &mut usage).unwrap();
        assert_eq!(usage.len(), 1);
    }

    #[test]
    fn parse_error_names_process() {
        let err = parse_expression("loader", "(!register").unwrap_err();
        assert!(format!("{err}").contains("loader"));
    }

    #[test]
    fn repetition_lookup() {
        let expr = parse_expression("p", "(read[%count%]).<done>").unwrap();
        assert_eq!(
            expr.repetition_of("read"),
            Some(&Repetition::Label("count".into()))
        );
        assert_eq!(expr.repetition_of("done"), None);
    }
}
