use std::fmt;

use thiserror::Error;

/// Structural grammar errors: raised by the operation that detects them, either
/// when a change is queued, when it is committed, or when a rule is compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("duplicate rule name '{name}'")]
    DuplicateRule { name: String },

    #[error("undefined rule '{name}'")]
    UndefinedRule { name: String },

    #[error("rule '{name}' is private and cannot be {operation}")]
    NotPublic { name: String, operation: &'static str },

    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("undefined rule reference '{reference}' in rule '{rule}'")]
    UndefinedReference { rule: String, reference: String },

    #[error("cyclic rule reference: {}", path.join(" -> "))]
    CyclicReference { path: Vec<String> },

    #[error("unknown grammar '{grammar}'")]
    UnknownGrammar { grammar: String },

    #[error("duplicate grammar name '{name}'")]
    DuplicateGrammar { name: String },

    #[error("grammar '{grammar}' has no root rule and no activatable public rules")]
    NoRootRule { grammar: String },
}

/// Failures of individual operations during one
/// [`commit_changes()`](super::RuleGrammar::commit_changes).
///
/// A commit never rolls back: operations that succeeded stay applied and are
/// published even when this error is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CommitError {
    pub failures: Vec<GrammarError>,
    pub applied: usize,
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} queued operation(s) failed ({} applied)",
            self.failures.len(),
            self.applied
        )?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}
