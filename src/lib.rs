mod compile;
mod error;
mod matcher;
pub mod parse;
#[cfg(feature = "binary-cache")]
pub mod serial;
mod types;

pub use error::RulegramError;
pub use types::{
    alt, rule_ref, seq, tag, token, CommitError, GrammarError, GrammarGraph, GrammarManager,
    GrammarNode, GrammarSnapshot, MatchConfig, MaxRepeat, NodeId, NodeKind, ParseNode, Rule,
    RuleComponent, RuleGrammar, RuleParse, RuleReference, Scope, DEFAULT_MAX_DEPTH,
    MAX_REPEAT_BOUND, WILDCARD_TOKENS,
};

#[cfg(feature = "binary-cache")]
pub use serial::{DeserializeError, SerializeError};
