mod component;
mod error;
mod grammar;
mod graph;
mod manager;
mod match_config;
mod rule;
mod rule_parse;

pub use component::{
    alt, rule_ref, seq, tag, token, MaxRepeat, RuleComponent, RuleReference, MAX_REPEAT_BOUND,
};
pub use error::{CommitError, GrammarError};
pub use grammar::{GrammarSnapshot, RuleGrammar};
pub use graph::{GrammarGraph, GrammarNode, NodeId, NodeKind};
pub use manager::GrammarManager;
pub use match_config::{MatchConfig, DEFAULT_MAX_DEPTH, WILDCARD_TOKENS};
pub use rule::{Rule, Scope};
pub use rule_parse::{ParseNode, RuleParse};

pub(crate) use manager::Registry;
#[cfg(feature = "binary-cache")]
pub(crate) use rule::InternalRule;
