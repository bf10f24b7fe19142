use std::fmt;

use super::component::RuleComponent;

/// Visibility of a rule. Only public rules can be a grammar's root, be
/// activated, or be referenced from another grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Public,
    Private,
}

/// A named grammar rule.
///
/// Rules are plain values: build them with [`Rule::public()`] /
/// [`Rule::private()`] or load them from text with [`crate::parse::parse()`],
/// then hand them to a [`RuleGrammar`](super::RuleGrammar).
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub scope: Scope,
    pub component: RuleComponent,
}

impl Rule {
    #[must_use]
    pub fn new(name: impl Into<String>, scope: Scope, component: RuleComponent) -> Self {
        Self {
            name: name.into(),
            scope,
            component,
        }
    }

    #[must_use]
    pub fn public(name: impl Into<String>, component: RuleComponent) -> Self {
        Self::new(name, Scope::Public, component)
    }

    #[must_use]
    pub fn private(name: impl Into<String>, component: RuleComponent) -> Self {
        Self::new(name, Scope::Private, component)
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.scope == Scope::Public
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_public() {
            write!(f, "public ")?;
        }
        write!(f, "<{}> = {};", self.name, self.component)
    }
}

/// A rule as held by a grammar: the insertion id orders default-root
/// selection and is never reused; private rules are never activatable.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InternalRule {
    pub(crate) rule: Rule,
    pub(crate) insertion_id: u64,
    pub(crate) activatable: bool,
}
