use std::fmt;

use super::match_config::MatchConfig;
use super::rule_parse::RuleParse;

/// Index of a node inside a [`GrammarGraph`].
pub type NodeId = usize;

/// What a graph node does when the matcher reaches it.
///
/// Start bookends record the id of their matching end node so that the
/// matcher can fold the fragments produced between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Consumes one input word per entry of `words` (lowercased).
    Token { text: String, words: Vec<String> },
    Tag(String),
    StartReference { rule: String, end: NodeId },
    EndReference,
    StartAlternatives { end: NodeId },
    EndAlternatives,
    StartSequence { end: NodeId },
    EndSequence,
    StartCount { end: NodeId },
    EndCount,
}

impl NodeKind {
    #[must_use]
    pub fn is_token(&self) -> bool {
        matches!(self, NodeKind::Token { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarNode {
    pub(crate) kind: NodeKind,
    pub(crate) is_final: bool,
    /// Target of an indefinite-repeat loop-back arc.
    pub(crate) loop_entry: bool,
    pub(crate) arcs: Vec<NodeId>,
}

impl GrammarNode {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            is_final: false,
            loop_entry: false,
            arcs: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Outgoing arcs in the order the matcher tries them.
    #[must_use]
    pub fn arcs(&self) -> &[NodeId] {
        &self.arcs
    }
}

/// A rule compiled into a directed graph of typed nodes.
///
/// Nodes live in an arena and arcs are indices, so repetition loops are plain
/// back edges. A graph is built from one committed snapshot of each grammar it
/// touches and never changes afterwards; it is cheap to share across threads.
#[derive(Debug, Clone)]
pub struct GrammarGraph {
    pub(crate) rule_name: String,
    pub(crate) nodes: Vec<GrammarNode>,
    pub(crate) start: NodeId,
    pub(crate) end: NodeId,
}

impl GrammarGraph {
    /// The rule this graph was compiled for.
    #[must_use]
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    #[must_use]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> NodeId {
        self.end
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&GrammarNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn nodes(&self) -> &[GrammarNode] {
        &self.nodes
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn arc_count(&self) -> usize {
        self.nodes.iter().map(|n| n.arcs.len()).sum()
    }

    /// Number of token nodes, i.e. words the graph can consume along all paths
    /// after unrolling repeats.
    #[must_use]
    pub fn token_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.kind.is_token()).count()
    }

    /// Match `tokens` against this graph. Every token must be consumed.
    pub fn match_tokens<S: AsRef<str>>(
        &self,
        tokens: &[S],
        config: &MatchConfig,
    ) -> Option<RuleParse> {
        crate::matcher::match_tokens(self, tokens, config)
    }
}

impl fmt::Display for GrammarGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GrammarGraph(<{}>, {} nodes, {} arcs)",
            self.rule_name,
            self.node_count(),
            self.arc_count(),
        )
    }
}
