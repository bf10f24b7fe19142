use std::collections::HashMap;
use std::sync::Arc;

use log::trace;

use crate::types::{
    GrammarError, GrammarGraph, GrammarNode, GrammarSnapshot, MaxRepeat, NodeId, NodeKind,
    Registry, RuleComponent, RuleReference,
};

/// Compile `rule_name` from `snapshot` into a fresh graph.
///
/// The rule is compiled as if it were referenced, so the graph starts with a
/// reference bookend naming it and ends at the matching end bookend, which is
/// the only final node.
pub(crate) fn compile(
    snapshot: &Arc<GrammarSnapshot>,
    registry: Option<&Registry>,
    rule_name: &str,
) -> Result<GrammarGraph, GrammarError> {
    if !snapshot.rules.contains_key(rule_name) {
        return Err(GrammarError::UndefinedRule {
            name: rule_name.to_owned(),
        });
    }

    let mut builder = GraphBuilder {
        root_grammar: snapshot.name.clone(),
        registry,
        pinned: HashMap::from([(snapshot.name.clone(), Arc::clone(snapshot))]),
        nodes: Vec::new(),
        active: Vec::new(),
    };
    let root = RuleReference::local(rule_name);
    let (start, end) = builder.reference(snapshot, &root, rule_name)?;
    builder.nodes[end].is_final = true;

    trace!(
        "compiled <{rule_name}> from grammar '{}' generation {}: {} nodes",
        snapshot.name,
        snapshot.generation,
        builder.nodes.len()
    );

    Ok(GrammarGraph {
        rule_name: rule_name.to_owned(),
        nodes: builder.nodes,
        start,
        end,
    })
}

struct GraphBuilder<'r> {
    root_grammar: String,
    registry: Option<&'r Registry>,
    /// One snapshot per grammar for the whole build.
    pinned: HashMap<String, Arc<GrammarSnapshot>>,
    nodes: Vec<GrammarNode>,
    /// `(grammar, rule)` pairs on the current expansion path.
    active: Vec<(String, String)>,
}

impl GraphBuilder<'_> {
    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(GrammarNode::new(kind));
        self.nodes.len() - 1
    }

    fn arc(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from].arcs.push(to);
    }

    fn set_end(&mut self, start: NodeId, end: NodeId) {
        match &mut self.nodes[start].kind {
            NodeKind::StartReference { end: e, .. }
            | NodeKind::StartAlternatives { end: e }
            | NodeKind::StartSequence { end: e }
            | NodeKind::StartCount { end: e } => *e = end,
            _ => {}
        }
    }

    fn grammar(&mut self, name: &str) -> Result<Arc<GrammarSnapshot>, GrammarError> {
        if let Some(snapshot) = self.pinned.get(name) {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = self
            .registry
            .and_then(|r| r.snapshot(name))
            .ok_or_else(|| GrammarError::UnknownGrammar {
                grammar: name.to_owned(),
            })?;
        self.pinned.insert(name.to_owned(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn display_name(&self, grammar: &str, rule: &str) -> String {
        if grammar == self.root_grammar {
            rule.to_owned()
        } else {
            format!("{grammar}.{rule}")
        }
    }

    /// Inline the referenced rule between reference bookends. `from_rule` is
    /// the rule containing the reference, for error reporting.
    fn reference(
        &mut self,
        current: &Arc<GrammarSnapshot>,
        reference: &RuleReference,
        from_rule: &str,
    ) -> Result<(NodeId, NodeId), GrammarError> {
        let target = match &reference.grammar {
            Some(name) if *name != current.name => self.grammar(name)?,
            _ => Arc::clone(current),
        };
        let internal = target.rules.get(&reference.rule_name).ok_or_else(|| {
            GrammarError::UndefinedReference {
                rule: from_rule.to_owned(),
                reference: reference.to_string(),
            }
        })?;
        if target.name != current.name && !internal.rule.is_public() {
            return Err(GrammarError::NotPublic {
                name: self.display_name(&target.name, &reference.rule_name),
                operation: "referenced from another grammar",
            });
        }

        let key = (target.name.clone(), reference.rule_name.clone());
        if let Some(pos) = self.active.iter().position(|k| *k == key) {
            let mut path: Vec<String> = self.active[pos..]
                .iter()
                .map(|(g, r)| self.display_name(g, r))
                .collect();
            path.push(self.display_name(&key.0, &key.1));
            return Err(GrammarError::CyclicReference { path });
        }

        let start = self.push(NodeKind::StartReference {
            rule: internal.rule.name.clone(),
            end: 0,
        });
        let end = self.push(NodeKind::EndReference);
        self.set_end(start, end);

        self.active.push(key);
        let (entry, exit) =
            self.component(&target, &internal.rule.component, &internal.rule.name)?;
        self.active.pop();

        self.arc(start, entry);
        self.arc(exit, end);
        Ok((start, end))
    }

    fn component(
        &mut self,
        grammar: &Arc<GrammarSnapshot>,
        component: &RuleComponent,
        rule: &str,
    ) -> Result<(NodeId, NodeId), GrammarError> {
        match component {
            RuleComponent::Token(text) => {
                let words = text.split_whitespace().map(str::to_lowercase).collect();
                let id = self.push(NodeKind::Token {
                    text: text.clone(),
                    words,
                });
                Ok((id, id))
            }
            RuleComponent::Tag(value) => {
                let id = self.push(NodeKind::Tag(value.clone()));
                Ok((id, id))
            }
            RuleComponent::Reference(reference) => self.reference(grammar, reference, rule),
            RuleComponent::Sequence(items) => {
                let start = self.push(NodeKind::StartSequence { end: 0 });
                let end = self.push(NodeKind::EndSequence);
                self.set_end(start, end);
                let mut prev = start;
                for item in items {
                    let (entry, exit) = self.component(grammar, item, rule)?;
                    self.arc(prev, entry);
                    prev = exit;
                }
                self.arc(prev, end);
                Ok((start, end))
            }
            RuleComponent::Alternatives { components, .. } => {
                let start = self.push(NodeKind::StartAlternatives { end: 0 });
                let end = self.push(NodeKind::EndAlternatives);
                self.set_end(start, end);
                for item in components {
                    let (entry, exit) = self.component(grammar, item, rule)?;
                    self.arc(start, entry);
                    self.arc(exit, end);
                }
                Ok((start, end))
            }
            RuleComponent::Count {
                component,
                min,
                max,
                ..
            } => self.count(grammar, component, *min, *max, rule),
        }
    }

    /// Unroll a counted component: mandatory copies back to back, each
    /// optional copy bypassable straight to the end, and for an indefinite
    /// maximum a loop from the last copy's exit back to its entry. Arcs into
    /// a copy are added before bypass arcs, so longer matches are tried first.
    fn count(
        &mut self,
        grammar: &Arc<GrammarSnapshot>,
        child: &RuleComponent,
        min: u32,
        max: MaxRepeat,
        rule: &str,
    ) -> Result<(NodeId, NodeId), GrammarError> {
        let copies = match max {
            MaxRepeat::Finite(max) if max < min => {
                return Err(GrammarError::InvalidRule {
                    rule: rule.to_owned(),
                    reason: format!("repeat minimum {min} exceeds maximum {max}"),
                })
            }
            MaxRepeat::Finite(max) => max,
            MaxRepeat::Indefinite => min.max(1),
        };

        let start = self.push(NodeKind::StartCount { end: 0 });
        let end = self.push(NodeKind::EndCount);
        self.set_end(start, end);

        let mut prev = start;
        let mut last = None;
        for i in 0..copies {
            let (entry, exit) = self.component(grammar, child, rule)?;
            self.arc(prev, entry);
            if i >= min {
                self.arc(prev, end);
            }
            prev = exit;
            last = Some((entry, exit));
        }

        if let (MaxRepeat::Indefinite, Some((entry, exit))) = (max, last) {
            self.arc(exit, entry);
            self.nodes[entry].loop_entry = true;
        }
        self.arc(prev, end);
        Ok((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alt, rule_ref, seq, tag, token, Rule, RuleGrammar};

    fn grammar(rules: Vec<Rule>) -> RuleGrammar {
        let g = RuleGrammar::new("test");
        for rule in rules {
            g.add_rule(rule).unwrap();
        }
        g.commit_changes().unwrap();
        g
    }

    fn count_kind(graph: &GrammarGraph, pred: impl Fn(&NodeKind) -> bool) -> usize {
        graph.nodes().iter().filter(|n| pred(n.kind())).count()
    }

    #[test]
    fn token_rule_is_wrapped_in_reference() {
        let g = grammar(vec![Rule::public("yes", token("yes"))]);
        let graph = g.compile("yes").unwrap();
        assert_eq!(graph.node_count(), 3);
        assert!(matches!(
            graph.node(graph.start()).unwrap().kind(),
            NodeKind::StartReference { rule, .. } if rule == "yes"
        ));
        assert!(graph.node(graph.end()).unwrap().is_final());
        assert_eq!(count_kind(&graph, |k| k.is_token()), 1);
    }

    #[test]
    fn start_bookends_know_their_end() {
        let g = grammar(vec![Rule::public("r", seq([token("a"), token("b")]))]);
        let graph = g.compile("r").unwrap();
        for (id, node) in graph.nodes().iter().enumerate() {
            if let NodeKind::StartSequence { end } = node.kind() {
                assert_eq!(graph.node(*end).unwrap().kind(), &NodeKind::EndSequence);
                assert_ne!(*end, id);
            }
        }
    }

    #[test]
    fn alternatives_keep_declaration_order() {
        let g = grammar(vec![Rule::public("r", alt([token("a"), token("b"), token("c")]))]);
        let graph = g.compile("r").unwrap();
        let (start_id, start) = graph
            .nodes()
            .iter()
            .enumerate()
            .find(|(_, n)| matches!(n.kind(), NodeKind::StartAlternatives { .. }))
            .unwrap();
        let words: Vec<&str> = start
            .arcs()
            .iter()
            .map(|&id| match graph.node(id).unwrap().kind() {
                NodeKind::Token { text, .. } => text.as_str(),
                other => panic!("expected token, got {other:?} after node {start_id}"),
            })
            .collect();
        assert_eq!(words, ["a", "b", "c"]);
    }

    #[test]
    fn bounded_count_unrolls_to_max() {
        let g = grammar(vec![Rule::public(
            "r",
            token("again").repeat(2, MaxRepeat::Finite(5)),
        )]);
        let graph = g.compile("r").unwrap();
        assert_eq!(graph.token_node_count(), 5);
    }

    #[test]
    fn indefinite_count_unrolls_minimum_and_loops() {
        let g = grammar(vec![Rule::public(
            "r",
            token("go").repeat(3, MaxRepeat::Indefinite),
        )]);
        let graph = g.compile("r").unwrap();
        assert_eq!(graph.token_node_count(), 3);
        let loops = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(id, n)| n.arcs().contains(id))
            .count();
        assert_eq!(loops, 1);
    }

    #[test]
    fn zero_or_more_has_one_copy() {
        let g = grammar(vec![Rule::public("r", token("please").zero_or_more())]);
        let graph = g.compile("r").unwrap();
        assert_eq!(graph.token_node_count(), 1);
    }

    #[test]
    fn repeated_reference_is_inlined_each_time() {
        let g = grammar(vec![
            Rule::private("digit", alt([token("one"), token("two")])),
            Rule::public("pair", seq([rule_ref("digit"), rule_ref("digit")])),
        ]);
        let graph = g.compile("pair").unwrap();
        assert_eq!(graph.token_node_count(), 4);
        assert_eq!(
            count_kind(&graph, |k| matches!(k, NodeKind::StartReference { .. })),
            3
        );
    }

    #[test]
    fn undefined_reference_names_the_referrer() {
        let g = grammar(vec![Rule::public("r", seq([token("a"), rule_ref("missing")]))]);
        let err = g.compile("r").unwrap_err();
        assert_eq!(
            err,
            GrammarError::UndefinedReference {
                rule: "r".into(),
                reference: "<missing>".into(),
            }
        );
    }

    #[test]
    fn self_reference_is_cyclic() {
        let g = grammar(vec![Rule::public(
            "digits",
            seq([token("one"), rule_ref("digits").optional()]),
        )]);
        let err = g.compile("digits").unwrap_err();
        assert_eq!(
            err,
            GrammarError::CyclicReference {
                path: vec!["digits".into(), "digits".into()],
            }
        );
    }

    #[test]
    fn three_rule_cycle_reports_path() {
        let g = grammar(vec![
            Rule::public("a", rule_ref("b")),
            Rule::private("b", rule_ref("c")),
            Rule::private("c", seq([tag("x"), rule_ref("a")])),
        ]);
        match g.compile("a") {
            Err(GrammarError::CyclicReference { path }) => {
                assert_eq!(path, ["a", "b", "c", "a"]);
            }
            other => panic!("expected CyclicReference, got {other:?}"),
        }
    }

    #[test]
    fn unknown_rule_is_undefined() {
        let g = grammar(vec![Rule::public("a", token("a"))]);
        assert!(matches!(
            g.compile("nope"),
            Err(GrammarError::UndefinedRule { .. })
        ));
    }

    #[test]
    fn qualified_reference_without_manager_fails() {
        let g = grammar(vec![Rule::public(
            "a",
            RuleComponent::Reference(RuleReference::qualified("other", "b")),
        )]);
        assert_eq!(
            g.compile("a").unwrap_err(),
            GrammarError::UnknownGrammar {
                grammar: "other".into()
            }
        );
    }
}
