use std::collections::HashSet;

use log::debug;

use crate::types::{
    GrammarGraph, GrammarNode, MatchConfig, NodeId, NodeKind, ParseNode, RuleParse,
    WILDCARD_TOKENS,
};

/// A result fragment. Fragments are pushed while a successful path unwinds,
/// so the top of the stack is always the earliest unfolded fragment.
#[derive(Debug)]
enum Fragment {
    Node(ParseNode),
    /// Position marker left by an end bookend for its start bookend.
    End(NodeId),
}

/// Why an attempt was abandoned before the search space was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Budget {
    Steps,
    Depth,
}

pub(crate) fn match_tokens<S: AsRef<str>>(
    graph: &GrammarGraph,
    tokens: &[S],
    config: &MatchConfig,
) -> Option<RuleParse> {
    let mut matcher = Matcher {
        graph,
        config,
        input: tokens.iter().map(|t| t.as_ref().to_lowercase()).collect(),
        position: 0,
        stack: Vec::new(),
        steps: 0,
        depth: 0,
        exhausted: None,
        loop_visits: HashSet::new(),
    };

    if !matcher.walk(graph.start) {
        match matcher.exhausted {
            Some(Budget::Steps) => debug!(
                "match of <{}> abandoned after {} steps",
                graph.rule_name, matcher.steps
            ),
            Some(Budget::Depth) => debug!(
                "match of <{}> abandoned at depth {} after {} steps",
                graph.rule_name,
                config.depth_limit(),
                matcher.steps
            ),
            None => {}
        }
        return None;
    }

    match matcher.stack.pop() {
        Some(Fragment::Node(ParseNode::Rule(parse))) => Some(parse),
        other => {
            debug!(
                "match of <{}> ended with unexpected fragment {other:?}",
                graph.rule_name
            );
            None
        }
    }
}

struct Matcher<'g, 'c> {
    graph: &'g GrammarGraph,
    config: &'c MatchConfig,
    input: Vec<String>,
    position: usize,
    stack: Vec<Fragment>,
    steps: u64,
    /// Nodes on the active path.
    depth: usize,
    exhausted: Option<Budget>,
    /// `(loop entry, position)` pairs on the active path; re-entering one
    /// means a loop iteration consumed nothing.
    loop_visits: HashSet<(NodeId, usize)>,
}

impl<'g> Matcher<'g, '_> {
    fn walk(&mut self, id: NodeId) -> bool {
        if let Some(limit) = self.config.step_limit() {
            if self.steps >= limit {
                self.exhausted = Some(Budget::Steps);
                return false;
            }
        }
        if self.depth >= self.config.depth_limit() {
            self.exhausted = Some(Budget::Depth);
            return false;
        }
        self.steps += 1;
        self.depth += 1;

        let graph = self.graph;
        let node = &graph.nodes[id];
        let matched = if !node.loop_entry {
            self.visit(id, node)
        } else {
            let visit = (id, self.position);
            if self.loop_visits.insert(visit) {
                let matched = self.visit(id, node);
                self.loop_visits.remove(&visit);
                matched
            } else {
                false
            }
        };

        self.depth -= 1;
        matched
    }

    fn visit(&mut self, id: NodeId, node: &'g GrammarNode) -> bool {
        if node.is_final && self.position == self.input.len() {
            self.stack.push(Fragment::End(id));
            return true;
        }

        match &node.kind {
            NodeKind::Token { text, words } => {
                let entry = self.position;
                if !self.consume(words) {
                    return false;
                }
                if self.follow(node).is_some() {
                    self.stack.push(Fragment::Node(ParseNode::Token(text.clone())));
                    true
                } else {
                    self.position = entry;
                    false
                }
            }
            NodeKind::Tag(value) => {
                if self.follow(node).is_some() {
                    self.stack.push(Fragment::Node(ParseNode::Tag(value.clone())));
                    true
                } else {
                    false
                }
            }
            NodeKind::EndReference
            | NodeKind::EndAlternatives
            | NodeKind::EndSequence
            | NodeKind::EndCount => {
                if self.follow(node).is_some() {
                    self.stack.push(Fragment::End(id));
                    true
                } else {
                    false
                }
            }
            NodeKind::StartReference { rule, end } => self.follow(node).is_some_and(|_| {
                let body = single(self.fold(*end));
                let parse = RuleParse::new(rule.clone(), body);
                self.stack.push(Fragment::Node(ParseNode::Rule(parse)));
                true
            }),
            NodeKind::StartAlternatives { end } => self.follow(node).is_some_and(|index| {
                let branch = single(self.fold(*end));
                self.stack.push(Fragment::Node(ParseNode::Alternative {
                    index,
                    node: Box::new(branch),
                }));
                true
            }),
            NodeKind::StartSequence { end } | NodeKind::StartCount { end } => {
                self.follow(node).is_some_and(|_| {
                    let items = self.fold(*end);
                    self.stack.push(Fragment::Node(ParseNode::Sequence(items)));
                    true
                })
            }
        }
    }

    /// Try each outgoing arc in order and return the index of the first one
    /// whose path reaches the final node. The position is restored after
    /// every failed arc.
    fn follow(&mut self, node: &'g GrammarNode) -> Option<usize> {
        for (index, &next) in node.arcs.iter().enumerate() {
            let entry = self.position;
            if self.walk(next) {
                return Some(index);
            }
            self.position = entry;
            if self.exhausted.is_some() {
                break;
            }
        }
        None
    }

    /// Pop the fragments produced since the start bookend, up to and
    /// including the marker of its end bookend `end`, in path order.
    fn fold(&mut self, end: NodeId) -> Vec<ParseNode> {
        let mut items = Vec::new();
        while let Some(fragment) = self.stack.pop() {
            match fragment {
                Fragment::End(id) if id == end => break,
                Fragment::End(_) => {}
                Fragment::Node(node) => items.push(node),
            }
        }
        items
    }

    fn consume(&mut self, words: &[String]) -> bool {
        let end = self.position + words.len();
        if end > self.input.len() {
            return false;
        }
        let wildcards = self.config.wildcards_enabled();
        let matched = words
            .iter()
            .zip(&self.input[self.position..end])
            .all(|(word, input)| {
                word == input || (wildcards && WILDCARD_TOKENS.contains(&input.as_str()))
            });
        if matched {
            self.position = end;
        }
        matched
    }
}

fn single(mut items: Vec<ParseNode>) -> ParseNode {
    if items.len() == 1 {
        items.remove(0)
    } else {
        ParseNode::Sequence(items)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        alt, rule_ref, seq, tag, token, MatchConfig, MaxRepeat, ParseNode, Rule, RuleComponent,
        RuleGrammar, RuleParse,
    };

    fn grammar(rules: Vec<Rule>) -> RuleGrammar {
        let g = RuleGrammar::new("test");
        for rule in rules {
            g.add_rule(rule).unwrap();
        }
        g.commit_changes().unwrap();
        g
    }

    fn parse(g: &RuleGrammar, rule: &str, input: &str) -> Option<RuleParse> {
        g.parse_text(input, Some(rule)).unwrap()
    }

    fn accepts(component: RuleComponent, input: &str) -> bool {
        let g = grammar(vec![Rule::public("r", component)]);
        parse(&g, "r", input).is_some()
    }

    #[test]
    fn exact_consumption() {
        let c = seq([token("turn"), token("on")]);
        assert!(accepts(c.clone(), "turn on"));
        assert!(!accepts(c.clone(), "turn on now"));
        assert!(!accepts(c, "turn"));
    }

    #[test]
    fn case_insensitive_tokens() {
        assert!(accepts(token("Lights"), "LIGHTS"));
    }

    #[test]
    fn multi_word_token() {
        let c = seq([token("turn on"), token("lights")]);
        assert!(accepts(c.clone(), "turn on lights"));
        assert!(!accepts(c, "turn lights"));
    }

    #[test]
    fn wildcard_input_matches_any_word() {
        assert!(accepts(token("red"), "%"));
        assert!(accepts(token("red"), "*"));
        assert!(accepts(seq([token("turn on"), token("red")]), "turn * %"));
    }

    #[test]
    fn wildcards_can_be_disabled() {
        let g = RuleGrammar::with_config("g", None, MatchConfig::new().wildcards(false));
        g.add_rule(Rule::public("r", token("red"))).unwrap();
        g.commit_changes().unwrap();
        assert!(g.parse(&["%"], None).unwrap().is_none());
        assert!(g.parse(&["red"], None).unwrap().is_some());
    }

    #[test]
    fn bounded_repetition() {
        let c = token("again").repeat(2, MaxRepeat::Finite(3));
        assert!(!accepts(c.clone(), ""));
        assert!(!accepts(c.clone(), "again"));
        assert!(accepts(c.clone(), "again again"));
        assert!(accepts(c.clone(), "again again again"));
        assert!(!accepts(c, "again again again again"));
    }

    #[test]
    fn indefinite_repetition() {
        let c = token("please").zero_or_more();
        for n in 0..=20 {
            let input = vec!["please"; n].join(" ");
            assert!(accepts(c.clone(), &input), "failed for {n} repeats");
        }
        assert!(!accepts(c, "please thanks"));
    }

    #[test]
    fn one_or_more_needs_one() {
        let c = seq([token("go"), token("on").one_or_more()]);
        assert!(!accepts(c.clone(), "go"));
        assert!(accepts(c.clone(), "go on"));
        assert!(accepts(c, "go on on on"));
    }

    #[test]
    fn indefinite_with_minimum() {
        let c = token("x").repeat(2, MaxRepeat::Indefinite);
        assert!(!accepts(c.clone(), "x"));
        assert!(accepts(c.clone(), "x x"));
        assert!(accepts(c, "x x x x x"));
    }

    #[test]
    fn optional_sequence_followed_by_more() {
        let c = seq([token("a"), seq([token("b"), token("c")]).optional(), token("b")]);
        assert!(accepts(c.clone(), "a b"));
        assert!(accepts(c.clone(), "a b c b"));
        assert!(!accepts(c, "a b c"));
    }

    #[test]
    fn repetition_backtracks_to_let_suffix_match() {
        // The loop is greedy; the trailing token forces a shorter repeat.
        let c = seq([token("x").zero_or_more(), token("x")]);
        assert!(accepts(c.clone(), "x"));
        assert!(accepts(c, "x x x"));
    }

    #[test]
    fn loop_over_empty_body_terminates() {
        let c = seq([tag("t").zero_or_more(), token("end")]);
        assert!(accepts(c.clone(), "end"));
        assert!(!accepts(c, "nope"));

        let nested = seq([token("a").optional()]).zero_or_more();
        assert!(accepts(nested.clone(), ""));
        assert!(accepts(nested.clone(), "a a a"));
        assert!(!accepts(nested, "b"));
    }

    #[test]
    fn empty_alternatives_never_match() {
        assert!(!accepts(alt([]), ""));
        assert!(accepts(seq([]), ""));
    }

    #[test]
    fn first_declared_alternative_wins() {
        let g = grammar(vec![
            Rule::private("a", seq([token("yes"), tag("A")])),
            Rule::private("b", seq([token("yes"), tag("B")])),
            Rule::public("r", alt([rule_ref("a"), rule_ref("b")])),
        ]);
        let result = parse(&g, "r", "yes").unwrap();
        assert_eq!(result.tags(), ["A"]);
        match result.component() {
            ParseNode::Alternative { index, node } => {
                assert_eq!(*index, 0);
                assert!(matches!(node.as_ref(), ParseNode::Rule(p) if p.rule_name() == "a"));
            }
            other => panic!("expected Alternative, got {other:?}"),
        }
    }

    #[test]
    fn later_alternative_used_when_earlier_fails() {
        let c = alt([seq([token("a"), token("b")]), seq([token("a"), token("c")])]);
        let g = grammar(vec![Rule::public("r", c)]);
        let result = parse(&g, "r", "a c").unwrap();
        assert!(matches!(result.component(), ParseNode::Alternative { index: 1, .. }));
    }

    #[test]
    fn reference_inlining() {
        let g = grammar(vec![
            Rule::private("r2", token("yes")),
            Rule::public("r1", rule_ref("r2")),
        ]);
        let result = parse(&g, "r1", "yes").unwrap();
        assert_eq!(result.rule_name(), "r1");
        assert_eq!(
            result.component(),
            &ParseNode::Rule(RuleParse::new("r2", ParseNode::Token("yes".into())))
        );
        assert!(parse(&g, "r1", "no").is_none());
    }

    #[test]
    fn tag_propagation() {
        let g = grammar(vec![Rule::public("r", seq([token("hello"), tag("GREETING")]))]);
        let result = parse(&g, "r", "hello").unwrap();
        assert_eq!(result.tags(), ["GREETING"]);
        assert_eq!(
            result.component(),
            &ParseNode::Sequence(vec![
                ParseNode::Token("hello".into()),
                ParseNode::Tag("GREETING".into()),
            ])
        );
    }

    #[test]
    fn count_folds_to_matched_repeats() {
        let g = grammar(vec![Rule::public(
            "r",
            seq([token("a"), tag("A")]).repeat(1, MaxRepeat::Finite(3)),
        )]);
        let result = parse(&g, "r", "a a").unwrap();
        let repeat = ParseNode::Sequence(vec![
            ParseNode::Token("a".into()),
            ParseNode::Tag("A".into()),
        ]);
        assert_eq!(
            result.component(),
            &ParseNode::Sequence(vec![repeat.clone(), repeat])
        );
        assert_eq!(result.tags(), ["A", "A"]);
    }

    #[test]
    fn looped_sequences_fold_in_order() {
        let g = grammar(vec![Rule::public(
            "r",
            seq([alt([token("one"), token("two")]), tag("D")]).one_or_more(),
        )]);
        let result = parse(&g, "r", "two one two").unwrap();
        assert_eq!(result.tokens(), ["two", "one", "two"]);
        assert_eq!(result.tags(), ["D", "D", "D"]);
    }

    #[test]
    fn tokens_report_grammar_text_for_wildcards() {
        let g = grammar(vec![Rule::public("r", token("Red"))]);
        let result = parse(&g, "r", "%").unwrap();
        assert_eq!(result.tokens(), ["Red"]);
    }

    #[test]
    fn step_budget_exhaustion_is_no_match() {
        let g = RuleGrammar::with_config("g", None, MatchConfig::new().max_steps(5));
        g.add_rule(Rule::public("r", token("x").zero_or_more())).unwrap();
        g.commit_changes().unwrap();
        let input = vec!["x"; 50];
        assert!(g.parse(&input, None).unwrap().is_none());

        let unbounded = grammar(vec![Rule::public("r", token("x").zero_or_more())]);
        assert!(unbounded.parse(&input, None).unwrap().is_some());
    }

    #[test]
    fn depth_budget_exhaustion_is_no_match() {
        let shallow = MatchConfig::new().max_depth(50);
        let g = RuleGrammar::with_config("g", None, shallow);
        g.add_rule(Rule::public("r", token("x").zero_or_more())).unwrap();
        g.commit_changes().unwrap();
        assert!(g.parse(&vec!["x"; 10], None).unwrap().is_some());
        assert!(g.parse(&vec!["x"; 100], None).unwrap().is_none());

        let default = grammar(vec![Rule::public("r", token("x").zero_or_more())]);
        assert!(default.parse(&vec!["x"; 100], None).unwrap().is_some());
    }

    #[test]
    fn long_input_stops_at_default_depth() {
        let g = grammar(vec![Rule::public("r", token("please").zero_or_more())]);
        let input = vec!["please"; 10_000];
        assert!(g.parse(&input, None).unwrap().is_none());
    }

    #[test]
    fn deterministic_results() {
        let g = grammar(vec![Rule::public(
            "r",
            seq([
                alt([token("a"), seq([token("a"), tag("long")])]).zero_or_more(),
                tag("end"),
            ]),
        )]);
        let first = parse(&g, "r", "a a a");
        for _ in 0..5 {
            assert_eq!(parse(&g, "r", "a a a"), first);
        }
    }
}
