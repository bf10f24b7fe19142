use proptest::prelude::*;
use rulegram::{alt, seq, tag, token, MaxRepeat, Rule, RuleComponent, RuleGrammar};

// --- Fixed vocabulary ---
// Single words plus one phrase; "zzz" never appears in generated grammars.

pub const WORDS: &[&str] = &["turn", "on", "off", "the", "lights", "please", "red", "blue"];
pub const PHRASE: &str = "good morning";
pub const TAGS: &[&str] = &["ON", "OFF", "COLOR", "POLITE"];
pub const UNKNOWN_WORD: &str = "zzz";

/// Cap on generated repeats of an indefinite count.
const EXTRA_REPEATS: u32 = 2;

fn arb_leaf() -> impl Strategy<Value = RuleComponent> {
    prop_oneof![
        6 => prop::sample::select(WORDS).prop_map(token),
        1 => Just(token(PHRASE)),
        2 => prop::sample::select(TAGS).prop_map(tag),
    ]
}

/// A component tree of bounded depth built from the vocabulary. Never
/// produces empty sequences or empty alternatives.
pub fn arb_component(max_depth: u32) -> impl Strategy<Value = RuleComponent> {
    arb_leaf().prop_recursive(max_depth, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..=3).prop_map(seq),
            prop::collection::vec(inner.clone(), 1..=3).prop_map(alt),
            inner.clone().prop_map(RuleComponent::optional),
            inner.clone().prop_map(RuleComponent::zero_or_more),
            inner.clone().prop_map(RuleComponent::one_or_more),
            (inner, 0u32..=2, 1u32..=2)
                .prop_map(|(c, min, extra)| c.repeat(min, MaxRepeat::Finite(min + extra))),
        ]
    })
}

/// Produce one sentence of the component's language, steering every choice
/// point with the next value from `choices`.
pub fn sentence(component: &RuleComponent, choices: &mut impl Iterator<Item = u32>) -> Vec<String> {
    let mut out = Vec::new();
    emit(component, choices, &mut out);
    out
}

fn pick(choices: &mut impl Iterator<Item = u32>, n: u32) -> u32 {
    choices.next().unwrap_or(0) % n
}

fn emit(component: &RuleComponent, choices: &mut impl Iterator<Item = u32>, out: &mut Vec<String>) {
    match component {
        RuleComponent::Token(text) => out.extend(text.split_whitespace().map(str::to_owned)),
        RuleComponent::Tag(_) => {}
        RuleComponent::Sequence(items) => {
            for item in items {
                emit(item, choices, out);
            }
        }
        RuleComponent::Alternatives { components, .. } => {
            let index = pick(choices, components.len() as u32) as usize;
            emit(&components[index], choices, out);
        }
        RuleComponent::Count {
            component,
            min,
            max,
            ..
        } => {
            let span = match max {
                MaxRepeat::Finite(max) => max - min,
                MaxRepeat::Indefinite => EXTRA_REPEATS,
            };
            let times = min + pick(choices, span + 1);
            for _ in 0..times {
                emit(component, choices, out);
            }
        }
        RuleComponent::Reference(_) => panic!("generated components contain no references"),
    }
}

/// A component together with choice values for sentence generation.
pub fn arb_component_with_choices() -> impl Strategy<Value = (RuleComponent, Vec<u32>)> {
    (arb_component(3), prop::collection::vec(any::<u32>(), 64))
}

/// A committed standalone grammar whose single public rule `r` is `component`.
pub fn single_rule_grammar(component: RuleComponent) -> RuleGrammar {
    let grammar = RuleGrammar::new("prop");
    grammar.add_rule(Rule::public("r", component)).unwrap();
    grammar.commit_changes().unwrap();
    grammar
}
