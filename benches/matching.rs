use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rulegram::{alt, rule_ref, seq, tag, token, MatchConfig, Rule, RuleGrammar};

/// Build a grammar with `n` private word rules and one public rule that is a
/// sequence of references to all of them.
fn build_grammar(n: usize) -> (RuleGrammar, Vec<String>) {
    let grammar = RuleGrammar::new("bench");
    let mut words = Vec::with_capacity(n);

    for i in 0..n {
        let word = format!("w{i}");
        grammar
            .add_rule(Rule::private(
                format!("r{i}"),
                alt([token(word.clone()), token(format!("x{i}"))]),
            ))
            .unwrap();
        words.push(word);
    }
    let chain = seq((0..n).map(|i| rule_ref(format!("r{i}"))));
    grammar
        .add_rule(Rule::public("final", chain.tagged("DONE")))
        .unwrap();
    grammar.commit_changes().unwrap();
    (grammar, words)
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_parse");

    for &n in &[5, 20, 50] {
        let (grammar, words) = build_grammar(n);
        group.bench_function(&format!("{n}_rules_parse"), |b| {
            b.iter(|| grammar.parse(black_box(&words), None).unwrap());
        });

        let graph = grammar.compile("final").unwrap();
        let config = MatchConfig::default();
        group.bench_function(&format!("{n}_rules_precompiled"), |b| {
            b.iter(|| graph.match_tokens(black_box(&words), &config));
        });
    }

    group.finish();
}

fn bench_repetition(c: &mut Criterion) {
    let mut group = c.benchmark_group("repetition");

    let grammar = RuleGrammar::new("repeat");
    grammar
        .add_rule(Rule::public(
            "r",
            seq([
                alt([token("one"), token("two")]).one_or_more(),
                token("done"),
                tag("END"),
            ]),
        ))
        .unwrap();
    grammar.commit_changes().unwrap();
    let graph = grammar.compile("r").unwrap();
    let config = MatchConfig::default();

    for &n in &[10, 100, 250] {
        let mut accept: Vec<&str> = ["one", "two"].iter().copied().cycle().take(n).collect();
        accept.push("done");
        group.bench_function(&format!("{n}_repeats_accept"), |b| {
            b.iter(|| graph.match_tokens(black_box(&accept), &config));
        });

        let reject: Vec<&str> = ["one", "two"].iter().copied().cycle().take(n).collect();
        group.bench_function(&format!("{n}_repeats_reject"), |b| {
            b.iter(|| graph.match_tokens(black_box(&reject), &config));
        });
    }

    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");

    for &n in &[5, 20, 50] {
        let (grammar, _) = build_grammar(n);
        group.bench_function(&format!("{n}_rules"), |b| {
            b.iter(|| black_box(grammar.compile("final").unwrap()));
        });
    }

    group.finish();
}

fn bench_load_jsgf(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_jsgf");

    for &n in &[5, 20, 50] {
        let (grammar, _) = build_grammar(n);
        let source = grammar.to_jsgf();
        group.bench_function(&format!("{n}_rules"), |b| {
            b.iter(|| rulegram::parse::parse(black_box(&source)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_repetition,
    bench_compilation,
    bench_load_jsgf
);
criterion_main!(benches);
