//! Benchmarks for rule resolution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kb_reasoner::context::ReasoningContext;
use kb_reasoner::pattern::{Pattern, Variable};
use kb_reasoner::rule::Rule;
use kb_reasoner::schema::Schema;
use kb_reasoner::storage::MemoryGraph;

const CHAIN: usize = 24;

fn chain() -> MemoryGraph {
    let mut s = Schema::new();
    s.define_entity("node", None)
        .define_relation("edge", None, &["from", "to"])
        .define_relation("path", None, &["start", "end"])
        .define_plays("node", &["from", "to", "start", "end"]);
    let mut g = MemoryGraph::new(s);
    let nodes: Vec<_> = (0..CHAIN).map(|_| g.insert_entity("node").unwrap()).collect();
    for pair in nodes.windows(2) {
        g.insert_relation("edge", &[("from", pair[0]), ("to", pair[1])])
            .unwrap();
    }
    g
}

fn rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "edge-is-path",
            Pattern::rel("edge", &[("from", "x"), ("to", "y")]),
            Pattern::rel("path", &[("start", "x"), ("end", "y")]),
        )
        .unwrap(),
        Rule::new(
            "path-extends",
            Pattern::and([
                Pattern::rel("edge", &[("from", "x"), ("to", "y")]),
                Pattern::rel("path", &[("start", "y"), ("end", "z")]),
            ]),
            Pattern::rel("path", &[("start", "x"), ("end", "z")]),
        )
        .unwrap(),
    ]
}

fn path_query() -> Pattern {
    Pattern::rel("path", &[("start", "a"), ("end", "b")])
}

fn bench_transitive_closure(c: &mut Criterion) {
    let g = chain();
    let rules = rules();
    let query = path_query();

    c.bench_function("transitive_closure_cold", |bench| {
        bench.iter(|| {
            let ctx = ReasoningContext::new(&g, &g, &g, rules.clone()).unwrap();
            let answers = ctx.factory().resolvable(&query).unwrap().resolve().count();
            black_box(answers)
        })
    });
}

fn bench_cached_lookup(c: &mut Criterion) {
    let g = chain();
    let ctx = ReasoningContext::new(&g, &g, &g, rules()).unwrap();
    let query = ctx.factory().resolvable(&path_query()).unwrap();
    query.resolve().for_each(drop);

    // Alpha-equivalent to the warmed query.
    let renamed = Pattern::rel("path", &[("start", "p"), ("end", "q")]);
    c.bench_function("transitive_closure_cached", |bench| {
        bench.iter(|| {
            let query = ctx.factory().resolvable(&renamed).unwrap();
            black_box(query.resolve().filter(|a| a.as_ref().is_ok_and(|m| m.contains(&Variable::new("p")))).count())
        })
    });
}

fn bench_bound_start(c: &mut Criterion) {
    let g = chain();
    let rules = rules();
    let query = Pattern::and([Pattern::id("a", first_node(&g)), path_query()]);

    c.bench_function("transitive_closure_from_first", |bench| {
        bench.iter(|| {
            let ctx = ReasoningContext::new(&g, &g, &g, rules.clone()).unwrap();
            black_box(ctx.factory().resolvable(&query).unwrap().resolve().count())
        })
    });
}

fn first_node(g: &MemoryGraph) -> kb_reasoner::concept::ConceptId {
    let ctx = ReasoningContext::new(g, g, g, Vec::new()).unwrap();
    let query = ctx
        .factory()
        .resolvable(&Pattern::isa("n", "node"))
        .unwrap();
    query
        .resolve()
        .filter_map(|a| a.ok()?.get(&Variable::new("n")))
        .min()
        .unwrap()
}

criterion_group!(
    benches,
    bench_transitive_closure,
    bench_cached_lookup,
    bench_bound_start
);
criterion_main!(benches);
