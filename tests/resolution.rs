//! End-to-end resolution tests over the in-memory graph.
//!
//! Each test builds a small schema and data set, creates a reasoning
//! context and checks the answer sets produced by the public query API.

use std::collections::BTreeSet;

use kb_reasoner::answer::ConceptMap;
use kb_reasoner::concept::ConceptId;
use kb_reasoner::config::ResolutionConfig;
use kb_reasoner::context::ReasoningContext;
use kb_reasoner::error::{QueryError, ReasonerError};
use kb_reasoner::explanation::ExplanationTree;
use kb_reasoner::pattern::{Pattern, Variable};
use kb_reasoner::query::ResolvableQuery;
use kb_reasoner::rule::Rule;
use kb_reasoner::schema::Schema;
use kb_reasoner::storage::MemoryGraph;

fn collect(query: &ResolvableQuery<'_>) -> Vec<ConceptMap> {
    query.resolve().collect::<Result<Vec<_>, _>>().unwrap()
}

fn values(answers: &[ConceptMap], var: &str) -> BTreeSet<ConceptId> {
    answers
        .iter()
        .filter_map(|a| a.get(&Variable::new(var)))
        .collect()
}

fn pairs(answers: &[ConceptMap], a: &str, b: &str) -> BTreeSet<(ConceptId, ConceptId)> {
    answers
        .iter()
        .filter_map(|m| Some((m.get(&Variable::new(a))?, m.get(&Variable::new(b))?)))
        .collect()
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn containment() -> (MemoryGraph, [ConceptId; 3]) {
    let mut s = Schema::new();
    s.define_entity("box", None)
        .define_relation("contains", None, &["container", "contained"])
        .define_plays("box", &["container", "contained"]);
    let mut g = MemoryGraph::new(s);
    let a = g.insert_entity("box").unwrap();
    let b = g.insert_entity("box").unwrap();
    let c = g.insert_entity("box").unwrap();
    g.insert_relation("contains", &[("container", a), ("contained", b)])
        .unwrap();
    g.insert_relation("contains", &[("container", b), ("contained", c)])
        .unwrap();
    (g, [a, b, c])
}

fn transitivity() -> Rule {
    Rule::new(
        "containment-is-transitive",
        Pattern::and([
            Pattern::rel("contains", &[("container", "x"), ("contained", "y")]),
            Pattern::rel("contains", &[("container", "y"), ("contained", "z")]),
        ]),
        Pattern::rel("contains", &[("container", "x"), ("contained", "z")]),
    )
    .unwrap()
}

fn contains_xz() -> Pattern {
    Pattern::rel("contains", &[("container", "x"), ("contained", "z")])
}

/// Unary facts `p(_)` and `q(_)` over things.
fn unary(p: &[&str], q: &[&str]) -> (MemoryGraph, Vec<(String, ConceptId)>) {
    let mut s = Schema::new();
    s.define_entity("thing", None)
        .define_relation("p", None, &["p-subject"])
        .define_relation("q", None, &["q-subject"])
        .define_plays("thing", &["p-subject", "q-subject"]);
    let mut g = MemoryGraph::new(s);
    let mut names: Vec<&str> = p.iter().chain(q).copied().collect();
    names.sort();
    names.dedup();
    let ids: Vec<(String, ConceptId)> = names
        .iter()
        .map(|n| (n.to_string(), g.insert_entity("thing").unwrap()))
        .collect();
    let id = |name: &str| ids.iter().find(|(n, _)| n == name).unwrap().1;
    for name in p {
        g.insert_relation("p", &[("p-subject", id(name))]).unwrap();
    }
    for name in q {
        g.insert_relation("q", &[("q-subject", id(name))]).unwrap();
    }
    (g, ids)
}

fn named(ids: &[(String, ConceptId)], name: &str) -> ConceptId {
    ids.iter().find(|(n, _)| n == name).unwrap().1
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

#[test]
fn alpha_equivalent_queries_hit_the_same_entry() {
    let (g, [a, b, c]) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, Vec::new()).unwrap();
    let factory = ctx.factory();

    let first = collect(&factory.resolvable(&Pattern::isa("x", "box")).unwrap());
    let after_first = ctx.cache_stats();
    assert_eq!(after_first.hits, 0);
    assert_eq!(after_first.stores, 1);

    let second = collect(&factory.resolvable(&Pattern::isa("y", "box")).unwrap());
    let after_second = ctx.cache_stats();
    assert_eq!(after_second.hits, 1);
    assert_eq!(after_second.stores, 1);
    assert_eq!(ctx.cached_queries(), 1);

    assert_eq!(values(&first, "x"), BTreeSet::from([a, b, c]));
    assert_eq!(values(&second, "y"), values(&first, "x"));
    assert!(second.iter().all(|m| !m.contains(&Variable::new("x"))));
}

#[test]
fn narrower_substitution_reuses_complete_general_entry() {
    let (g, [a, b, c]) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![transitivity()]).unwrap();
    let query = ctx.factory().resolvable(&contains_xz()).unwrap();
    assert_eq!(collect(&query).len(), 3);
    let stores = ctx.cache_stats().stores;
    let hits = ctx.cache_stats().hits;

    let from_a = ConceptMap::from_pairs([(Variable::new("x"), a)]);
    let answers = query
        .resolve_with(&from_a, false)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(pairs(&answers, "x", "z"), BTreeSet::from([(a, b), (a, c)]));
    assert_eq!(ctx.cache_stats().stores, stores);
    assert_eq!(ctx.cache_stats().hits, hits + 1);
}

#[test]
fn infer_types_flag_is_part_of_the_cache_key() {
    let (g, _) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, Vec::new()).unwrap();
    collect(&ctx.factory().resolvable(&Pattern::isa("x", "box")).unwrap());
    collect(
        &ctx.factory()
            .without_type_inference(&Pattern::isa("x", "box"))
            .unwrap(),
    );
    assert_eq!(ctx.cached_queries(), 2);
    assert_eq!(ctx.cache_stats().hits, 0);
}

// ---------------------------------------------------------------------------
// Rules and recursion
// ---------------------------------------------------------------------------

#[test]
fn transitive_closure() {
    let (g, [a, b, c]) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![transitivity()]).unwrap();
    let query = ctx.factory().resolvable(&contains_xz()).unwrap();
    let answers = collect(&query);
    assert_eq!(answers.len(), 3);
    assert_eq!(
        pairs(&answers, "x", "z"),
        BTreeSet::from([(a, b), (b, c), (a, c)])
    );
    // Anonymous relation variables never reach the caller.
    assert!(answers.iter().all(|m| m.len() == 2));
}

#[test]
fn mutual_recursion_terminates() {
    let mut s = Schema::new();
    s.define_entity("node", None)
        .define_relation("red", None, &["red-from", "red-to"])
        .define_relation("blue", None, &["blue-from", "blue-to"])
        .define_plays("node", &["red-from", "red-to", "blue-from", "blue-to"]);
    let mut g = MemoryGraph::new(s);
    let n: Vec<ConceptId> = (0..4).map(|_| g.insert_entity("node").unwrap()).collect();
    g.insert_relation("red", &[("red-from", n[0]), ("red-to", n[1])])
        .unwrap();
    g.insert_relation("blue", &[("blue-from", n[2]), ("blue-to", n[3])])
        .unwrap();

    let red = Pattern::rel("red", &[("red-from", "x"), ("red-to", "y")]);
    let blue = Pattern::rel("blue", &[("blue-from", "x"), ("blue-to", "y")]);
    let rules = vec![
        Rule::new("red-is-blue", red.clone(), blue.clone()).unwrap(),
        Rule::new("blue-is-red", blue.clone(), red.clone()).unwrap(),
    ];
    let ctx = ReasoningContext::new(&g, &g, &g, rules).unwrap();

    let expected = BTreeSet::from([(n[0], n[1]), (n[2], n[3])]);
    let reds = collect(&ctx.factory().resolvable(&red).unwrap());
    assert_eq!(pairs(&reds, "x", "y"), expected);
    let blues = collect(&ctx.factory().resolvable(&blue).unwrap());
    assert_eq!(pairs(&blues, "x", "y"), expected);
}

#[test]
fn rules_about_supertypes_apply_to_subtypes() {
    let mut s = Schema::new();
    s.define_entity("animal", None)
        .define_entity("dog", Some("animal"))
        .define_relation("fed", None, &["eater"])
        .define_relation("hungry", None, &["hungry-one"])
        .define_plays("animal", &["eater", "hungry-one"]);
    let mut g = MemoryGraph::new(s);
    let rex = g.insert_entity("dog").unwrap();
    let generic = g.insert_entity("animal").unwrap();
    g.insert_relation("fed", &[("eater", generic)]).unwrap();
    let rule = Rule::new(
        "unfed-animals-are-hungry",
        Pattern::and([
            Pattern::isa("a", "animal"),
            Pattern::not(Pattern::rel("fed", &[("eater", "a")])),
        ]),
        Pattern::rel("hungry", &[("hungry-one", "a")]),
    )
    .unwrap();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![rule]).unwrap();
    let query = ctx
        .factory()
        .resolvable(&Pattern::and([
            Pattern::isa("d", "dog"),
            Pattern::rel("hungry", &[("hungry-one", "d")]),
        ]))
        .unwrap();
    assert_eq!(values(&collect(&query), "d"), BTreeSet::from([rex]));
}

#[test]
fn depth_limit_aborts_without_caching_partial_entries() {
    let (g, _) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![transitivity()]).unwrap();
    let config = ResolutionConfig {
        max_depth: 1,
        ..ResolutionConfig::default()
    };
    let query = ctx.factory_with(config).resolvable(&contains_xz()).unwrap();
    let mut stream = query.resolve();
    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        ReasonerError::Query(QueryError::DepthExceeded { max_depth: 1 })
    ));
    assert!(stream.next().is_none());
    assert_eq!(ctx.cached_queries(), 0);

    // The context stays usable with a sane limit.
    let query = ctx.factory().resolvable(&contains_xz()).unwrap();
    assert_eq!(collect(&query).len(), 3);
}

// ---------------------------------------------------------------------------
// Negation and disjunction
// ---------------------------------------------------------------------------

#[test]
fn negation_as_failure() {
    let (g, ids) = unary(&["a", "b"], &["a"]);
    let ctx = ReasoningContext::new(&g, &g, &g, Vec::new()).unwrap();
    let query = ctx
        .factory()
        .resolvable(&Pattern::and([
            Pattern::rel("p", &[("p-subject", "x")]),
            Pattern::not(Pattern::rel("q", &[("q-subject", "x")])),
        ]))
        .unwrap();
    assert!(matches!(query, ResolvableQuery::Composite(_)));
    let answers = collect(&query);
    assert_eq!(answers.len(), 1);
    assert_eq!(values(&answers, "x"), BTreeSet::from([named(&ids, "b")]));
}

#[test]
fn negation_over_unbound_shared_variable_is_an_error() {
    let (g, _) = unary(&["a"], &["a"]);
    let ctx = ReasoningContext::new(&g, &g, &g, Vec::new()).unwrap();
    let query = ctx
        .factory()
        .resolvable(&Pattern::and([
            Pattern::rel("p", &[("p-subject", "x")]),
            Pattern::not(Pattern::rel("q", &[("q-subject", "y")])),
            Pattern::not(Pattern::rel("p", &[("p-subject", "y")])),
        ]))
        .unwrap();
    let mut stream = query.resolve();
    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        ReasonerError::Query(QueryError::UngroundedNegation { .. })
    ));
    assert!(stream.next().is_none());
}

#[test]
fn disjunction_deduplicates() {
    let (g, ids) = unary(&["a"], &["a", "b"]);
    let ctx = ReasoningContext::new(&g, &g, &g, Vec::new()).unwrap();
    let query = ctx
        .factory()
        .resolvable(&Pattern::or([
            Pattern::rel("p", &[("p-subject", "x")]),
            Pattern::rel("q", &[("q-subject", "x")]),
        ]))
        .unwrap();
    assert!(matches!(query, ResolvableQuery::Disjunctive(_)));
    let answers = collect(&query);
    assert_eq!(answers.len(), 2);
    assert_eq!(
        values(&answers, "x"),
        BTreeSet::from([named(&ids, "a"), named(&ids, "b")])
    );
}

// ---------------------------------------------------------------------------
// Explanations
// ---------------------------------------------------------------------------

#[test]
fn explanations_are_idempotent_and_count_facts() {
    let (g, [a, _, c]) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![transitivity()]).unwrap();
    let config = ResolutionConfig::default().with_explain(true);
    let query = ctx.factory_with(config).resolvable(&contains_xz()).unwrap();
    let answers = collect(&query);
    let derived = answers
        .iter()
        .find(|m| m.get(&Variable::new("x")) == Some(a) && m.get(&Variable::new("z")) == Some(c))
        .unwrap();

    let first = ExplanationTree::build(derived);
    let second = ExplanationTree::build(derived);
    assert_eq!(first, second);
    assert_eq!(first.leaf_count(), 2);
    assert_eq!(first.rules().len(), 1);
    assert_eq!(first.rules()[0].as_str(), "containment-is-transitive");

    // Resolving again serves the explained entry from the cache.
    let again = collect(&query);
    let derived_again = again.iter().find(|m| *m == derived).unwrap();
    assert_eq!(ExplanationTree::build(derived_again), first);

    // Asserted answers are lookups.
    let asserted = answers.iter().find(|m| *m != derived).unwrap();
    assert!(asserted.explanation().unwrap().is_lookup());
}

#[test]
fn explanations_upgrade_unexplained_entries() {
    let (g, _) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![transitivity()]).unwrap();
    let plain = ctx.factory().resolvable(&contains_xz()).unwrap();
    assert!(collect(&plain).iter().all(|m| m.explanation().is_none()));

    let explained = plain
        .resolve_with(&ConceptMap::new(), true)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(explained.len(), 3);
    assert!(explained.iter().all(|m| m.explanation().is_some()));
}

// ---------------------------------------------------------------------------
// Type inference and streaming
// ---------------------------------------------------------------------------

#[test]
fn disabling_type_inference_returns_a_superset() {
    let (g, _) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![transitivity()]).unwrap();
    let pattern: Pattern = Pattern::relation()
        .role("container", "x")
        .player("z")
        .into();

    let inferred = collect(&ctx.factory().resolvable(&pattern).unwrap());
    let plain = collect(&ctx.factory().without_type_inference(&pattern).unwrap());
    let inferred = pairs(&inferred, "x", "z");
    let plain = pairs(&plain, "x", "z");
    assert!(plain.is_superset(&inferred));
    assert_eq!(inferred.len(), 3);
}

#[test]
fn streams_are_lazy_and_restartable() {
    let (g, _) = containment();
    let ctx = ReasoningContext::new(&g, &g, &g, vec![transitivity()]).unwrap();
    let query = ctx.factory().resolvable(&contains_xz()).unwrap();

    let mut stream = query.resolve();
    let first = stream.next().unwrap().unwrap();
    stream.restart();
    let all = stream.collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.contains(&first));
    assert_eq!(query.resolve().take(2).count(), 2);
}
