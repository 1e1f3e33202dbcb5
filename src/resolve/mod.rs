//! Resolution engine.
//!
//! Atomic goals are resolved by tabling: each goal's answers accumulate in
//! its query-cache entry, first from storage, then from every applicable
//! rule. A goal met again while it is still on the resolution stack does
//! not recurse; it reads the answers recorded so far and marks the stack
//! frames above it as one recursive component. The component's lowest
//! frame (its leader) re-expands until a round adds no answer anywhere,
//! then marks every member complete.
//!
//! Conjunctions, negations and disjunctions are streamed lazily on top of
//! atomic goals (`stream`).

mod stream;

pub use stream::AnswerStream;

use std::sync::Arc;

use crate::answer::ConceptMap;
use crate::atom::{Atomic, unify_with_head};
use crate::cache::CacheSlot;
use crate::config::ResolutionConfig;
use crate::context::ReasoningContext;
use crate::error::{QueryError, ReasonerResult};
use crate::explanation::Explanation;
use crate::query::{AtomicQuery, QueryFactory};
use crate::rule::Rule;
use crate::storage::TraversalPlan;

use stream::Cursor;

/// An atomic goal being resolved.
#[derive(Debug)]
struct Frame {
    slot: CacheSlot,
    /// Lowest stack index this goal depends on.
    link: usize,
    /// Some goal above reads this one's partial answers.
    cyclic: bool,
    /// Entries of finished goals whose completion waits for this frame.
    members: Vec<CacheSlot>,
}

/// State of one pull from an answer stream.
pub(crate) struct Resolution<'a> {
    ctx: &'a ReasoningContext<'a>,
    factory: QueryFactory<'a>,
    config: ResolutionConfig,
    stack: Vec<Frame>,
}

impl<'a> Resolution<'a> {
    pub(crate) fn new(factory: QueryFactory<'a>, explain: bool) -> Self {
        let config = factory.config().with_explain(explain);
        Self {
            ctx: factory.context(),
            factory: factory.with_explain(explain),
            config,
            stack: Vec::new(),
        }
    }

    fn explain(&self) -> bool {
        self.config.explain
    }

    /// Drop partial state after a failure.
    pub(crate) fn abort(&mut self) {
        self.stack.clear();
        self.ctx.query_cache().discard_incomplete();
    }

    /// All answers of an atomic goal.
    ///
    /// Inside a recursive component the answers may be partial; the
    /// component leader iterates until they are not.
    pub(crate) fn resolve_atomic(&mut self, query: &AtomicQuery<'a>) -> ReasonerResult<Vec<ConceptMap>> {
        let key = query.cache_key();
        let explain = self.explain();

        {
            let mut cache = self.ctx.query_cache();
            if let Some(answers) = cache.peek(&key, explain) {
                cache.note_lookup(&key, true);
                return Ok(answers);
            }
            if let Some(general) = key.generalized()
                && let Some(answers) = cache.peek(&general, explain)
            {
                cache.note_lookup(&key, true);
                let bindings = key.id_bindings();
                return Ok(answers
                    .into_iter()
                    .filter(|a| a.is_consistent_with(&bindings))
                    .filter(|a| query.predicates().all(|p| p.holds(a, self.ctx.concepts()) != Some(false)))
                    .collect());
            }
            cache.note_lookup(&key, false);
        }

        let slot = self.ctx.query_cache().slot(&key, explain)?;
        if let Some(pos) = self.stack.iter().position(|f| f.slot.same_entry(&slot)) {
            tracing::trace!(goal = %query, depth = pos, "recursive goal, reading tabled answers");
            self.stack[pos].cyclic = true;
            for frame in &mut self.stack[pos + 1..] {
                frame.link = frame.link.min(pos);
            }
            return Ok(self.ctx.query_cache().answers(&slot));
        }
        if self.stack.len() >= self.config.max_depth {
            return Err(QueryError::DepthExceeded {
                max_depth: self.config.max_depth,
            }
            .into());
        }
        {
            let mut cache = self.ctx.query_cache();
            if cache.is_complete(&slot) {
                // Complete but unexplained, and explanations were requested.
                cache.reset(&slot, explain);
            }
        }

        let index = self.stack.len();
        self.stack.push(Frame {
            slot: slot.clone(),
            link: index,
            cyclic: false,
            members: Vec::new(),
        });
        tracing::debug!(goal = %query, depth = index, "resolving atomic goal");
        self.expand(query, &slot, index)?;

        let frame = self.stack.pop().ok_or_else(|| QueryError::Malformed {
            message: "resolution stack underflow".into(),
        })?;
        if frame.link < index {
            // Part of a component led further down; the leader completes us.
            if let Some(parent) = self.stack.last_mut() {
                parent.members.push(frame.slot);
                parent.members.extend(frame.members);
            }
        } else {
            let mut cache = self.ctx.query_cache();
            cache.complete(&frame.slot);
            for member in &frame.members {
                cache.complete(member);
            }
        }
        Ok(self.ctx.query_cache().answers(&slot))
    }

    /// Expand a goal; a component leader repeats until nothing changes.
    fn expand(&mut self, query: &AtomicQuery<'a>, slot: &CacheSlot, index: usize) -> ReasonerResult<()> {
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let before = self.ctx.query_cache().generation();
            if rounds == 1 {
                self.lookup(query, slot);
            }
            self.apply_rules(query, slot)?;

            let frame = &self.stack[index];
            if frame.link < index || !frame.cyclic {
                return Ok(());
            }
            if self.ctx.query_cache().generation() == before {
                tracing::debug!(goal = %query, rounds, "fixpoint reached");
                return Ok(());
            }
            if rounds >= self.config.max_fixpoint_iterations {
                return Err(QueryError::FixpointNotReached { iterations: rounds }.into());
            }
        }
    }

    /// Record the goal's stored answers.
    fn lookup(&self, query: &AtomicQuery<'a>, slot: &CacheSlot) {
        let plan = TraversalPlan::new(query.atomics().to_vec());
        let explanation = self.explain().then(|| Arc::new(Explanation::lookup()));
        let answers: Vec<ConceptMap> = self.ctx.executor().execute(&plan).collect();
        let mut cache = self.ctx.query_cache();
        for answer in answers {
            let answer = match &explanation {
                Some(e) => answer.with_explanation(Arc::clone(e)),
                None => answer,
            };
            cache.record(slot, &answer);
        }
    }

    /// Record the goal's answers derivable through one rule application.
    fn apply_rules(&mut self, query: &AtomicQuery<'a>, slot: &CacheSlot) -> ReasonerResult<()> {
        let rules = self.ctx.applicable_rules(query.atom());
        if rules.is_empty() {
            return Ok(());
        }
        let bindings = query.cache_key().id_bindings();
        for rule in rules {
            for unifier in unify_with_head(query.atom(), rule.head(), self.ctx.concepts()) {
                let Some(body_binding) = unifier.body_substitution(&bindings) else {
                    continue;
                };
                let body_binding = body_binding.project(&rule.when().variables());
                for answer in self.resolve_body(&rule, &body_binding)? {
                    let mut head_binding = answer.clone().without_explanation();
                    if let Atomic::Relation(head) = rule.head() {
                        let Some(id) = self.ctx.inferred_relation_id(head, &answer) else {
                            continue;
                        };
                        head_binding = head_binding.with(head.var.clone(), id);
                    }
                    let Some(goal) = unifier.goal_answer(&head_binding) else {
                        continue;
                    };
                    let concepts = self.ctx.concepts();
                    if !query.predicates().all(|p| p.holds(&goal, concepts) == Some(true)) {
                        continue;
                    }
                    let goal = if self.explain() {
                        goal.with_explanation(Arc::new(Explanation::rule(rule.label().clone(), answer)))
                    } else {
                        goal
                    };
                    if self.ctx.query_cache().record(slot, &goal) {
                        tracing::trace!(rule = %rule.label(), answer = %goal, "rule derived answer");
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_body(&mut self, rule: &Rule, binding: &ConceptMap) -> ReasonerResult<Vec<ConceptMap>> {
        let body = self.factory.resolvable(rule.when())?;
        let mut cursor = Cursor::new(&body.with_substitution(binding));
        let mut answers = Vec::new();
        while let Some(answer) = cursor.next_answer(self)? {
            answers.push(answer);
        }
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::Label;
    use crate::error::ReasonerError;
    use crate::pattern::Pattern;
    use crate::schema::Schema;
    use crate::statistics::NoStatistics;
    use crate::storage::MemoryGraph;

    fn graph() -> MemoryGraph {
        let mut s = Schema::new();
        s.define_entity("node", None)
            .define_relation("edge", None, &["from", "to"])
            .define_relation("path", None, &["start", "end"])
            .define_plays("node", &["from", "to", "start", "end"]);
        MemoryGraph::new(s)
    }

    fn rules() -> Vec<Rule> {
        vec![
            Rule::new(
                "edge-path",
                Pattern::rel("edge", &[("from", "x"), ("to", "y")]),
                Pattern::rel("path", &[("start", "x"), ("end", "y")]),
            )
            .unwrap(),
            Rule::new(
                "path-step",
                Pattern::and([
                    Pattern::rel("path", &[("start", "x"), ("end", "y")]),
                    Pattern::rel("edge", &[("from", "y"), ("to", "z")]),
                ]),
                Pattern::rel("path", &[("start", "x"), ("end", "z")]),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn recursive_goal_reaches_fixpoint_and_completes() {
        let mut g = graph();
        let nodes: Vec<_> = (0..4).map(|_| g.insert_entity("node").unwrap()).collect();
        for pair in nodes.windows(2) {
            g.insert_relation("edge", &[("from", pair[0]), ("to", pair[1])]).unwrap();
        }
        let ctx = ReasoningContext::new(&g, &g, &NoStatistics, rules()).unwrap();
        let query = ctx
            .factory()
            .atomic(&Pattern::rel("path", &[("start", "a"), ("end", "b")]))
            .unwrap();
        let mut resolution = Resolution::new(ctx.factory(), false);
        let answers = resolution.resolve_atomic(&query).unwrap();
        assert_eq!(answers.len(), 6);
        assert!(resolution.stack.is_empty());
        assert!(ctx.query_cache().peek(&query.cache_key(), false).is_some());
    }

    #[test]
    fn depth_limit_is_reported() {
        let mut g = graph();
        let nodes: Vec<_> = (0..6).map(|_| g.insert_entity("node").unwrap()).collect();
        for pair in nodes.windows(2) {
            g.insert_relation("edge", &[("from", pair[0]), ("to", pair[1])]).unwrap();
        }
        let ctx = ReasoningContext::new(&g, &g, &NoStatistics, rules()).unwrap();
        let config = ResolutionConfig {
            max_depth: 1,
            ..ResolutionConfig::default()
        };
        let query = ctx
            .factory_with(config)
            .atomic(&Pattern::rel("path", &[("start", "a"), ("end", "b")]))
            .unwrap();
        let mut resolution = Resolution::new(query.factory(), false);
        let err = resolution.resolve_atomic(&query).unwrap_err();
        assert!(matches!(err, ReasonerError::Query(QueryError::DepthExceeded { max_depth: 1 })));
        resolution.abort();
        assert_eq!(ctx.cached_queries(), 0);
    }

    #[test]
    fn rule_answers_carry_rule_explanations() {
        let mut g = graph();
        let a = g.insert_entity("node").unwrap();
        let b = g.insert_entity("node").unwrap();
        g.insert_relation("edge", &[("from", a), ("to", b)]).unwrap();
        let ctx = ReasoningContext::new(&g, &g, &NoStatistics, rules()).unwrap();
        let query = ctx
            .factory()
            .atomic(&Pattern::rel("path", &[("start", "a"), ("end", "b")]))
            .unwrap();
        let mut resolution = Resolution::new(ctx.factory(), true);
        let answers = resolution.resolve_atomic(&query).unwrap();
        assert_eq!(answers.len(), 1);
        let explanation = answers[0].explanation().unwrap();
        assert_eq!(explanation.rule_label(), Some(&Label::from("edge-path")));
    }
}
