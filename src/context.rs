//! Reasoning context: everything one transaction's resolution shares.
//!
//! The context borrows the transaction's collaborators (schema, storage,
//! statistics) and owns the query cache, the rule cache and the registry of
//! inferred concepts. Caches sit behind `RefCell`, which makes the context
//! `!Sync`: one transaction, one thread, one writer at a time. Queries
//! borrow the context and cannot outlive it.

use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::sync::Arc;

use crate::answer::ConceptMap;
use crate::atom::{Atomic, IdPredicate, RelationAtom};
use crate::cache::{CacheStats, QueryCache, RuleCache};
use crate::concept::{ConceptId, ConceptIdAllocator, Label};
use crate::config::ResolutionConfig;
use crate::error::{QueryError, ReasonerResult};
use crate::pattern::{RolePlayer, Variable};
use crate::query::QueryFactory;
use crate::rule::{Rule, RuleGraph, check_unique_labels};
use crate::schema::ConceptManager;
use crate::statistics::KeyspaceStatistics;
use crate::storage::{TraversalExecutor, TraversalPlan};

/// First id handed out for inferred concepts, far above stored ids.
const INFERRED_ID_BASE: u64 = 1 << 62;

/// Stable ids for relations concluded by rules.
#[derive(Debug)]
struct InferredConcepts {
    ids: ConceptIdAllocator,
    relations: HashMap<(Label, Vec<(Label, ConceptId)>), ConceptId>,
}

impl InferredConcepts {
    fn new() -> Self {
        Self {
            ids: ConceptIdAllocator::starting_from(INFERRED_ID_BASE),
            relations: HashMap::new(),
        }
    }
}

/// Per-transaction reasoning state.
pub struct ReasoningContext<'tx> {
    concepts: &'tx dyn ConceptManager,
    executor: &'tx dyn TraversalExecutor,
    statistics: &'tx dyn KeyspaceStatistics,
    query_cache: RefCell<QueryCache>,
    rule_cache: RefCell<RuleCache>,
    inferred: RefCell<InferredConcepts>,
}

impl<'tx> ReasoningContext<'tx> {
    /// Create a context over the given collaborators and rule set.
    ///
    /// Rules must only mention known labels and must be stratifiable.
    pub fn new(
        concepts: &'tx dyn ConceptManager,
        executor: &'tx dyn TraversalExecutor,
        statistics: &'tx dyn KeyspaceStatistics,
        rules: Vec<Rule>,
    ) -> ReasonerResult<Self> {
        for rule in &rules {
            if let Some(label) = rule.labels().into_iter().find(|l| !concepts.is_known(l)) {
                return Err(QueryError::UnknownLabel {
                    label: label.to_string(),
                }
                .into());
            }
        }
        check_unique_labels(&rules)?;
        RuleGraph::build(&rules, concepts).check_stratified()?;

        tracing::info!(rules = rules.len(), "reasoning context created");
        Ok(Self {
            concepts,
            executor,
            statistics,
            query_cache: RefCell::new(QueryCache::new()),
            rule_cache: RefCell::new(RuleCache::new(rules)),
            inferred: RefCell::new(InferredConcepts::new()),
        })
    }

    /// A factory with the default configuration.
    pub fn factory(&self) -> QueryFactory<'_> {
        QueryFactory::new(self)
    }

    /// A factory with an explicit configuration.
    pub fn factory_with(&self, config: ResolutionConfig) -> QueryFactory<'_> {
        QueryFactory::with_config(self, config)
    }

    pub fn concepts(&self) -> &'tx dyn ConceptManager {
        self.concepts
    }

    pub fn executor(&self) -> &'tx dyn TraversalExecutor {
        self.executor
    }

    pub fn statistics(&self) -> &'tx dyn KeyspaceStatistics {
        self.statistics
    }

    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.rule_cache.borrow().rules().to_vec()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.query_cache.borrow().stats()
    }

    /// Number of cached atomic queries.
    pub fn cached_queries(&self) -> usize {
        self.query_cache.borrow().len()
    }

    /// Drop cached answers and memoized rule applicability.
    pub fn clear_caches(&self) {
        self.query_cache.borrow_mut().clear();
        self.rule_cache.borrow_mut().clear();
    }

    pub(crate) fn query_cache(&self) -> RefMut<'_, QueryCache> {
        self.query_cache.borrow_mut()
    }

    pub(crate) fn applicable_rules(&self, atom: &Atomic) -> Vec<Arc<Rule>> {
        self.rule_cache.borrow_mut().applicable(atom, self.concepts)
    }

    /// Id of the relation a rule head concludes under `binding`.
    ///
    /// The same (type, role players) always yields the same id. A relation
    /// already asserted in storage keeps its stored id.
    pub(crate) fn inferred_relation_id(
        &self,
        head: &RelationAtom,
        binding: &ConceptMap,
    ) -> Option<ConceptId> {
        let type_label = head.type_label.clone()?;
        let mut players = Vec::with_capacity(head.role_players.len());
        for rp in &head.role_players {
            players.push((rp.role.clone()?, binding.get(&rp.player)?));
        }
        players.sort();
        let key = (type_label, players);

        if let Some(id) = self.inferred.borrow().relations.get(&key) {
            return Some(*id);
        }
        let id = self
            .asserted_relation(&key.0, &key.1)
            .unwrap_or_else(|| self.inferred.borrow().ids.next_id());
        tracing::trace!(relation = %key.0, %id, "inferred relation registered");
        self.inferred.borrow_mut().relations.insert(key, id);
        Some(id)
    }

    fn asserted_relation(&self, type_label: &Label, players: &[(Label, ConceptId)]) -> Option<ConceptId> {
        let relation = Variable::anonymous(0);
        let mut atomics = vec![Atomic::Relation(RelationAtom {
            var: relation.clone(),
            type_label: Some(type_label.clone()),
            role_players: players
                .iter()
                .enumerate()
                .map(|(i, (role, _))| RolePlayer::new(Some(role.clone()), Variable::anonymous(i + 1)))
                .collect(),
        })];
        atomics.extend(players.iter().enumerate().map(|(i, (_, id))| {
            Atomic::Id(IdPredicate {
                var: Variable::anonymous(i + 1),
                id: *id,
            })
        }));
        self.executor
            .execute(&TraversalPlan::new(atomics))
            .find_map(|answer| answer.get(&relation))
    }
}

impl std::fmt::Debug for ReasoningContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningContext")
            .field("query_cache", &self.query_cache.borrow().stats())
            .field("rules", &self.rule_cache.borrow().rules().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ValueType;
    use crate::error::{ReasonerError, RuleError};
    use crate::pattern::Pattern;
    use crate::schema::Schema;
    use crate::storage::MemoryGraph;

    fn graph() -> MemoryGraph {
        let mut s = Schema::new();
        s.define_entity("person", None)
            .define_relation("friendship", None, &["friend"])
            .define_attribute("name", None, ValueType::String)
            .define_plays("person", &["friend"]);
        MemoryGraph::new(s)
    }

    #[test]
    fn unknown_rule_labels_are_rejected() {
        let g = graph();
        let rule = Rule::new(
            "r",
            Pattern::isa("x", "robot"),
            Pattern::rel("friendship", &[("friend", "x")]),
        )
        .unwrap();
        let err = ReasoningContext::new(&g, &g, &g, vec![rule]).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::Query(QueryError::UnknownLabel { .. })
        ));
    }

    #[test]
    fn unstratifiable_rules_are_rejected() {
        let g = graph();
        let rule = Rule::new(
            "r",
            Pattern::and([
                Pattern::isa("x", "person"),
                Pattern::not(Pattern::rel("friendship", &[("friend", "x")])),
            ]),
            Pattern::rel("friendship", &[("friend", "x")]),
        )
        .unwrap();
        let err = ReasoningContext::new(&g, &g, &g, vec![rule]).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::Rule(RuleError::NotStratifiable { .. })
        ));
    }

    #[test]
    fn duplicate_rule_labels_are_rejected() {
        let mut s = Schema::new();
        s.define_entity("thing", None)
            .define_relation("p", None, &["p-of"])
            .define_relation("q", None, &["q-of"])
            .define_relation("s", None, &["s-of"])
            .define_plays("thing", &["p-of", "q-of", "s-of"]);
        let g = MemoryGraph::new(s);
        let rules = |first: &str, second: &str| {
            vec![
                Rule::new(
                    first,
                    Pattern::and([
                        Pattern::isa("x", "thing"),
                        Pattern::not(Pattern::rel("q", &[("q-of", "x")])),
                    ]),
                    Pattern::rel("p", &[("p-of", "x")]),
                )
                .unwrap(),
                Rule::new(
                    second,
                    Pattern::rel("s", &[("s-of", "x")]),
                    Pattern::rel("q", &[("q-of", "x")]),
                )
                .unwrap(),
            ]
        };

        assert!(ReasoningContext::new(&g, &g, &g, rules("r1", "r2")).is_ok());
        let err = ReasoningContext::new(&g, &g, &g, rules("r", "r")).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::Rule(RuleError::DuplicateLabel { ref rule }) if rule == "r"
        ));
    }

    #[test]
    fn inferred_relation_ids_are_stable() {
        let mut g = graph();
        let alice = g.insert_entity("person").unwrap();
        let bob = g.insert_entity("person").unwrap();
        let asserted = g.insert_relation("friendship", &[("friend", alice)]).unwrap();
        let ctx = ReasoningContext::new(&g, &g, &g, Vec::new()).unwrap();

        let head = RelationAtom {
            var: Variable::new("r"),
            type_label: Some("friendship".into()),
            role_players: vec![RolePlayer::new(Some("friend".into()), Variable::new("x"))],
        };
        let for_bob = ConceptMap::from_pairs([(Variable::new("x"), bob)]);
        let first = ctx.inferred_relation_id(&head, &for_bob).unwrap();
        assert_eq!(ctx.inferred_relation_id(&head, &for_bob), Some(first));
        assert!(first.get() >= INFERRED_ID_BASE);

        let for_alice = ConceptMap::from_pairs([(Variable::new("x"), alice)]);
        assert_eq!(ctx.inferred_relation_id(&head, &for_alice), Some(asserted));
    }
}
