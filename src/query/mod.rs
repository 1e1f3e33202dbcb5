//! Resolvable queries and the factory that builds them.
//!
//! A pattern becomes one of four query shapes:
//!
//! - **Atomic**: exactly one selectable atom plus its predicates; the unit
//!   of caching and rule application
//! - **Conjunctive**: several atoms joined in a planned order
//! - **Composite**: a conjunctive query with negated sub-queries
//! - **Disjunctive**: a union of branches over a shared variable scope
//!
//! Queries borrow their [`ReasoningContext`](crate::context::ReasoningContext)
//! through the factory that built them, and snapshot its configuration.

pub mod atomic;
pub mod composite;
pub mod conjunctive;
pub mod disjunctive;
pub mod factory;
pub mod infer;
pub mod plan;

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::config::ResolutionConfig;
use crate::pattern::Variable;
use crate::resolve::AnswerStream;

pub use atomic::AtomicQuery;
pub use composite::CompositeQuery;
pub use conjunctive::ConjunctiveQuery;
pub use disjunctive::DisjunctiveQuery;
pub use factory::QueryFactory;
pub use plan::PlanStep;

/// Any query the resolution engine can answer.
#[derive(Debug, Clone)]
pub enum ResolvableQuery<'a> {
    Atomic(AtomicQuery<'a>),
    Conjunctive(ConjunctiveQuery<'a>),
    Composite(CompositeQuery<'a>),
    Disjunctive(DisjunctiveQuery<'a>),
}

impl<'a> ResolvableQuery<'a> {
    /// Stream the answers, with explanations if the query's configuration
    /// asks for them.
    pub fn resolve(&self) -> AnswerStream<'a> {
        let explain = self.config().explain;
        AnswerStream::new(self.clone(), ConceptMap::new(), explain)
    }

    /// Stream the answers consistent with `substitution`.
    pub fn resolve_with(&self, substitution: &ConceptMap, explain: bool) -> AnswerStream<'a> {
        AnswerStream::new(self.clone(), substitution.clone(), explain)
    }

    /// The same query with the substitution's bindings fixed. Bindings of
    /// variables the query does not mention are ignored.
    pub fn with_substitution(&self, substitution: &ConceptMap) -> Self {
        match self {
            ResolvableQuery::Atomic(q) => ResolvableQuery::Atomic(q.with_substitution(substitution)),
            ResolvableQuery::Conjunctive(q) => {
                ResolvableQuery::Conjunctive(q.with_substitution(substitution))
            }
            ResolvableQuery::Composite(q) => {
                ResolvableQuery::Composite(q.with_substitution(substitution))
            }
            ResolvableQuery::Disjunctive(q) => {
                ResolvableQuery::Disjunctive(q.with_substitution(substitution))
            }
        }
    }

    /// Every variable the query mentions.
    pub fn variables(&self) -> BTreeSet<Variable> {
        match self {
            ResolvableQuery::Atomic(q) => q.variables(),
            ResolvableQuery::Conjunctive(q) => q.variables(),
            ResolvableQuery::Composite(q) => q.variables(),
            ResolvableQuery::Disjunctive(q) => q.variables(),
        }
    }

    /// Variables reported in answers.
    pub fn answer_variables(&self) -> BTreeSet<Variable> {
        match self {
            ResolvableQuery::Atomic(q) => q.answer_variables(),
            ResolvableQuery::Conjunctive(q) => q.answer_variables(),
            ResolvableQuery::Composite(q) => q.answer_variables(),
            ResolvableQuery::Disjunctive(q) => q.outer_variables().clone(),
        }
    }

    pub fn factory(&self) -> QueryFactory<'a> {
        match self {
            ResolvableQuery::Atomic(q) => q.factory(),
            ResolvableQuery::Conjunctive(q) => q.factory(),
            ResolvableQuery::Composite(q) => q.factory(),
            ResolvableQuery::Disjunctive(q) => q.factory(),
        }
    }

    pub fn config(&self) -> ResolutionConfig {
        self.factory().config()
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, ResolvableQuery::Atomic(_))
    }
}

impl<'a> From<AtomicQuery<'a>> for ResolvableQuery<'a> {
    fn from(q: AtomicQuery<'a>) -> Self {
        ResolvableQuery::Atomic(q)
    }
}

impl<'a> From<ConjunctiveQuery<'a>> for ResolvableQuery<'a> {
    fn from(q: ConjunctiveQuery<'a>) -> Self {
        ResolvableQuery::Conjunctive(q)
    }
}

impl<'a> From<CompositeQuery<'a>> for ResolvableQuery<'a> {
    fn from(q: CompositeQuery<'a>) -> Self {
        ResolvableQuery::Composite(q)
    }
}

impl<'a> From<DisjunctiveQuery<'a>> for ResolvableQuery<'a> {
    fn from(q: DisjunctiveQuery<'a>) -> Self {
        ResolvableQuery::Disjunctive(q)
    }
}

impl std::fmt::Display for ResolvableQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvableQuery::Atomic(q) => write!(f, "{q}"),
            ResolvableQuery::Conjunctive(q) => write!(f, "{q}"),
            ResolvableQuery::Composite(q) => write!(f, "{q}"),
            ResolvableQuery::Disjunctive(q) => write!(f, "{q}"),
        }
    }
}

/// Id predicates fixing the substitution's bindings of `vars`, skipping
/// any already present in `atomics`.
pub(crate) fn substitution_predicates(
    atomics: &[crate::atom::Atomic],
    vars: &BTreeSet<Variable>,
    substitution: &ConceptMap,
) -> Vec<crate::atom::Atomic> {
    substitution
        .iter()
        .filter(|(var, _)| vars.contains(*var))
        .map(|(var, id)| crate::atom::Atomic::id(var.clone(), id))
        .filter(|p| !atomics.contains(p))
        .collect()
}
