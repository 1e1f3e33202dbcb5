//! Conjunctive queries: several selectable atoms joined on shared variables.

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::atom::{Atomic, display_atomics};
use crate::pattern::Variable;

use super::{AtomicQuery, QueryFactory, ResolvableQuery, infer, plan, substitution_predicates};

/// A conjunction of atoms with at least one selectable atom.
#[derive(Debug, Clone)]
pub struct ConjunctiveQuery<'a> {
    factory: QueryFactory<'a>,
    atomics: Vec<Atomic>,
}

impl<'a> ConjunctiveQuery<'a> {
    pub(crate) fn from_parts(factory: QueryFactory<'a>, atomics: Vec<Atomic>) -> Self {
        Self { factory, atomics }
    }

    pub fn factory(&self) -> QueryFactory<'a> {
        self.factory
    }

    pub fn atomics(&self) -> &[Atomic] {
        &self.atomics
    }

    pub fn selectable(&self) -> impl Iterator<Item = &Atomic> {
        self.atomics.iter().filter(|a| a.is_selectable())
    }

    pub fn is_atomic(&self) -> bool {
        self.selectable().count() == 1
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.atomics.iter().flat_map(Atomic::variables).collect()
    }

    pub fn answer_variables(&self) -> BTreeSet<Variable> {
        self.variables()
            .into_iter()
            .filter(|v| !v.is_anonymous())
            .collect()
    }

    pub fn with_substitution(&self, substitution: &ConceptMap) -> Self {
        let mut atomics = self.atomics.clone();
        atomics.extend(substitution_predicates(&self.atomics, &self.variables(), substitution));
        Self {
            factory: self.factory,
            atomics,
        }
    }

    pub fn infer_types(&self) -> Self {
        let concepts = self.factory.context().concepts();
        Self {
            factory: self.factory,
            atomics: infer::infer_types(&self.atomics, concepts),
        }
    }

    /// The join order: one atomic query per selectable atom, each with the
    /// filters to apply after it.
    pub fn steps(&self) -> Vec<(AtomicQuery<'a>, Vec<Atomic>)> {
        let statistics = self.factory.context().statistics();
        plan::plan(&self.atomics, statistics)
            .into_iter()
            .map(|step| (AtomicQuery::from_parts(self.factory, step.atomics), step.filters))
            .collect()
    }

    /// The atomic query when there is a single selectable atom.
    pub fn downgrade(&self) -> ResolvableQuery<'a> {
        if self.is_atomic() {
            AtomicQuery::from_parts(self.factory, self.atomics.clone()).into()
        } else {
            self.clone().into()
        }
    }
}

impl std::fmt::Display for ConjunctiveQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_atomics(&self.atomics))
    }
}
