//! Atomic queries: one selectable atom and the predicates on its variables.

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::atom::{Atomic, alpha_hash, alpha_unifier, display_atomics};
use crate::cache::CacheKey;
use crate::pattern::Variable;

use super::{QueryFactory, infer, substitution_predicates};

/// A query with exactly one selectable atom, kept first.
#[derive(Debug, Clone)]
pub struct AtomicQuery<'a> {
    factory: QueryFactory<'a>,
    atomics: Vec<Atomic>,
}

impl<'a> AtomicQuery<'a> {
    /// Callers guarantee a single selectable atom.
    pub(crate) fn from_parts(factory: QueryFactory<'a>, mut atomics: Vec<Atomic>) -> Self {
        atomics.sort_by_key(|a| !a.is_selectable());
        Self { factory, atomics }
    }

    pub fn factory(&self) -> QueryFactory<'a> {
        self.factory
    }

    /// The selectable atom.
    pub fn atom(&self) -> &Atomic {
        &self.atomics[0]
    }

    pub fn predicates(&self) -> impl Iterator<Item = &Atomic> {
        self.atomics[1..].iter()
    }

    pub fn atomics(&self) -> &[Atomic] {
        &self.atomics
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.atomics.clone(), self.factory.config().infer_types)
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

    /// A copy with schema-implied types filled in.
    pub fn infer_types(&self) -> Self {
        let concepts = self.factory.context().concepts();
        Self {
            factory: self.factory,
            atomics: infer::infer_types(&self.atomics, concepts),
        }
    }

    pub fn is_alpha_equivalent(&self, other: &AtomicQuery<'_>) -> bool {
        alpha_unifier(&self.atomics, &other.atomics).is_some()
    }

    pub fn alpha_equivalence_hash(&self) -> u64 {
        alpha_hash(&self.atomics)
    }
}

impl std::fmt::Display for AtomicQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_atomics(&self.atomics))
    }
}
