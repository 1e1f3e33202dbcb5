//! Disjunctive queries: the union of branch answers over an outer scope.

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::pattern::Variable;

use super::{QueryFactory, ResolvableQuery};

/// Branches resolved independently; answers are projected onto the outer
/// variables and deduplicated.
#[derive(Debug, Clone)]
pub struct DisjunctiveQuery<'a> {
    factory: QueryFactory<'a>,
    branches: Vec<ResolvableQuery<'a>>,
    outer: BTreeSet<Variable>,
}

impl<'a> DisjunctiveQuery<'a> {
    pub(crate) fn from_parts(
        factory: QueryFactory<'a>,
        branches: Vec<ResolvableQuery<'a>>,
        outer: BTreeSet<Variable>,
    ) -> Self {
        Self {
            factory,
            branches,
            outer,
        }
    }

    pub fn factory(&self) -> QueryFactory<'a> {
        self.factory
    }

    pub fn branches(&self) -> &[ResolvableQuery<'a>] {
        &self.branches
    }

    pub fn outer_variables(&self) -> &BTreeSet<Variable> {
        &self.outer
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.branches.iter().flat_map(ResolvableQuery::variables).collect()
    }

    pub fn with_substitution(&self, substitution: &ConceptMap) -> Self {
        Self {
            factory: self.factory,
            branches: self
                .branches
                .iter()
                .map(|b| b.with_substitution(substitution))
                .collect(),
            outer: self.outer.clone(),
        }
    }
}

impl std::fmt::Display for DisjunctiveQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.branches.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" or "))
    }
}
