//! Composite queries: a positive conjunction with negated blocks.
//!
//! An answer of the positive part survives when no negated block has an
//! answer under it. Variables of a negated block that occur nowhere else
//! are existential inside the block; the others must be bound by the
//! positive answer.

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::pattern::Variable;

use super::{ConjunctiveQuery, QueryFactory, ResolvableQuery};

#[derive(Debug, Clone)]
pub struct CompositeQuery<'a> {
    positive: ConjunctiveQuery<'a>,
    negated: Vec<ResolvableQuery<'a>>,
}

impl<'a> CompositeQuery<'a> {
    pub(crate) fn from_parts(positive: ConjunctiveQuery<'a>, negated: Vec<ResolvableQuery<'a>>) -> Self {
        Self { positive, negated }
    }

    pub fn factory(&self) -> QueryFactory<'a> {
        self.positive.factory()
    }

    pub fn positive(&self) -> &ConjunctiveQuery<'a> {
        &self.positive
    }

    pub fn negated(&self) -> &[ResolvableQuery<'a>] {
        &self.negated
    }

    pub fn is_positive(&self) -> bool {
        self.negated.is_empty()
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = self.positive.variables();
        for n in &self.negated {
            vars.extend(n.variables());
        }
        vars
    }

    pub fn answer_variables(&self) -> BTreeSet<Variable> {
        self.positive.answer_variables()
    }

    /// Variables of negated block `index` that the rest of the query also
    /// mentions. These must be bound when the block is evaluated.
    pub fn shared_variables(&self, index: usize) -> BTreeSet<Variable> {
        let Some(block) = self.negated.get(index) else {
            return BTreeSet::new();
        };
        let mut elsewhere = self.positive.variables();
        for (i, other) in self.negated.iter().enumerate() {
            if i != index {
                elsewhere.extend(other.variables());
            }
        }
        block
            .variables()
            .into_iter()
            .filter(|v| !v.is_anonymous() && elsewhere.contains(v))
            .collect()
    }

    pub fn with_substitution(&self, substitution: &ConceptMap) -> Self {
        Self {
            positive: self.positive.with_substitution(substitution),
            negated: self
                .negated
                .iter()
                .map(|n| n.with_substitution(substitution))
                .collect(),
        }
    }

    /// The simplest equivalent query: without negated blocks this is the
    /// positive part, itself reduced to an atomic query when possible.
    pub fn downgrade(&self) -> ResolvableQuery<'a> {
        if self.is_positive() {
            self.positive.downgrade()
        } else {
            self.clone().into()
        }
    }
}

impl std::fmt::Display for CompositeQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.positive)?;
        for n in &self.negated {
            write!(f, " not {n}")?;
        }
        Ok(())
    }
}
