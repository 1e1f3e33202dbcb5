//! Substitutions: variable-to-concept bindings, the unit of an answer.
//!
//! A [`ConceptMap`] is immutable in spirit: every combinator returns a new
//! map. Equality and hashing look only at the bindings; the optional
//! explanation handle rides along without affecting identity, so answers
//! with and without provenance deduplicate against each other.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::concept::ConceptId;
use crate::explanation::Explanation;
use crate::pattern::Variable;

/// An answer: a mapping from variables to concept ids.
#[derive(Debug, Clone, Default)]
pub struct ConceptMap {
    map: BTreeMap<Variable, ConceptId>,
    explanation: Option<Arc<Explanation>>,
}

impl ConceptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Variable, ConceptId)>) -> Self {
        Self {
            map: pairs.into_iter().collect(),
            explanation: None,
        }
    }

    pub fn get(&self, var: &Variable) -> Option<ConceptId> {
        self.map.get(var).copied()
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.map.contains_key(var)
    }

    pub fn vars(&self) -> impl Iterator<Item = &Variable> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, ConceptId)> {
        self.map.iter().map(|(v, id)| (v, *id))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Bind one more variable, replacing any previous binding.
    pub fn with(mut self, var: Variable, id: ConceptId) -> Self {
        self.map.insert(var, id);
        self
    }

    /// True when no shared variable is bound to different concepts.
    pub fn is_consistent_with(&self, other: &ConceptMap) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .map
            .iter()
            .all(|(v, id)| large.map.get(v).is_none_or(|o| o == id))
    }

    /// Union of two substitutions, or `None` if they disagree on a shared
    /// variable. The result carries no explanation.
    pub fn merge(&self, other: &ConceptMap) -> Option<ConceptMap> {
        if !self.is_consistent_with(other) {
            return None;
        }
        let mut map = self.map.clone();
        map.extend(other.map.iter().map(|(v, id)| (v.clone(), *id)));
        Some(ConceptMap {
            map,
            explanation: None,
        })
    }

    /// Keep only the given variables. The explanation is kept.
    pub fn project(&self, vars: &BTreeSet<Variable>) -> ConceptMap {
        ConceptMap {
            map: self
                .map
                .iter()
                .filter(|(v, _)| vars.contains(*v))
                .map(|(v, id)| (v.clone(), *id))
                .collect(),
            explanation: self.explanation.clone(),
        }
    }

    /// Rename every variable, keeping the explanation.
    pub fn rename(&self, f: impl Fn(&Variable) -> Variable) -> ConceptMap {
        ConceptMap {
            map: self.map.iter().map(|(v, id)| (f(v), *id)).collect(),
            explanation: self.explanation.clone(),
        }
    }

    pub fn with_explanation(mut self, explanation: Arc<Explanation>) -> Self {
        self.explanation = Some(explanation);
        self
    }

    pub fn without_explanation(mut self) -> Self {
        self.explanation = None;
        self
    }

    pub fn explanation(&self) -> Option<&Arc<Explanation>> {
        self.explanation.as_ref()
    }
}

impl PartialEq for ConceptMap {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl Eq for ConceptMap {}

impl Hash for ConceptMap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.map.hash(state);
    }
}

impl Serialize for ConceptMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.map.serialize(serializer)
    }
}

impl std::fmt::Display for ConceptMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.map.iter().map(|(v, id)| format!("{v}={id}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
