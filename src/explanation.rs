//! Explanations: how an answer was derived.
//!
//! Every answer produced with explanations enabled carries an
//! [`Explanation`] handle. The handles form a DAG (parent answers may be
//! shared) rooted at each returned answer. [`ExplanationTree`] is the
//! serializable, fully expanded view of that DAG.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::answer::ConceptMap;
use crate::concept::Label;

/// How an answer came to be.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExplanationKind {
    /// Asserted in storage.
    Lookup,
    /// Conjunction of per-atom answers.
    Join,
    /// Derived by the named rule from its body answer.
    Rule(Label),
}

/// A node in the explanation DAG.
#[derive(Debug, Clone)]
pub struct Explanation {
    kind: ExplanationKind,
    answers: Vec<ConceptMap>,
}

impl Explanation {
    pub fn lookup() -> Self {
        Self {
            kind: ExplanationKind::Lookup,
            answers: Vec::new(),
        }
    }

    pub fn join(answers: Vec<ConceptMap>) -> Self {
        Self {
            kind: ExplanationKind::Join,
            answers,
        }
    }

    /// A rule explanation has exactly one parent: the answer to the body.
    pub fn rule(label: Label, body_answer: ConceptMap) -> Self {
        Self {
            kind: ExplanationKind::Rule(label),
            answers: vec![body_answer],
        }
    }

    pub fn kind(&self) -> &ExplanationKind {
        &self.kind
    }

    /// The parent answers this explanation consumed.
    pub fn answers(&self) -> &[ConceptMap] {
        &self.answers
    }

    /// Short name used in serialized trees.
    pub fn name(&self) -> &'static str {
        match self.kind {
            ExplanationKind::Lookup => "lookup",
            ExplanationKind::Join => "join",
            ExplanationKind::Rule(_) => "rule",
        }
    }

    pub fn rule_label(&self) -> Option<&Label> {
        match &self.kind {
            ExplanationKind::Rule(label) => Some(label),
            _ => None,
        }
    }

    pub fn is_lookup(&self) -> bool {
        self.kind == ExplanationKind::Lookup
    }

    pub fn is_rule(&self) -> bool {
        matches!(self.kind, ExplanationKind::Rule(_))
    }

    /// Every answer reachable from this explanation, each counted once.
    pub fn deductions(&self) -> Vec<ConceptMap> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<&ConceptMap> = self.answers.iter().rev().collect();
        while let Some(answer) = stack.pop() {
            if !seen.insert(answer) {
                continue;
            }
            out.push(answer.clone());
            if let Some(e) = answer.explanation() {
                stack.extend(e.answers.iter().rev());
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tree view
// ---------------------------------------------------------------------------

/// Expanded, serializable explanation of one answer.
///
/// Built by walking the explanation DAG without touching the answers it
/// reads, so building twice yields equal trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplanationTree {
    pub answer: BTreeMap<String, String>,
    /// `lookup`, `join` or `rule`; absent when the answer carries no explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<Label>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExplanationTree>,
}

impl ExplanationTree {
    pub fn build(answer: &ConceptMap) -> Self {
        let bindings = answer
            .iter()
            .map(|(v, id)| (v.name().to_string(), id.to_string()))
            .collect();
        match answer.explanation() {
            Some(e) => Self {
                answer: bindings,
                kind: Some(e.name()),
                rule: e.rule_label().cloned(),
                children: e.answers.iter().map(Self::build).collect(),
            },
            None => Self {
                answer: bindings,
                kind: None,
                rule: None,
                children: Vec::new(),
            },
        }
    }

    /// Number of leaves: the asserted facts the derivation consumed.
    pub fn leaf_count(&self) -> usize {
        if self.children.is_empty() {
            1
        } else {
            self.children.iter().map(Self::leaf_count).sum()
        }
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Self::depth).max().unwrap_or(0)
    }

    /// Labels of every rule applied anywhere in the tree, outermost first.
    pub fn rules(&self) -> Vec<&Label> {
        let mut out = Vec::new();
        out.extend(self.rule.as_ref());
        for child in &self.children {
            out.extend(child.rules());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::concept::ConceptId;
    use crate::pattern::Variable;

    fn fact(vars: [(&str, u64); 2]) -> ConceptMap {
        ConceptMap::from_pairs(
            vars.map(|(v, id)| (Variable::new(v), ConceptId::new(id).unwrap())),
        )
        .with_explanation(Arc::new(Explanation::lookup()))
    }

    fn derived() -> ConceptMap {
        let ab = fact([("x", 1), ("y", 2)]);
        let bc = fact([("y", 2), ("z", 3)]);
        let body = ab
            .merge(&bc)
            .unwrap()
            .with_explanation(Arc::new(Explanation::join(vec![ab, bc])));
        ConceptMap::from_pairs([
            (Variable::new("x"), ConceptId::new(1).unwrap()),
            (Variable::new("y"), ConceptId::new(3).unwrap()),
        ])
        .with_explanation(Arc::new(Explanation::rule("transitivity".into(), body)))
    }

    #[test]
    fn tree_counts_asserted_leaves() {
        let tree = ExplanationTree::build(&derived());
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.rules(), vec![&Label::from("transitivity")]);
    }

    #[test]
    fn building_twice_is_idempotent() {
        let answer = derived();
        assert_eq!(ExplanationTree::build(&answer), ExplanationTree::build(&answer));
    }

    #[test]
    fn rule_explanation_has_single_parent() {
        let answer = derived();
        let e = answer.explanation().unwrap();
        assert!(e.is_rule());
        assert_eq!(e.answers().len(), 1);
        assert_eq!(e.deductions().len(), 3);
    }

    #[test]
    fn tree_serializes_kind_inline() {
        let tree = ExplanationTree::build(&fact([("x", 1), ("y", 2)]));
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["kind"], "lookup");
    }
}
