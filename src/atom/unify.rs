//! Unification of a goal atom against a rule head.
//!
//! A [`RuleUnifier`] pairs head variables with goal variables. It carries
//! goal bindings into the rule body ([`RuleUnifier::body_substitution`]) and
//! head bindings back out as goal answers ([`RuleUnifier::goal_answer`]).
//! An empty result from [`unify_with_head`] means the rule does not apply.

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::concept::Label;
use crate::pattern::{RolePlayer, Variable};
use crate::schema::ConceptManager;

use super::{Atomic, RelationAtom};

/// Variable pairing between a rule head and a goal atom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleUnifier {
    /// `(head variable, goal variable)` pairs, sorted and deduplicated.
    pairs: Vec<(Variable, Variable)>,
}

impl RuleUnifier {
    fn new(pairs: impl IntoIterator<Item = (Variable, Variable)>) -> Self {
        let pairs: BTreeSet<(Variable, Variable)> = pairs.into_iter().collect();
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    pub fn pairs(&self) -> &[(Variable, Variable)] {
        &self.pairs
    }

    /// Head variables in this unifier.
    pub fn head_variables(&self) -> BTreeSet<Variable> {
        self.pairs.iter().map(|(h, _)| h.clone()).collect()
    }

    /// Carry the goal's bound variables over to the rule's variable space.
    ///
    /// Returns `None` when two goal variables unified with the same head
    /// variable are bound to different concepts: the rule cannot produce a
    /// matching fact.
    pub fn body_substitution(&self, goal: &ConceptMap) -> Option<ConceptMap> {
        let mut out = ConceptMap::new();
        for (head, goal_var) in &self.pairs {
            let Some(id) = goal.get(goal_var) else {
                continue;
            };
            match out.get(head) {
                Some(existing) if existing != id => return None,
                Some(_) => {}
                None => out = out.with(head.clone(), id),
            }
        }
        Some(out)
    }

    /// Translate a binding of the head variables into a goal answer.
    ///
    /// Fails when the head leaves a paired variable unbound or when a
    /// repeated goal variable would receive two different concepts.
    pub fn goal_answer(&self, head: &ConceptMap) -> Option<ConceptMap> {
        let mut out = ConceptMap::new();
        for (head_var, goal_var) in &self.pairs {
            let id = head.get(head_var)?;
            match out.get(goal_var) {
                Some(existing) if existing != id => return None,
                Some(_) => {}
                None => out = out.with(goal_var.clone(), id),
            }
        }
        Some(out)
    }
}

/// Unify a goal atom with a rule head atom.
///
/// Types and roles unify when the head's label is a subtype of (or equal
/// to) the goal's label. Role players of a relation goal are matched
/// injectively onto head role players; an unspecified goal role matches
/// any head role. Every distinct way of doing so yields one unifier.
pub fn unify_with_head(
    goal: &Atomic,
    head: &Atomic,
    concepts: &dyn ConceptManager,
) -> Vec<RuleUnifier> {
    match (goal, head) {
        (Atomic::Relation(g), Atomic::Relation(h)) => unify_relations(g, h, concepts),
        (Atomic::Isa(g), Atomic::Relation(h)) => match &h.type_label {
            Some(t) if concepts.is_subtype(t, &g.type_label) => {
                vec![RuleUnifier::new([(h.var.clone(), g.var.clone())])]
            }
            _ => Vec::new(),
        },
        (Atomic::Has(g), Atomic::Has(h))
            if concepts.is_subtype(&h.attribute_type, &g.attribute_type) =>
        {
            vec![RuleUnifier::new([
                (h.owner.clone(), g.owner.clone()),
                (h.attribute.clone(), g.attribute.clone()),
            ])]
        }
        _ => Vec::new(),
    }
}

fn unify_relations(
    goal: &RelationAtom,
    head: &RelationAtom,
    concepts: &dyn ConceptManager,
) -> Vec<RuleUnifier> {
    let Some(head_type) = &head.type_label else {
        return Vec::new();
    };
    if let Some(goal_type) = &goal.type_label
        && !concepts.is_subtype(head_type, goal_type)
    {
        return Vec::new();
    }
    if goal.role_players.len() > head.role_players.len() {
        return Vec::new();
    }

    let mut results = BTreeSet::new();
    let mut taken = vec![false; head.role_players.len()];
    let mut current = vec![(head.var.clone(), goal.var.clone())];
    assign_players(
        &goal.role_players,
        &head.role_players,
        concepts,
        &mut taken,
        &mut current,
        &mut results,
    );
    results.into_iter().collect()
}

fn assign_players(
    goal: &[RolePlayer],
    head: &[RolePlayer],
    concepts: &dyn ConceptManager,
    taken: &mut [bool],
    current: &mut Vec<(Variable, Variable)>,
    results: &mut BTreeSet<RuleUnifier>,
) {
    let Some((first, rest)) = goal.split_first() else {
        results.insert(RuleUnifier::new(current.iter().cloned()));
        return;
    };
    for (k, candidate) in head.iter().enumerate() {
        if taken[k] || !role_compatible(first.role.as_ref(), candidate.role.as_ref(), concepts) {
            continue;
        }
        taken[k] = true;
        current.push((candidate.player.clone(), first.player.clone()));
        assign_players(rest, head, concepts, taken, current, results);
        current.pop();
        taken[k] = false;
    }
}

fn role_compatible(
    goal_role: Option<&Label>,
    head_role: Option<&Label>,
    concepts: &dyn ConceptManager,
) -> bool {
    match (goal_role, head_role) {
        (None, _) => true,
        (Some(g), Some(h)) => concepts.is_subtype(h, g),
        (Some(_), None) => false,
    }
}
