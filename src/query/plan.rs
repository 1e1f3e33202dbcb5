//! Greedy join ordering for conjunctive queries.
//!
//! Selectable atoms are ordered by estimated selectivity. At each step the
//! planner prefers atoms connected to what is already bound, then atoms
//! touching a fixed id, then the smallest instance count, then declaration
//! order. Predicates travel with the first step that binds all of their
//! variables.

use std::collections::BTreeSet;

use crate::atom::Atomic;
use crate::pattern::Variable;
use crate::statistics::KeyspaceStatistics;

/// One step of a conjunctive plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    /// A selectable atom followed by the predicates local to it.
    pub atomics: Vec<Atomic>,
    /// Predicates checked on the joined answer once this step is done.
    pub filters: Vec<Atomic>,
}

/// Order `atomics` into join steps.
pub fn plan(atomics: &[Atomic], statistics: &dyn KeyspaceStatistics) -> Vec<PlanStep> {
    let selectable: Vec<(usize, &Atomic)> = atomics
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_selectable())
        .collect();
    let predicates: Vec<&Atomic> = atomics.iter().filter(|a| a.is_predicate()).collect();
    let fixed: BTreeSet<Variable> = atomics
        .iter()
        .filter_map(|a| match a {
            Atomic::Id(p) => Some(p.var.clone()),
            _ => None,
        })
        .collect();

    let counts: Vec<Option<u64>> = selectable
        .iter()
        .map(|(_, a)| a.label().and_then(|l| statistics.instance_count(l)))
        .collect();
    let known = counts.iter().filter(|c| c.is_some()).count();
    if known > 0 && known < counts.len() {
        tracing::warn!(
            missing = counts.len() - known,
            "statistics incomplete, unknown counts ordered last"
        );
    } else if known == 0 && counts.len() > 1 {
        tracing::debug!("no statistics, keeping declaration order");
    }

    let mut remaining: Vec<usize> = (0..selectable.len()).collect();
    let mut bound: BTreeSet<Variable> = BTreeSet::new();
    let mut order = Vec::with_capacity(selectable.len());
    while !remaining.is_empty() {
        let Some(pos) = (0..remaining.len()).min_by_key(|&pos| {
            let i = remaining[pos];
            let vars = selectable[i].1.variables();
            let disconnected = !bound.is_empty() && vars.is_disjoint(&bound);
            let unfixed = vars.is_disjoint(&fixed);
            (
                disconnected,
                unfixed,
                counts[i].unwrap_or(u64::MAX),
                selectable[i].0,
            )
        }) else {
            break;
        };
        let i = remaining.remove(pos);
        bound.extend(selectable[i].1.variables());
        order.push(i);
    }

    let mut steps: Vec<PlanStep> = order
        .iter()
        .map(|&i| PlanStep {
            atomics: vec![selectable[i].1.clone()],
            filters: Vec::new(),
        })
        .collect();

    for predicate in predicates {
        let vars = predicate.variables();
        if let Some(step) = steps
            .iter_mut()
            .find(|s| vars.is_subset(&s.atomics[0].variables()))
        {
            step.atomics.push(predicate.clone());
            continue;
        }
        let mut seen = BTreeSet::new();
        for step in steps.iter_mut() {
            seen.extend(step.atomics[0].variables());
            if vars.is_subset(&seen) {
                step.filters.push(predicate.clone());
                break;
            }
        }
    }
    steps
}
