//! Alpha-equivalence of atomic queries.
//!
//! Two atomic queries (one selectable atom plus its predicates) are
//! alpha-equivalent when a bijection between their variables maps one onto
//! the other. [`alpha_unifier`] searches for that bijection; [`alpha_hash`]
//! is a renaming-invariant fingerprint, so equivalent queries always hash
//! alike. Different queries may still collide; callers must confirm with the
//! unifier.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use crate::answer::ConceptMap;
use crate::pattern::Variable;

use super::Atomic;

/// A bijective variable renaming from one query onto an alpha-equivalent one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unifier {
    mapping: BTreeMap<Variable, Variable>,
}

impl Unifier {
    pub fn new(mapping: BTreeMap<Variable, Variable>) -> Self {
        Self { mapping }
    }

    pub fn get(&self, var: &Variable) -> Option<&Variable> {
        self.mapping.get(var)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Variable)> {
        self.mapping.iter()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn inverse(&self) -> Unifier {
        Unifier {
            mapping: self
                .mapping
                .iter()
                .map(|(k, v)| (v.clone(), k.clone()))
                .collect(),
        }
    }

    /// Rename a variable; variables outside the mapping are kept.
    pub fn rename(&self, var: &Variable) -> Variable {
        self.mapping.get(var).cloned().unwrap_or_else(|| var.clone())
    }

    /// Rename the keys of an answer, keeping its explanation.
    pub fn apply(&self, answer: &ConceptMap) -> ConceptMap {
        answer.rename(|v| self.rename(v))
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Renaming-invariant hash of a list of atomics.
///
/// Every atomic contributes a variable-free descriptor, and every variable a
/// sorted signature of the positions it occupies. Both multisets are sorted
/// before hashing, so neither variable names nor declaration order matter.
pub fn alpha_hash(atomics: &[Atomic]) -> u64 {
    let mut descriptors: Vec<String> = Vec::with_capacity(atomics.len());
    let mut occurrences: HashMap<&Variable, Vec<String>> = HashMap::new();

    for atomic in atomics {
        match atomic {
            Atomic::Isa(a) => {
                descriptors.push(format!("isa:{}", a.type_label));
                occurrences
                    .entry(&a.var)
                    .or_default()
                    .push(format!("isa:{}", a.type_label));
            }
            Atomic::Relation(r) => {
                let ty = r.type_label.as_ref().map_or("_", |l| l.as_str());
                let mut roles: Vec<&str> = r
                    .role_players
                    .iter()
                    .map(|rp| rp.role.as_ref().map_or("_", |l| l.as_str()))
                    .collect();
                roles.sort_unstable();
                descriptors.push(format!("rel:{ty}:{}", roles.join(",")));
                occurrences
                    .entry(&r.var)
                    .or_default()
                    .push(format!("rel.var:{ty}"));
                for rp in &r.role_players {
                    let role = rp.role.as_ref().map_or("_", |l| l.as_str());
                    occurrences
                        .entry(&rp.player)
                        .or_default()
                        .push(format!("rel.player:{ty}:{role}"));
                }
            }
            Atomic::Has(h) => {
                descriptors.push(format!("has:{}", h.attribute_type));
                occurrences
                    .entry(&h.owner)
                    .or_default()
                    .push(format!("has.owner:{}", h.attribute_type));
                occurrences
                    .entry(&h.attribute)
                    .or_default()
                    .push(format!("has.attr:{}", h.attribute_type));
            }
            Atomic::Value(v) => {
                let d = format!("value:{}:{:?}", v.comparator.symbol(), v.value);
                occurrences.entry(&v.var).or_default().push(d.clone());
                descriptors.push(d);
            }
            Atomic::Id(i) => {
                let d = format!("id:{}", i.id);
                occurrences.entry(&i.var).or_default().push(d.clone());
                descriptors.push(d);
            }
            Atomic::Neq(n) => {
                descriptors.push("neq".to_string());
                occurrences.entry(&n.left).or_default().push("neq".into());
                occurrences.entry(&n.right).or_default().push("neq".into());
            }
        }
    }

    descriptors.sort_unstable();
    let mut signatures: Vec<Vec<String>> = occurrences
        .into_values()
        .map(|mut occ| {
            occ.sort_unstable();
            occ
        })
        .collect();
    signatures.sort_unstable();

    let mut hasher = DefaultHasher::new();
    descriptors.hash(&mut hasher);
    signatures.hash(&mut hasher);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Bijection search
// ---------------------------------------------------------------------------

/// Find a bijection between the variables of `a` and `b` under which every
/// atomic of `a` maps onto a distinct atomic of `b`.
///
/// Relation role players are matched up to permutation among players with
/// the same role (including unspecified roles); `!=` is symmetric.
pub fn alpha_unifier(a: &[Atomic], b: &[Atomic]) -> Option<Unifier> {
    if a.len() != b.len() {
        return None;
    }
    // Selectable atomics first: they pin down most variables early.
    let mut order: Vec<usize> = (0..a.len()).collect();
    order.sort_by_key(|&i| (a[i].is_predicate(), a[i].kind()));

    let mut used = vec![false; b.len()];
    let mut state = Bijection::default();
    if search(a, b, &order, 0, &mut used, &mut state) {
        Some(Unifier::new(state.forward))
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct Bijection {
    forward: BTreeMap<Variable, Variable>,
    backward: BTreeMap<Variable, Variable>,
}

impl Bijection {
    /// Bind every pair, failing if any contradicts an existing binding.
    fn extend(&mut self, pairs: &[(Variable, Variable)]) -> bool {
        for (from, to) in pairs {
            match (self.forward.get(from), self.backward.get(to)) {
                (Some(f), _) if f != to => return false,
                (_, Some(b)) if b != from => return false,
                (Some(_), Some(_)) => {}
                _ => {
                    self.forward.insert(from.clone(), to.clone());
                    self.backward.insert(to.clone(), from.clone());
                }
            }
        }
        true
    }
}

fn search(
    a: &[Atomic],
    b: &[Atomic],
    order: &[usize],
    depth: usize,
    used: &mut [bool],
    state: &mut Bijection,
) -> bool {
    let Some(&i) = order.get(depth) else {
        return true;
    };
    for j in 0..b.len() {
        if used[j] {
            continue;
        }
        for pairs in candidate_pairings(&a[i], &b[j]) {
            let mut next = state.clone();
            if !next.extend(&pairs) {
                continue;
            }
            used[j] = true;
            if search(a, b, order, depth + 1, used, &mut next) {
                *state = next;
                return true;
            }
            used[j] = false;
        }
    }
    false
}

/// All variable pairings under which `x` matches `y` structurally.
fn candidate_pairings(x: &Atomic, y: &Atomic) -> Vec<Vec<(Variable, Variable)>> {
    match (x, y) {
        (Atomic::Isa(p), Atomic::Isa(q)) if p.type_label == q.type_label => {
            vec![vec![(p.var.clone(), q.var.clone())]]
        }
        (Atomic::Has(p), Atomic::Has(q)) if p.attribute_type == q.attribute_type => vec![vec![
            (p.owner.clone(), q.owner.clone()),
            (p.attribute.clone(), q.attribute.clone()),
        ]],
        (Atomic::Value(p), Atomic::Value(q))
            if p.comparator == q.comparator && p.value == q.value =>
        {
            vec![vec![(p.var.clone(), q.var.clone())]]
        }
        (Atomic::Id(p), Atomic::Id(q)) if p.id == q.id => {
            vec![vec![(p.var.clone(), q.var.clone())]]
        }
        (Atomic::Neq(p), Atomic::Neq(q)) => vec![
            vec![(p.left.clone(), q.left.clone()), (p.right.clone(), q.right.clone())],
            vec![(p.left.clone(), q.right.clone()), (p.right.clone(), q.left.clone())],
        ],
        (Atomic::Relation(p), Atomic::Relation(q))
            if p.type_label == q.type_label && p.role_players.len() == q.role_players.len() =>
        {
            let mut out = Vec::new();
            let mut taken = vec![false; q.role_players.len()];
            let mut current = vec![(p.var.clone(), q.var.clone())];
            permute_players(p, q, 0, &mut taken, &mut current, &mut out);
            out
        }
        _ => Vec::new(),
    }
}

fn permute_players(
    p: &super::RelationAtom,
    q: &super::RelationAtom,
    index: usize,
    taken: &mut [bool],
    current: &mut Vec<(Variable, Variable)>,
    out: &mut Vec<Vec<(Variable, Variable)>>,
) {
    let Some(rp) = p.role_players.get(index) else {
        out.push(current.clone());
        return;
    };
    for (k, candidate) in q.role_players.iter().enumerate() {
        if taken[k] || candidate.role != rp.role {
            continue;
        }
        taken[k] = true;
        current.push((rp.player.clone(), candidate.player.clone()));
        permute_players(p, q, index + 1, taken, current, out);
        current.pop();
        taken[k] = false;
    }
}
