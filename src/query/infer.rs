//! Type inference: narrow atoms using what the schema implies.
//!
//! Only sound narrowings are applied, so inference never changes the
//! answer set:
//!
//! - an untyped relation gets the single most general relation type that
//!   relates every named role
//! - an unnamed role gets the only role its player can play in the
//!   relation

use std::collections::{BTreeMap, BTreeSet};

use crate::atom::{Atomic, RelationAtom};
use crate::concept::Label;
use crate::pattern::{RolePlayer, Variable};
use crate::schema::ConceptManager;

/// Return the atomics with inferred types and roles filled in.
pub fn infer_types(atomics: &[Atomic], concepts: &dyn ConceptManager) -> Vec<Atomic> {
    let var_types = isa_types(atomics);
    atomics
        .iter()
        .map(|atomic| match atomic {
            Atomic::Relation(r) => Atomic::Relation(infer_relation(r, &var_types, concepts)),
            other => other.clone(),
        })
        .collect()
}

/// Types asserted for variables by isa atoms in the same query.
fn isa_types(atomics: &[Atomic]) -> BTreeMap<&Variable, Vec<&Label>> {
    let mut out: BTreeMap<&Variable, Vec<&Label>> = BTreeMap::new();
    for atomic in atomics {
        if let Atomic::Isa(a) = atomic {
            out.entry(&a.var).or_default().push(&a.type_label);
        }
    }
    out
}

fn infer_relation(
    relation: &RelationAtom,
    var_types: &BTreeMap<&Variable, Vec<&Label>>,
    concepts: &dyn ConceptManager,
) -> RelationAtom {
    let type_label = relation
        .type_label
        .clone()
        .or_else(|| infer_relation_type(relation, concepts));
    let role_players = match &type_label {
        Some(t) => relation
            .role_players
            .iter()
            .map(|rp| infer_role(rp, t, var_types, concepts))
            .collect(),
        None => relation.role_players.clone(),
    };
    RelationAtom {
        var: relation.var.clone(),
        type_label,
        role_players,
    }
}

fn infer_relation_type(relation: &RelationAtom, concepts: &dyn ConceptManager) -> Option<Label> {
    let mut candidates: Option<BTreeSet<Label>> = None;
    for role in relation.role_players.iter().filter_map(|rp| rp.role.as_ref()) {
        let relating: BTreeSet<Label> = concepts.relation_types_relating(role).into_iter().collect();
        candidates = Some(match candidates {
            Some(c) => c.intersection(&relating).cloned().collect(),
            None => relating,
        });
    }
    let candidates = candidates?;
    // The most general candidates: those with no candidate supertype.
    let mut top = candidates.iter().filter(|c| {
        !concepts
            .supertypes(c)
            .iter()
            .skip(1)
            .any(|sup| candidates.contains(sup))
    });
    match (top.next(), top.next()) {
        (Some(only), None) => Some(only.clone()),
        _ => None,
    }
}

fn infer_role(
    player: &RolePlayer,
    relation_type: &Label,
    var_types: &BTreeMap<&Variable, Vec<&Label>>,
    concepts: &dyn ConceptManager,
) -> RolePlayer {
    if player.role.is_some() {
        return player.clone();
    }
    let roles = concepts.roles_of(relation_type);
    let playable: Vec<&Label> = match var_types.get(&player.player) {
        Some(types) => roles
            .iter()
            .filter(|role| types.iter().all(|t| concepts.plays(t, role)))
            .collect(),
        None => roles.iter().collect(),
    };
    match playable.as_slice() {
        [only] => RolePlayer::new(Some((*only).clone()), player.player.clone()),
        _ => player.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Pattern, VariableGenerator};
    use crate::schema::Schema;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.define_entity("person", None)
            .define_entity("company", None)
            .define_relation("employment", None, &["employee", "employer"])
            .define_relation("membership", None, &["member"])
            .define_plays("person", &["employee", "member"])
            .define_plays("company", &["employer"]);
        s
    }

    fn atomics(patterns: Vec<Pattern>) -> Vec<Atomic> {
        let mut generator = VariableGenerator::new();
        patterns
            .into_iter()
            .flat_map(|p| match p {
                Pattern::Statement(s) => Atomic::from_statement(&s, &mut generator),
                _ => Vec::new(),
            })
            .collect()
    }

    fn relation(atomics: &[Atomic]) -> &RelationAtom {
        atomics
            .iter()
            .find_map(|a| match a {
                Atomic::Relation(r) => Some(r),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn relation_type_from_roles() {
        let s = schema();
        let input = atomics(vec![Pattern::relation().role("employee", "x").player("y").into()]);
        let out = infer_types(&input, &s);
        let r = relation(&out);
        assert_eq!(r.type_label, Some(Label::from("employment")));
    }

    #[test]
    fn role_from_player_type() {
        let s = schema();
        let input = atomics(vec![
            Pattern::relation().isa("employment").player("x").player("y").into(),
            Pattern::isa("x", "company"),
        ]);
        let out = infer_types(&input, &s);
        let r = relation(&out);
        assert_eq!(r.role_players[0].role, Some(Label::from("employer")));
        assert_eq!(r.role_players[1].role, None);
    }

    #[test]
    fn single_role_relation_fills_role() {
        let s = schema();
        let input = atomics(vec![Pattern::relation().isa("membership").player("x").into()]);
        let out = infer_types(&input, &s);
        assert_eq!(relation(&out).role_players[0].role, Some(Label::from("member")));
    }

    #[test]
    fn nothing_to_infer_keeps_atoms() {
        let s = schema();
        let input = atomics(vec![Pattern::relation().player("x").player("y").into()]);
        assert_eq!(infer_types(&input, &s), input);
    }
}
