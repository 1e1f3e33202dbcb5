//! Rule applicability cache.
//!
//! Indexes rules by the label their head concludes and answers, per atom
//! shape, which rules could possibly produce a matching fact. Pruning uses
//! schema subtyping only; unification does the exact check afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::atom::{AtomKind, Atomic};
use crate::concept::Label;
use crate::rule::Rule;
use crate::schema::ConceptManager;

/// What a goal atom's applicable rules depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RuleKey {
    Typed(AtomKind, Label),
    /// Relation without a type, by its (sorted) roles.
    Untyped(Vec<Option<Label>>),
}

impl RuleKey {
    fn of(atom: &Atomic) -> Option<RuleKey> {
        match atom {
            Atomic::Relation(r) if r.type_label.is_none() => {
                let mut roles: Vec<Option<Label>> =
                    r.role_players.iter().map(|rp| rp.role.clone()).collect();
                roles.sort();
                Some(RuleKey::Untyped(roles))
            }
            _ if atom.is_selectable() => Some(RuleKey::Typed(atom.kind(), atom.label()?.clone())),
            _ => None,
        }
    }
}

/// Memoized applicability for one key.
#[derive(Debug, Clone, Default)]
struct RuleEntry {
    rules: Vec<Arc<Rule>>,
    /// No rule can ever conclude a fact of this shape.
    inapplicable: bool,
}

/// Rules of one reasoning context, with memoized applicability per atom shape.
#[derive(Debug, Default)]
pub struct RuleCache {
    rules: Vec<Arc<Rule>>,
    entries: HashMap<RuleKey, RuleEntry>,
}

impl RuleCache {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
            entries: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules whose head could conclude a fact matching `atom`.
    ///
    /// A rule about a supertype or subtype of the atom's type is kept; a
    /// rule about an unrelated type is not.
    pub fn applicable(&mut self, atom: &Atomic, concepts: &dyn ConceptManager) -> Vec<Arc<Rule>> {
        let Some(key) = RuleKey::of(atom) else {
            return Vec::new();
        };
        if let Some(entry) = self.entries.get(&key) {
            return entry.rules.clone();
        }
        let rules: Vec<Arc<Rule>> = self
            .rules
            .iter()
            .filter(|rule| compatible(&key, rule.head(), concepts))
            .cloned()
            .collect();
        tracing::debug!(
            atom = %atom,
            candidates = rules.len(),
            "rule applicability computed"
        );
        let entry = RuleEntry {
            inapplicable: rules.is_empty(),
            rules,
        };
        let rules = entry.rules.clone();
        self.entries.insert(key, entry);
        rules
    }

    /// True when no rule can conclude a fact matching `atom`.
    pub fn is_inapplicable(&mut self, atom: &Atomic, concepts: &dyn ConceptManager) -> bool {
        self.applicable(atom, concepts);
        RuleKey::of(atom)
            .and_then(|key| self.entries.get(&key))
            .is_none_or(|entry| entry.inapplicable)
    }

    /// Forget memoized applicability; the rules are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn compatible(key: &RuleKey, head: &Atomic, concepts: &dyn ConceptManager) -> bool {
    let related = |a: &Label, b: &Label| concepts.is_subtype(a, b) || concepts.is_subtype(b, a);
    match (key, head) {
        (RuleKey::Typed(AtomKind::Relation | AtomKind::Isa, label), Atomic::Relation(h)) => {
            h.type_label.as_ref().is_some_and(|t| related(t, label))
        }
        (RuleKey::Typed(AtomKind::Has, label), Atomic::Has(h)) => related(&h.attribute_type, label),
        (RuleKey::Untyped(roles), Atomic::Relation(h)) => {
            let Some(head_type) = &h.type_label else {
                return false;
            };
            let head_roles = concepts.roles_of(head_type);
            roles.iter().flatten().all(|role| {
                head_roles
                    .iter()
                    .any(|hr| concepts.is_subtype(hr, role))
            })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Pattern, VariableGenerator};
    use crate::schema::Schema;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.define_entity("animal", None)
            .define_entity("dog", Some("animal"))
            .define_relation("likes", None, &["liker", "liked"])
            .define_relation("adores", Some("likes"), &[])
            .define_relation("fears", None, &["scared", "scary"])
            .define_plays("animal", &["liker", "liked", "scared", "scary"]);
        s
    }

    fn atom(p: Pattern) -> Atomic {
        let mut generator = VariableGenerator::new();
        match p {
            Pattern::Statement(s) => Atomic::from_statement(&s, &mut generator).remove(0),
            _ => unreachable!(),
        }
    }

    fn rule(label: &str, head: &str) -> Rule {
        Rule::new(
            label,
            Pattern::and([Pattern::isa("x", "animal"), Pattern::isa("y", "animal")]),
            Pattern::rel(head, &[(roles(head).0, "x"), (roles(head).1, "y")]),
        )
        .unwrap()
    }

    fn roles(head: &str) -> (&'static str, &'static str) {
        match head {
            "fears" => ("scared", "scary"),
            _ => ("liker", "liked"),
        }
    }

    fn cache() -> RuleCache {
        RuleCache::new(vec![
            rule("general", "likes"),
            rule("specific", "adores"),
            rule("unrelated", "fears"),
        ])
    }

    #[test]
    fn keeps_rules_about_related_types() {
        let s = schema();
        let mut c = cache();
        let goal = atom(Pattern::rel("adores", &[("liker", "a")]));
        let labels: Vec<String> = c
            .applicable(&goal, &s)
            .iter()
            .map(|r| r.label().to_string())
            .collect();
        assert_eq!(labels, vec!["general", "specific"]);
    }

    #[test]
    fn untyped_relations_match_by_roles() {
        let s = schema();
        let mut c = cache();
        let goal = atom(Pattern::relation().role("scared", "a").player("b").into());
        let rules = c.applicable(&goal, &s);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].label().as_str(), "unrelated");
    }

    #[test]
    fn entity_goals_are_inapplicable() {
        let s = schema();
        let mut c = cache();
        assert!(c.is_inapplicable(&atom(Pattern::isa("x", "dog")), &s));
        assert!(!c.is_inapplicable(&atom(Pattern::isa("x", "likes")), &s));
    }
}
