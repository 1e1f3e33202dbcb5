//! Atomic model: normalized single constraints over variables.
//!
//! Each leaf [`Statement`] of a pattern is converted into one or more
//! [`Atomic`]s. Selectable atomics (isa, relation, has) bind answer
//! variables; predicates (value comparison, id, inequality) only filter.
//!
//! - **Alpha-equivalence** (`alpha`): structural equality up to a consistent
//!   variable renaming, with a renaming-invariant hash
//! - **Rule unification** (`unify`): matching a goal atom against a rule head

pub mod alpha;
pub mod unify;

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::concept::{ConceptId, Label, Value};
use crate::pattern::{Comparator, RolePlayer, Statement, Variable, VariableGenerator};
use crate::schema::ConceptManager;

pub use alpha::{alpha_hash, alpha_unifier, Unifier};
pub use unify::{unify_with_head, RuleUnifier};

/// `$x isa person`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsaAtom {
    pub var: Variable,
    pub type_label: Label,
}

/// `$r (role: $x, ...) isa type`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationAtom {
    pub var: Variable,
    pub type_label: Option<Label>,
    pub role_players: Vec<RolePlayer>,
}

/// `$x has name $n`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HasAtom {
    pub owner: Variable,
    pub attribute_type: Label,
    pub attribute: Variable,
}

/// `$n > 10`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValuePredicate {
    pub var: Variable,
    pub comparator: Comparator,
    pub value: Value,
}

/// `$x id V12`, also produced when a substitution is attached to a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdPredicate {
    pub var: Variable,
    pub id: ConceptId,
}

/// `$x != $y`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NeqPredicate {
    pub left: Variable,
    pub right: Variable,
}

/// Constraint kind of an [`Atomic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AtomKind {
    Isa,
    Relation,
    Has,
    Value,
    Id,
    Neq,
}

/// A single normalized constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Atomic {
    Isa(IsaAtom),
    Relation(RelationAtom),
    Has(HasAtom),
    Value(ValuePredicate),
    Id(IdPredicate),
    Neq(NeqPredicate),
}

impl Atomic {
    pub fn isa(var: Variable, type_label: Label) -> Self {
        Atomic::Isa(IsaAtom { var, type_label })
    }

    pub fn id(var: Variable, id: ConceptId) -> Self {
        Atomic::Id(IdPredicate { var, id })
    }

    pub fn kind(&self) -> AtomKind {
        match self {
            Atomic::Isa(_) => AtomKind::Isa,
            Atomic::Relation(_) => AtomKind::Relation,
            Atomic::Has(_) => AtomKind::Has,
            Atomic::Value(_) => AtomKind::Value,
            Atomic::Id(_) => AtomKind::Id,
            Atomic::Neq(_) => AtomKind::Neq,
        }
    }

    /// Selectable atomics contribute answer variables; predicates only filter.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Atomic::Isa(_) | Atomic::Relation(_) | Atomic::Has(_))
    }

    pub fn is_predicate(&self) -> bool {
        !self.is_selectable()
    }

    /// The schema label this atomic is about, if any.
    pub fn label(&self) -> Option<&Label> {
        match self {
            Atomic::Isa(a) => Some(&a.type_label),
            Atomic::Relation(r) => r.type_label.as_ref(),
            Atomic::Has(h) => Some(&h.attribute_type),
            _ => None,
        }
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = BTreeSet::new();
        match self {
            Atomic::Isa(a) => {
                vars.insert(a.var.clone());
            }
            Atomic::Relation(r) => {
                vars.insert(r.var.clone());
                vars.extend(r.role_players.iter().map(|rp| rp.player.clone()));
            }
            Atomic::Has(h) => {
                vars.insert(h.owner.clone());
                vars.insert(h.attribute.clone());
            }
            Atomic::Value(v) => {
                vars.insert(v.var.clone());
            }
            Atomic::Id(i) => {
                vars.insert(i.var.clone());
            }
            Atomic::Neq(n) => {
                vars.insert(n.left.clone());
                vars.insert(n.right.clone());
            }
        }
        vars
    }

    /// Apply a variable renaming.
    pub fn rename(&self, f: &impl Fn(&Variable) -> Variable) -> Atomic {
        match self {
            Atomic::Isa(a) => Atomic::Isa(IsaAtom {
                var: f(&a.var),
                type_label: a.type_label.clone(),
            }),
            Atomic::Relation(r) => Atomic::Relation(RelationAtom {
                var: f(&r.var),
                type_label: r.type_label.clone(),
                role_players: r
                    .role_players
                    .iter()
                    .map(|rp| RolePlayer::new(rp.role.clone(), f(&rp.player)))
                    .collect(),
            }),
            Atomic::Has(h) => Atomic::Has(HasAtom {
                owner: f(&h.owner),
                attribute_type: h.attribute_type.clone(),
                attribute: f(&h.attribute),
            }),
            Atomic::Value(v) => Atomic::Value(ValuePredicate {
                var: f(&v.var),
                comparator: v.comparator,
                value: v.value.clone(),
            }),
            Atomic::Id(i) => Atomic::Id(IdPredicate {
                var: f(&i.var),
                id: i.id,
            }),
            Atomic::Neq(n) => Atomic::Neq(NeqPredicate {
                left: f(&n.left),
                right: f(&n.right),
            }),
        }
    }

    /// Convert a pattern statement, generating anonymous variables for
    /// unnamed relations and attributes.
    pub fn from_statement(statement: &Statement, vars: &mut VariableGenerator) -> Vec<Atomic> {
        match statement {
            Statement::Isa { var, type_label } => {
                vec![Atomic::isa(var.clone(), type_label.clone())]
            }
            Statement::Relation {
                var,
                type_label,
                players,
            } => vec![Atomic::Relation(RelationAtom {
                var: var.clone().unwrap_or_else(|| vars.fresh()),
                type_label: type_label.clone(),
                role_players: players.clone(),
            })],
            Statement::Has {
                owner,
                attribute_type,
                attribute,
                value,
            } => {
                let attribute = attribute.clone().unwrap_or_else(|| vars.fresh());
                let mut out = vec![Atomic::Has(HasAtom {
                    owner: owner.clone(),
                    attribute_type: attribute_type.clone(),
                    attribute: attribute.clone(),
                })];
                if let Some(value) = value {
                    out.push(Atomic::Value(ValuePredicate {
                        var: attribute,
                        comparator: Comparator::Eq,
                        value: value.clone(),
                    }));
                }
                out
            }
            Statement::Compare {
                var,
                comparator,
                value,
            } => vec![Atomic::Value(ValuePredicate {
                var: var.clone(),
                comparator: *comparator,
                value: value.clone(),
            })],
            Statement::Id { var, id } => vec![Atomic::id(var.clone(), *id)],
            Statement::Neq { left, right } => vec![Atomic::Neq(NeqPredicate {
                left: left.clone(),
                right: right.clone(),
            })],
        }
    }

    /// Evaluate a predicate against an answer.
    ///
    /// Returns `None` for selectable atomics and when a variable the predicate
    /// needs is not bound yet.
    pub fn holds(&self, answer: &ConceptMap, concepts: &dyn ConceptManager) -> Option<bool> {
        match self {
            Atomic::Value(v) => {
                let id = answer.get(&v.var)?;
                Some(
                    concepts
                        .value_of(id)
                        .is_some_and(|actual| v.comparator.test(&actual, &v.value)),
                )
            }
            Atomic::Id(i) => Some(answer.get(&i.var)? == i.id),
            Atomic::Neq(n) => Some(answer.get(&n.left)? != answer.get(&n.right)?),
            _ => None,
        }
    }

    /// Structural equality up to a consistent variable renaming.
    pub fn is_alpha_equivalent(&self, other: &Atomic) -> bool {
        alpha_unifier(std::slice::from_ref(self), std::slice::from_ref(other)).is_some()
    }

    /// Hash consistent with [`Atomic::is_alpha_equivalent`].
    pub fn alpha_equivalence_hash(&self) -> u64 {
        alpha_hash(std::slice::from_ref(self))
    }
}

impl std::fmt::Display for Atomic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Atomic::Isa(a) => write!(f, "{} isa {};", a.var, a.type_label),
            Atomic::Relation(r) => {
                let players: Vec<String> = r.role_players.iter().map(ToString::to_string).collect();
                write!(f, "{} ({})", r.var, players.join(", "))?;
                if let Some(t) = &r.type_label {
                    write!(f, " isa {t}")?;
                }
                f.write_str(";")
            }
            Atomic::Has(h) => write!(f, "{} has {} {};", h.owner, h.attribute_type, h.attribute),
            Atomic::Value(v) => write!(f, "{} {} {};", v.var, v.comparator.symbol(), v.value),
            Atomic::Id(i) => write!(f, "{} id {};", i.var, i.id),
            Atomic::Neq(n) => write!(f, "{} != {};", n.left, n.right),
        }
    }
}

/// Render a list of atomics as a query block.
pub fn display_atomics(atomics: &[Atomic]) -> String {
    let parts: Vec<String> = atomics.iter().map(ToString::to_string).collect();
    format!("{{ {} }}", parts.join(" "))
}
