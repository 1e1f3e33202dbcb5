//! Schema: the type hierarchy the reasoner consults.
//!
//! The reasoner only talks to the schema through [`ConceptManager`]:
//! subtype checks for rule pruning and unification, role lookups for type
//! inference, and attribute values for comparison predicates. [`Schema`] is
//! the in-memory implementation, built with single inheritance for types
//! and roles.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, Label, Value, ValueType};
use crate::error::KeyspaceError;

/// Kind of a schema type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Entity,
    Relation,
    Attribute,
}

/// Schema and concept queries needed by type inference, rule pruning and
/// predicate evaluation.
pub trait ConceptManager {
    fn type_kind(&self, label: &Label) -> Option<TypeKind>;

    fn is_role(&self, label: &Label) -> bool;

    /// Reflexive, transitive subtyping over types and over roles.
    fn is_subtype(&self, sub: &Label, sup: &Label) -> bool;

    /// The label itself followed by its ancestors, nearest first.
    fn supertypes(&self, label: &Label) -> Vec<Label>;

    /// The label itself and every transitive subtype.
    fn subtypes(&self, label: &Label) -> Vec<Label>;

    /// Relation types that relate `role`, directly or by inheritance.
    fn relation_types_relating(&self, role: &Label) -> Vec<Label>;

    /// Roles a relation type relates, including inherited roles.
    fn roles_of(&self, relation: &Label) -> Vec<Label>;

    /// Whether instances of `type_label` may play `role`.
    fn plays(&self, type_label: &Label, role: &Label) -> bool;

    /// The value of an attribute instance.
    fn value_of(&self, _id: ConceptId) -> Option<Value> {
        None
    }

    fn is_known(&self, label: &Label) -> bool {
        self.type_kind(label).is_some() || self.is_role(label)
    }
}

// ---------------------------------------------------------------------------
// In-memory schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TypeDef {
    kind: TypeKind,
    sup: Option<Label>,
    relates: Vec<Label>,
    plays: BTreeSet<Label>,
    owns: BTreeSet<Label>,
    value_type: Option<ValueType>,
}

impl TypeDef {
    fn new(kind: TypeKind, sup: Option<&str>) -> Self {
        Self {
            kind,
            sup: sup.map(Label::from),
            relates: Vec::new(),
            plays: BTreeSet::new(),
            owns: BTreeSet::new(),
            value_type: None,
        }
    }
}

#[derive(Debug, Clone)]
struct RoleDef {
    relation: Label,
    sup: Option<Label>,
}

/// Types, roles and their hierarchies.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<Label, TypeDef>,
    roles: HashMap<Label, RoleDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_entity(&mut self, label: &str, sup: Option<&str>) -> &mut Self {
        self.types
            .insert(label.into(), TypeDef::new(TypeKind::Entity, sup));
        self
    }

    /// Define a relation type and the roles it relates. Roles of the
    /// supertype are inherited.
    pub fn define_relation(&mut self, label: &str, sup: Option<&str>, roles: &[&str]) -> &mut Self {
        self.types
            .insert(label.into(), TypeDef::new(TypeKind::Relation, sup));
        for role in roles {
            self.define_role(label, role, None);
        }
        self
    }

    /// Add a role to a relation, optionally specializing an inherited role.
    pub fn define_role(&mut self, relation: &str, role: &str, sup: Option<&str>) -> &mut Self {
        if let Some(def) = self.types.get_mut(&Label::from(relation)) {
            def.relates.push(role.into());
        }
        self.roles.insert(
            role.into(),
            RoleDef {
                relation: relation.into(),
                sup: sup.map(Label::from),
            },
        );
        self
    }

    pub fn define_attribute(
        &mut self,
        label: &str,
        sup: Option<&str>,
        value_type: ValueType,
    ) -> &mut Self {
        let mut def = TypeDef::new(TypeKind::Attribute, sup);
        def.value_type = Some(value_type);
        self.types.insert(label.into(), def);
        self
    }

    pub fn define_plays(&mut self, type_label: &str, roles: &[&str]) -> &mut Self {
        if let Some(def) = self.types.get_mut(&Label::from(type_label)) {
            def.plays.extend(roles.iter().map(|r| Label::from(*r)));
        }
        self
    }

    pub fn define_owns(&mut self, type_label: &str, attributes: &[&str]) -> &mut Self {
        if let Some(def) = self.types.get_mut(&Label::from(type_label)) {
            def.owns.extend(attributes.iter().map(|a| Label::from(*a)));
        }
        self
    }

    pub fn value_type(&self, attribute: &Label) -> Option<ValueType> {
        self.types.get(attribute)?.value_type
    }

    /// Whether instances of `type_label` may own attributes of `attribute`.
    pub fn can_own(&self, type_label: &Label, attribute: &Label) -> bool {
        self.supertypes(type_label).iter().any(|t| {
            self.types.get(t).is_some_and(|def| {
                def.owns.iter().any(|owned| self.is_subtype(attribute, owned))
            })
        })
    }

    /// Relation type that declared a role.
    pub fn relation_of_role(&self, role: &Label) -> Option<&Label> {
        self.roles.get(role).map(|def| &def.relation)
    }

    pub fn type_labels(&self) -> impl Iterator<Item = &Label> {
        self.types.keys()
    }

    /// Check that every referenced supertype, role and attribute exists.
    pub fn validate(&self) -> Result<(), KeyspaceError> {
        let unknown = |label: &Label| KeyspaceError::UnknownType {
            label: label.to_string(),
        };
        for (label, def) in &self.types {
            if let Some(sup) = &def.sup {
                match self.types.get(sup) {
                    Some(s) if s.kind == def.kind => {}
                    _ => return Err(unknown(sup)),
                }
            }
            if let Some(role) = def.plays.iter().find(|r| !self.roles.contains_key(*r)) {
                return Err(KeyspaceError::InvalidRole {
                    type_label: label.to_string(),
                    role: role.to_string(),
                });
            }
            if let Some(attr) = def.owns.iter().find(|a| {
                self.types.get(*a).map(|d| d.kind) != Some(TypeKind::Attribute)
            }) {
                return Err(unknown(attr));
            }
        }
        for def in self.roles.values() {
            if let Some(sup) = &def.sup
                && !self.roles.contains_key(sup)
            {
                return Err(unknown(sup));
            }
        }
        Ok(())
    }

    fn sup_of(&self, label: &Label) -> Option<&Label> {
        match self.types.get(label) {
            Some(def) => def.sup.as_ref(),
            None => self.roles.get(label)?.sup.as_ref(),
        }
    }
}

impl ConceptManager for Schema {
    fn type_kind(&self, label: &Label) -> Option<TypeKind> {
        self.types.get(label).map(|def| def.kind)
    }

    fn is_role(&self, label: &Label) -> bool {
        self.roles.contains_key(label)
    }

    fn is_subtype(&self, sub: &Label, sup: &Label) -> bool {
        self.supertypes(sub).iter().any(|l| l == sup)
    }

    fn supertypes(&self, label: &Label) -> Vec<Label> {
        let mut out = vec![label.clone()];
        let mut current = label;
        while let Some(sup) = self.sup_of(current) {
            // Guard against cyclic `sup` declarations.
            if out.contains(sup) {
                break;
            }
            out.push(sup.clone());
            current = sup;
        }
        out
    }

    fn subtypes(&self, label: &Label) -> Vec<Label> {
        let mut out = vec![label.clone()];
        let candidates = self.types.keys().chain(self.roles.keys());
        let mut rest: Vec<Label> = candidates
            .filter(|l| *l != label && self.is_subtype(l, label))
            .cloned()
            .collect();
        rest.sort();
        out.extend(rest);
        out
    }

    fn relation_types_relating(&self, role: &Label) -> Vec<Label> {
        let mut out: Vec<Label> = self
            .types
            .iter()
            .filter(|(_, def)| def.kind == TypeKind::Relation)
            .map(|(label, _)| label)
            .filter(|label| self.roles_of(label).contains(role))
            .cloned()
            .collect();
        out.sort();
        out
    }

    fn roles_of(&self, relation: &Label) -> Vec<Label> {
        let mut out = BTreeSet::new();
        for t in self.supertypes(relation) {
            if let Some(def) = self.types.get(&t) {
                out.extend(def.relates.iter().cloned());
            }
        }
        out.into_iter().collect()
    }

    fn plays(&self, type_label: &Label, role: &Label) -> bool {
        self.supertypes(type_label).iter().any(|t| {
            self.types.get(t).is_some_and(|def| {
                def.plays.iter().any(|played| self.is_subtype(role, played))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.define_entity("animal", None)
            .define_entity("dog", Some("animal"))
            .define_entity("puppy", Some("dog"))
            .define_relation("ownership", None, &["owner", "pet"])
            .define_relation("breeding", Some("ownership"), &[])
            .define_role("breeding", "breeder", Some("owner"))
            .define_attribute("name", None, ValueType::String)
            .define_plays("dog", &["pet"])
            .define_owns("animal", &["name"]);
        s
    }

    #[test]
    fn subtyping_is_reflexive_and_transitive() {
        let s = schema();
        let puppy = Label::from("puppy");
        let animal = Label::from("animal");
        assert!(s.is_subtype(&puppy, &puppy));
        assert!(s.is_subtype(&puppy, &animal));
        assert!(!s.is_subtype(&animal, &puppy));
        assert_eq!(s.supertypes(&puppy).len(), 3);
        assert_eq!(s.subtypes(&animal).len(), 3);
    }

    #[test]
    fn roles_are_inherited_by_subrelations() {
        let s = schema();
        let roles = s.roles_of(&Label::from("breeding"));
        assert!(roles.contains(&Label::from("pet")));
        assert!(roles.contains(&Label::from("breeder")));
        let relating = s.relation_types_relating(&Label::from("pet"));
        assert_eq!(relating, vec![Label::from("breeding"), Label::from("ownership")]);
        assert!(s.is_subtype(&Label::from("breeder"), &Label::from("owner")));
    }

    #[test]
    fn plays_and_owns_follow_inheritance() {
        let s = schema();
        assert!(s.plays(&Label::from("puppy"), &Label::from("pet")));
        assert!(!s.plays(&Label::from("animal"), &Label::from("pet")));
        assert!(s.can_own(&Label::from("puppy"), &Label::from("name")));
    }

    #[test]
    fn validate_rejects_unknown_supertype() {
        let mut s = schema();
        assert!(s.validate().is_ok());
        s.define_entity("cat", Some("feline"));
        assert!(matches!(
            s.validate(),
            Err(KeyspaceError::UnknownType { .. })
        ));
    }
}
