//! Storage boundary: the traversal executor and an in-memory graph.
//!
//! Asserted facts only enter resolution through
//! [`TraversalExecutor::execute`]. [`MemoryGraph`] is the in-memory
//! implementation: things are petgraph nodes, role-player and ownership
//! links are edges, and a per-type index drives scans.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::answer::ConceptMap;
use crate::atom::{Atomic, HasAtom, IsaAtom, RelationAtom};
use crate::concept::{ConceptId, ConceptIdAllocator, Label, Value};
use crate::error::KeyspaceError;
use crate::pattern::Variable;
use crate::schema::{ConceptManager, Schema, TypeKind};
use crate::statistics::KeyspaceStatistics;

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, KeyspaceError>;

/// A physical plan: atomics to match against stored data, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalPlan {
    atomics: Vec<Atomic>,
}

impl TraversalPlan {
    pub fn new(atomics: Vec<Atomic>) -> Self {
        Self { atomics }
    }

    pub fn atomics(&self) -> &[Atomic] {
        &self.atomics
    }
}

/// Executes a plan over stored concepts.
///
/// Returns every binding of the plan's variables to asserted concepts that
/// satisfies all its atomics, each binding once.
pub trait TraversalExecutor {
    fn execute(&self, plan: &TraversalPlan) -> Box<dyn Iterator<Item = ConceptMap> + '_>;
}

// ---------------------------------------------------------------------------
// In-memory graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Thing {
    type_label: Label,
    node: NodeIndex,
    value: Option<Value>,
}

/// Edge payload: a relation's role player, or an owner's attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Link {
    Plays(Label),
    Has,
}

/// In-memory store of entities, relations and attributes over a [`Schema`].
#[derive(Debug)]
pub struct MemoryGraph {
    schema: Schema,
    ids: ConceptIdAllocator,
    graph: DiGraph<ConceptId, Link>,
    things: HashMap<ConceptId, Thing>,
    /// Direct type → instances, in insertion order.
    by_type: HashMap<Label, Vec<ConceptId>>,
    attributes: HashMap<(Label, Value), ConceptId>,
}

impl MemoryGraph {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            ids: ConceptIdAllocator::new(),
            graph: DiGraph::new(),
            things: HashMap::new(),
            by_type: HashMap::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of stored things.
    pub fn len(&self) -> usize {
        self.things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }

    pub fn type_of(&self, id: ConceptId) -> Option<&Label> {
        self.things.get(&id).map(|t| &t.type_label)
    }

    fn expect_kind(&self, type_label: &str, kind: TypeKind) -> StorageResult<Label> {
        let label = Label::from(type_label);
        match self.schema.type_kind(&label) {
            Some(k) if k == kind => Ok(label),
            _ => Err(KeyspaceError::UnknownType {
                label: type_label.to_string(),
            }),
        }
    }

    fn add_thing(&mut self, type_label: Label, value: Option<Value>) -> ConceptId {
        let id = self.ids.next_id();
        let node = self.graph.add_node(id);
        self.by_type.entry(type_label.clone()).or_default().push(id);
        self.things.insert(
            id,
            Thing {
                type_label,
                node,
                value,
            },
        );
        id
    }

    fn thing(&self, id: ConceptId) -> StorageResult<&Thing> {
        self.things.get(&id).ok_or_else(|| KeyspaceError::UnknownConcept {
            reference: id.to_string(),
        })
    }

    pub fn insert_entity(&mut self, type_label: &str) -> StorageResult<ConceptId> {
        let label = self.expect_kind(type_label, TypeKind::Entity)?;
        Ok(self.add_thing(label, None))
    }

    /// Insert an attribute. Attributes are unique per (type, value).
    pub fn insert_attribute(
        &mut self,
        type_label: &str,
        value: impl Into<Value>,
    ) -> StorageResult<ConceptId> {
        let label = self.expect_kind(type_label, TypeKind::Attribute)?;
        let value = value.into();
        if self.schema.value_type(&label) != Some(value.value_type()) {
            return Err(KeyspaceError::InvalidValue {
                type_label: type_label.to_string(),
                value: value.to_string(),
            });
        }
        if let Some(id) = self.attributes.get(&(label.clone(), value.clone())) {
            return Ok(*id);
        }
        let id = self.add_thing(label.clone(), Some(value.clone()));
        self.attributes.insert((label, value), id);
        Ok(id)
    }

    /// Insert a relation with its role players.
    pub fn insert_relation(
        &mut self,
        type_label: &str,
        players: &[(&str, ConceptId)],
    ) -> StorageResult<ConceptId> {
        let label = self.expect_kind(type_label, TypeKind::Relation)?;
        let roles = self.schema.roles_of(&label);
        let mut edges = Vec::with_capacity(players.len());
        for (role, player) in players {
            let role = Label::from(*role);
            let thing = self.thing(*player)?;
            if !roles.contains(&role) || !self.schema.plays(&thing.type_label, &role) {
                return Err(KeyspaceError::InvalidRole {
                    type_label: thing.type_label.to_string(),
                    role: role.to_string(),
                });
            }
            edges.push((role, thing.node));
        }
        let id = self.add_thing(label, None);
        let from = self.things[&id].node;
        for (role, to) in edges {
            self.graph.add_edge(from, to, Link::Plays(role));
        }
        Ok(id)
    }

    /// Attach an attribute to an owner.
    pub fn insert_ownership(&mut self, owner: ConceptId, attribute: ConceptId) -> StorageResult<()> {
        let owner_thing = self.thing(owner)?;
        let attr_thing = self.thing(attribute)?;
        if attr_thing.value.is_none()
            || !self
                .schema
                .can_own(&owner_thing.type_label, &attr_thing.type_label)
        {
            return Err(KeyspaceError::InvalidOwnership {
                type_label: owner_thing.type_label.to_string(),
                attribute: attr_thing.type_label.to_string(),
            });
        }
        let (from, to) = (owner_thing.node, attr_thing.node);
        if !self.graph.edges_connecting(from, to).any(|e| *e.weight() == Link::Has) {
            self.graph.add_edge(from, to, Link::Has);
        }
        Ok(())
    }

    /// Every instance of `label` or one of its subtypes.
    fn instances(&self, label: &Label) -> Vec<ConceptId> {
        self.schema
            .subtypes(label)
            .iter()
            .filter_map(|t| self.by_type.get(t))
            .flatten()
            .copied()
            .collect()
    }

    fn all_of_kind(&self, kind: TypeKind) -> Vec<ConceptId> {
        let mut out: Vec<ConceptId> = self
            .things
            .iter()
            .filter(|(_, t)| self.schema.type_kind(&t.type_label) == Some(kind))
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        out
    }

    fn is_instance_of(&self, id: ConceptId, label: &Label) -> bool {
        self.things
            .get(&id)
            .is_some_and(|t| self.schema.is_subtype(&t.type_label, label))
    }

    /// Role players of a stored relation.
    fn role_players(&self, relation: ConceptId) -> Vec<(Label, ConceptId)> {
        let Some(thing) = self.things.get(&relation) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(thing.node, Direction::Outgoing)
            .filter_map(|e| match e.weight() {
                Link::Plays(role) => Some((role.clone(), self.graph[e.target()])),
                Link::Has => None,
            })
            .collect()
    }

    /// Relations a concept plays a role in.
    fn relations_of(&self, player: ConceptId) -> Vec<ConceptId> {
        let Some(thing) = self.things.get(&player) else {
            return Vec::new();
        };
        let set: BTreeSet<ConceptId> = self
            .graph
            .edges_directed(thing.node, Direction::Incoming)
            .filter(|e| matches!(e.weight(), Link::Plays(_)))
            .map(|e| self.graph[e.source()])
            .collect();
        set.into_iter().collect()
    }

    fn owned(&self, id: ConceptId, direction: Direction) -> Vec<ConceptId> {
        let Some(thing) = self.things.get(&id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(thing.node, direction)
            .filter(|e| *e.weight() == Link::Has)
            .map(|e| match direction {
                Direction::Outgoing => self.graph[e.target()],
                Direction::Incoming => self.graph[e.source()],
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    fn extend(&self, atomic: &Atomic, partial: &ConceptMap) -> Vec<ConceptMap> {
        match atomic {
            Atomic::Isa(a) => self.match_isa(a, partial),
            Atomic::Relation(r) => self.match_relation(r, partial),
            Atomic::Has(h) => self.match_has(h, partial),
            _ => vec![partial.clone()],
        }
    }

    fn match_isa(&self, atom: &IsaAtom, partial: &ConceptMap) -> Vec<ConceptMap> {
        match partial.get(&atom.var) {
            Some(id) if self.is_instance_of(id, &atom.type_label) => vec![partial.clone()],
            Some(_) => Vec::new(),
            None => self
                .instances(&atom.type_label)
                .into_iter()
                .map(|id| partial.clone().with(atom.var.clone(), id))
                .collect(),
        }
    }

    fn match_relation(&self, atom: &RelationAtom, partial: &ConceptMap) -> Vec<ConceptMap> {
        let candidates = if let Some(id) = partial.get(&atom.var) {
            vec![id]
        } else if let Some(player) = atom.role_players.iter().find_map(|rp| partial.get(&rp.player)) {
            self.relations_of(player)
        } else if let Some(label) = &atom.type_label {
            self.instances(label)
        } else {
            self.all_of_kind(TypeKind::Relation)
        };

        let mut out = Vec::new();
        for relation in candidates {
            let typed = match &atom.type_label {
                Some(label) => self.is_instance_of(relation, label),
                None => self
                    .type_of(relation)
                    .is_some_and(|t| self.schema.type_kind(t) == Some(TypeKind::Relation)),
            };
            if !typed {
                continue;
            }
            let edges = self.role_players(relation);
            let start = partial.clone().with(atom.var.clone(), relation);
            let mut taken = vec![false; edges.len()];
            self.assign_role_players(atom, 0, &edges, &mut taken, start, &mut out);
        }
        out
    }

    fn assign_role_players(
        &self,
        atom: &RelationAtom,
        index: usize,
        edges: &[(Label, ConceptId)],
        taken: &mut [bool],
        current: ConceptMap,
        out: &mut Vec<ConceptMap>,
    ) {
        let Some(rp) = atom.role_players.get(index) else {
            out.push(current);
            return;
        };
        for (k, (role, player)) in edges.iter().enumerate() {
            if taken[k] {
                continue;
            }
            if let Some(wanted) = &rp.role
                && !self.schema.is_subtype(role, wanted)
            {
                continue;
            }
            let next = match current.get(&rp.player) {
                Some(bound) if bound != *player => continue,
                Some(_) => current.clone(),
                None => current.clone().with(rp.player.clone(), *player),
            };
            taken[k] = true;
            self.assign_role_players(atom, index + 1, edges, taken, next, out);
            taken[k] = false;
        }
    }

    fn match_has(&self, atom: &HasAtom, partial: &ConceptMap) -> Vec<ConceptMap> {
        let pairs: Vec<(ConceptId, ConceptId)> =
            match (partial.get(&atom.owner), partial.get(&atom.attribute)) {
                (Some(owner), _) => self
                    .owned(owner, Direction::Outgoing)
                    .into_iter()
                    .map(|a| (owner, a))
                    .collect(),
                (None, Some(attr)) => self
                    .owned(attr, Direction::Incoming)
                    .into_iter()
                    .map(|o| (o, attr))
                    .collect(),
                (None, None) => self
                    .instances(&atom.attribute_type)
                    .into_iter()
                    .flat_map(|attr| {
                        self.owned(attr, Direction::Incoming)
                            .into_iter()
                            .map(move |o| (o, attr))
                    })
                    .collect(),
            };
        pairs
            .into_iter()
            .filter(|(_, attr)| self.is_instance_of(*attr, &atom.attribute_type))
            .filter_map(|(owner, attr)| {
                let seeded = ConceptMap::from_pairs([
                    (atom.owner.clone(), owner),
                    (atom.attribute.clone(), attr),
                ]);
                partial.merge(&seeded)
            })
            .collect()
    }
}

/// Seed a binding from the plan's id predicates.
fn seed(atomics: &[Atomic]) -> Option<ConceptMap> {
    let mut seeded = ConceptMap::new();
    for atomic in atomics {
        if let Atomic::Id(p) = atomic {
            match seeded.get(&p.var) {
                Some(existing) if existing != p.id => return None,
                Some(_) => {}
                None => seeded = seeded.with(p.var.clone(), p.id),
            }
        }
    }
    Some(seeded)
}

impl TraversalExecutor for MemoryGraph {
    fn execute(&self, plan: &TraversalPlan) -> Box<dyn Iterator<Item = ConceptMap> + '_> {
        let Some(start) = seed(plan.atomics()) else {
            return Box::new(std::iter::empty());
        };
        // Seeded ids must exist in storage.
        if start.iter().any(|(_, id)| !self.things.contains_key(&id)) {
            return Box::new(std::iter::empty());
        }

        let selectable: Vec<&Atomic> = plan.atomics().iter().filter(|a| a.is_selectable()).collect();
        let predicates: Vec<Atomic> = plan
            .atomics()
            .iter()
            .filter(|a| a.is_predicate() && !matches!(a, Atomic::Id(_)))
            .cloned()
            .collect();

        let mut partials = vec![start];
        for atomic in selectable {
            partials = partials
                .iter()
                .flat_map(|p| self.extend(atomic, p))
                .filter(|p| predicates.iter().all(|pred| pred.holds(p, self) != Some(false)))
                .collect();
            if partials.is_empty() {
                break;
            }
        }

        let vars: BTreeSet<Variable> = plan.atomics().iter().flat_map(Atomic::variables).collect();
        let mut seen = HashSet::new();
        Box::new(partials.into_iter().filter(move |answer| {
            vars.iter().all(|v| answer.contains(v))
                && predicates.iter().all(|pred| pred.holds(answer, self) == Some(true))
                && seen.insert(answer.clone())
        }))
    }
}

impl ConceptManager for MemoryGraph {
    fn type_kind(&self, label: &Label) -> Option<TypeKind> {
        self.schema.type_kind(label)
    }

    fn is_role(&self, label: &Label) -> bool {
        self.schema.is_role(label)
    }

    fn is_subtype(&self, sub: &Label, sup: &Label) -> bool {
        self.schema.is_subtype(sub, sup)
    }

    fn supertypes(&self, label: &Label) -> Vec<Label> {
        self.schema.supertypes(label)
    }

    fn subtypes(&self, label: &Label) -> Vec<Label> {
        self.schema.subtypes(label)
    }

    fn relation_types_relating(&self, role: &Label) -> Vec<Label> {
        self.schema.relation_types_relating(role)
    }

    fn roles_of(&self, relation: &Label) -> Vec<Label> {
        self.schema.roles_of(relation)
    }

    fn plays(&self, type_label: &Label, role: &Label) -> bool {
        self.schema.plays(type_label, role)
    }

    fn value_of(&self, id: ConceptId) -> Option<Value> {
        self.things.get(&id)?.value.clone()
    }
}

impl KeyspaceStatistics for MemoryGraph {
    fn instance_count(&self, label: &Label) -> Option<u64> {
        self.schema.type_kind(label)?;
        Some(self.instances(label).len() as u64)
    }
}
