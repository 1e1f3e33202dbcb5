//! Inference rules: `when` pattern implies `then` head.
//!
//! A rule concludes exactly one fact shape: a relation (typed, every role
//! named) or an ownership of an attribute the body binds. Rule sets are
//! checked for stratification: negation may not sit on a recursive cycle.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::atom::Atomic;
use crate::concept::Label;
use crate::error::RuleError;
use crate::pattern::{Pattern, Statement, Variable, VariableGenerator};
use crate::schema::ConceptManager;

/// Serialized form of a rule, as found in keyspace files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub label: Label,
    pub when: Pattern,
    pub then: Pattern,
}

/// A validated inference rule.
#[derive(Debug, Clone)]
pub struct Rule {
    label: Label,
    when: Pattern,
    then: Pattern,
    head: Atomic,
}

/// A label referenced from a rule body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BodyReference {
    /// `None` for relations without a type.
    label: Option<Label>,
    relation: bool,
    negated: bool,
}

impl Rule {
    pub fn new(label: impl Into<Label>, when: Pattern, then: Pattern) -> Result<Rule, RuleError> {
        let label = label.into();
        let name = label.to_string();

        let branches = when.dnf();
        if branches.is_empty() || branches.iter().any(Vec::is_empty) {
            return Err(RuleError::EmptyBody { rule: name });
        }

        let statement = single_statement(&then).ok_or_else(|| RuleError::InvalidHead {
            rule: name.clone(),
            message: "the conclusion must be a single statement".into(),
        })?;
        let invalid = |message: &str| RuleError::InvalidHead {
            rule: name.clone(),
            message: message.to_string(),
        };
        match statement {
            Statement::Relation {
                type_label,
                players,
                ..
            } => {
                if type_label.is_none() {
                    return Err(invalid("a concluded relation needs a type"));
                }
                if players.is_empty() || players.iter().any(|rp| rp.role.is_none()) {
                    return Err(invalid("every role of a concluded relation must be named"));
                }
            }
            Statement::Has {
                attribute, value, ..
            } => {
                if attribute.is_none() || value.is_some() {
                    return Err(invalid(
                        "a concluded ownership must reference an attribute variable",
                    ));
                }
            }
            _ => return Err(invalid("only relations and ownerships can be concluded")),
        }

        let mut generator = VariableGenerator::avoiding(&Pattern::and([when.clone(), then.clone()]));
        let mut atomics = Atomic::from_statement(statement, &mut generator);
        let head = atomics.remove(0);

        // Every head variable but the concluded relation itself must be bound
        // by every positive branch of the body.
        let relation_var = match &head {
            Atomic::Relation(r) => Some(r.var.clone()),
            _ => None,
        };
        for branch in &branches {
            let bound: BTreeSet<Variable> = branch
                .iter()
                .filter(|p| !matches!(p, Pattern::Negation(_)))
                .flat_map(Pattern::variables)
                .collect();
            if let Some(var) = head
                .variables()
                .into_iter()
                .filter(|v| Some(v) != relation_var.as_ref())
                .find(|v| !bound.contains(v))
            {
                return Err(RuleError::UnboundHeadVariable {
                    rule: name,
                    variable: var.to_string(),
                });
            }
        }

        Ok(Rule {
            label,
            when,
            then,
            head,
        })
    }

    pub fn from_definition(def: &RuleDefinition) -> Result<Rule, RuleError> {
        Rule::new(def.label.clone(), def.when.clone(), def.then.clone())
    }

    pub fn definition(&self) -> RuleDefinition {
        RuleDefinition {
            label: self.label.clone(),
            when: self.when.clone(),
            then: self.then.clone(),
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn when(&self) -> &Pattern {
        &self.when
    }

    pub fn then(&self) -> &Pattern {
        &self.then
    }

    /// The single atom this rule concludes.
    pub fn head(&self) -> &Atomic {
        &self.head
    }

    /// The type or attribute type the head concludes.
    pub fn head_label(&self) -> Option<&Label> {
        self.head.label()
    }

    /// Every schema label mentioned by the rule.
    pub fn labels(&self) -> BTreeSet<Label> {
        let mut out: BTreeSet<Label> = self.body_references().into_iter().flat_map(|r| r.label).collect();
        out.extend(self.head.label().cloned());
        let mut roles = Vec::new();
        collect_roles(&self.when, &mut roles);
        collect_roles(&self.then, &mut roles);
        out.extend(roles);
        out
    }

    fn body_references(&self) -> Vec<BodyReference> {
        let mut out = Vec::new();
        collect_references(&self.when, false, &mut out);
        out
    }

    /// Whether this rule's head can produce facts the reference reads.
    fn feeds(&self, reference: &BodyReference, concepts: &dyn ConceptManager) -> bool {
        let Some(head_label) = self.head_label() else {
            return false;
        };
        match &reference.label {
            None => reference.relation && matches!(self.head, Atomic::Relation(_)),
            Some(label) => {
                concepts.is_subtype(head_label, label) || concepts.is_subtype(label, head_label)
            }
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule {}: when {} then {}", self.label, self.when, self.then)
    }
}

fn single_statement(pattern: &Pattern) -> Option<&Statement> {
    match pattern {
        Pattern::Statement(s) => Some(s),
        Pattern::Conjunction(items) if items.len() == 1 => single_statement(&items[0]),
        _ => None,
    }
}

fn collect_references(pattern: &Pattern, negated: bool, out: &mut Vec<BodyReference>) {
    match pattern {
        Pattern::Conjunction(items) | Pattern::Disjunction(items) => {
            for item in items {
                collect_references(item, negated, out);
            }
        }
        Pattern::Negation(inner) => collect_references(inner, true, out),
        Pattern::Statement(s) => {
            let (label, relation) = match s {
                Statement::Isa { type_label, .. } => (Some(type_label.clone()), false),
                Statement::Relation { type_label, .. } => (type_label.clone(), true),
                Statement::Has { attribute_type, .. } => (Some(attribute_type.clone()), false),
                _ => return,
            };
            out.push(BodyReference {
                label,
                relation,
                negated,
            });
        }
    }
}

fn collect_roles(pattern: &Pattern, out: &mut Vec<Label>) {
    match pattern {
        Pattern::Conjunction(items) | Pattern::Disjunction(items) => {
            for item in items {
                collect_roles(item, out);
            }
        }
        Pattern::Negation(inner) => collect_roles(inner, out),
        Pattern::Statement(Statement::Relation { players, .. }) => {
            out.extend(players.iter().filter_map(|rp| rp.role.clone()));
        }
        Pattern::Statement(_) => {}
    }
}

/// Reject rule sets in which two rules share a label.
pub fn check_unique_labels(rules: &[Rule]) -> Result<(), RuleError> {
    let mut seen = BTreeSet::new();
    for rule in rules {
        if !seen.insert(&rule.label) {
            return Err(RuleError::DuplicateLabel {
                rule: rule.label.to_string(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rule dependency graph
// ---------------------------------------------------------------------------

/// Dependency graph between rules: an edge `a -> b` means `b`'s body reads
/// what `a` concludes. Edge weights mark negated dependencies.
pub struct RuleGraph<'r> {
    graph: DiGraph<&'r Rule, bool>,
    nodes: HashMap<Label, NodeIndex>,
}

impl<'r> RuleGraph<'r> {
    pub fn build(rules: &'r [Rule], concepts: &dyn ConceptManager) -> Self {
        let mut graph = DiGraph::new();
        let nodes: HashMap<Label, NodeIndex> = rules
            .iter()
            .map(|r| (r.label.clone(), graph.add_node(r)))
            .collect();
        for reader in rules {
            for reference in reader.body_references() {
                for producer in rules.iter().filter(|p| p.feeds(&reference, concepts)) {
                    graph.add_edge(
                        nodes[&producer.label],
                        nodes[&reader.label],
                        reference.negated,
                    );
                }
            }
        }
        Self { graph, nodes }
    }

    /// Whether a rule can (transitively) depend on itself.
    pub fn is_recursive(&self, label: &Label) -> bool {
        let Some(&node) = self.nodes.get(label) else {
            return false;
        };
        tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| scc.contains(&node))
            .is_some_and(|scc| scc.len() > 1 || self.graph.contains_edge(node, node))
    }

    /// Reject negation inside a strongly connected component.
    pub fn check_stratified(&self) -> Result<(), RuleError> {
        for scc in tarjan_scc(&self.graph) {
            for &a in &scc {
                for edge in self.graph.edges(a) {
                    if *edge.weight() && scc.contains(&edge.target()) {
                        let reader = self.graph[edge.target()];
                        let producer = self.graph[a];
                        return Err(RuleError::NotStratifiable {
                            rule: reader.label.to_string(),
                            label: producer
                                .head_label()
                                .map_or_else(|| producer.label.to_string(), ToString::to_string),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ValueType;
    use crate::schema::Schema;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.define_entity("node", None)
            .define_relation("edge", None, &["from", "to"])
            .define_relation("path", None, &["start", "end"])
            .define_relation("blocked", None, &["start", "end"])
            .define_attribute("name", None, ValueType::String)
            .define_plays("node", &["from", "to", "start", "end"])
            .define_owns("node", &["name"]);
        s
    }

    fn path_base() -> Rule {
        Rule::new(
            "path-base",
            Pattern::rel("edge", &[("from", "x"), ("to", "y")]),
            Pattern::rel("path", &[("start", "x"), ("end", "y")]),
        )
        .unwrap()
    }

    fn path_step() -> Rule {
        Rule::new(
            "path-step",
            Pattern::and([
                Pattern::rel("path", &[("start", "x"), ("end", "y")]),
                Pattern::rel("edge", &[("from", "y"), ("to", "z")]),
            ]),
            Pattern::rel("path", &[("start", "x"), ("end", "z")]),
        )
        .unwrap()
    }

    #[test]
    fn valid_rule_exposes_its_head() {
        let rule = path_base();
        assert_eq!(rule.head_label(), Some(&Label::from("path")));
        assert!(matches!(rule.head(), Atomic::Relation(_)));
        assert!(rule.labels().contains(&Label::from("start")));
    }

    #[test]
    fn unbound_head_variable_is_rejected() {
        let err = Rule::new(
            "bad",
            Pattern::rel("edge", &[("from", "x"), ("to", "y")]),
            Pattern::rel("path", &[("start", "x"), ("end", "w")]),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::UnboundHeadVariable { .. }));
    }

    #[test]
    fn negated_binding_does_not_count() {
        let err = Rule::new(
            "bad",
            Pattern::and([
                Pattern::isa("x", "node"),
                Pattern::not(Pattern::isa("y", "node")),
            ]),
            Pattern::rel("path", &[("start", "x"), ("end", "y")]),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::UnboundHeadVariable { .. }));
    }

    #[test]
    fn invalid_heads_are_rejected() {
        let body = Pattern::isa("x", "node");
        let isa = Rule::new("isa", body.clone(), Pattern::isa("x", "node"));
        assert!(matches!(isa, Err(RuleError::InvalidHead { .. })));

        let untyped = Rule::new(
            "untyped",
            body.clone(),
            Pattern::relation().role("start", "x").into(),
        );
        assert!(matches!(untyped, Err(RuleError::InvalidHead { .. })));

        let constant = Rule::new("constant", body.clone(), Pattern::has_value("x", "name", "n"));
        assert!(matches!(constant, Err(RuleError::InvalidHead { .. })));

        let two = Rule::new(
            "two",
            body,
            Pattern::and([Pattern::isa("x", "node"), Pattern::isa("x", "node")]),
        );
        assert!(matches!(two, Err(RuleError::InvalidHead { .. })));
    }

    #[test]
    fn empty_body_is_rejected() {
        let err = Rule::new(
            "empty",
            Pattern::Conjunction(Vec::new()),
            Pattern::rel("path", &[("start", "x"), ("end", "y")]),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::EmptyBody { .. }));
    }

    #[test]
    fn recursion_is_detected() {
        let s = schema();
        let rules = vec![path_base(), path_step()];
        let graph = RuleGraph::build(&rules, &s);
        assert!(graph.is_recursive(&Label::from("path-step")));
        assert!(!graph.is_recursive(&Label::from("path-base")));
        assert!(graph.check_stratified().is_ok());
    }

    #[test]
    fn negation_through_recursion_is_not_stratifiable() {
        let s = schema();
        let a = Rule::new(
            "a",
            Pattern::and([
                Pattern::rel("edge", &[("from", "x"), ("to", "y")]),
                Pattern::not(Pattern::rel("blocked", &[("start", "x"), ("end", "y")])),
            ]),
            Pattern::rel("path", &[("start", "x"), ("end", "y")]),
        )
        .unwrap();
        let b = Rule::new(
            "b",
            Pattern::rel("path", &[("start", "x"), ("end", "y")]),
            Pattern::rel("blocked", &[("start", "x"), ("end", "y")]),
        )
        .unwrap();
        let rules = vec![a, b];
        let graph = RuleGraph::build(&rules, &s);
        assert!(matches!(
            graph.check_stratified(),
            Err(RuleError::NotStratifiable { .. })
        ));
    }

    #[test]
    fn definitions_round_trip_through_json() {
        let def = path_step().definition();
        let json = serde_json::to_string(&def).unwrap();
        let back: RuleDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(Rule::from_definition(&back).unwrap().label(), &Label::from("path-step"));
    }
}
