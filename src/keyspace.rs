//! Keyspace files: schema, data and rules in one JSON document.
//!
//! ```json
//! {
//!   "schema": {
//!     "entities":   [{ "label": "person", "plays": ["friend"], "owns": ["name"] }],
//!     "relations":  [{ "label": "friendship", "roles": ["friend"] }],
//!     "attributes": [{ "label": "name", "value_type": "string" }]
//!   },
//!   "data": {
//!     "entities":  [{ "ref": "alice", "type": "person",
//!                     "has": [{ "type": "name", "value": "Alice" }] }],
//!     "relations": [{ "type": "friendship",
//!                     "players": [{ "role": "friend", "player": "alice" }] }]
//!   },
//!   "rules": [{ "label": "...", "when": { ... }, "then": { ... } }]
//! }
//! ```
//!
//! Things are referred to by their `ref` names inside the file; loading
//! assigns concept ids.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, Value, ValueType};
use crate::context::ReasoningContext;
use crate::error::{KeyspaceError, ReasonerResult};
use crate::rule::{Rule, RuleDefinition, check_unique_labels};
use crate::schema::Schema;
use crate::storage::MemoryGraph;

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyspaceFile {
    #[serde(default)]
    pub schema: SchemaSection,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSection {
    #[serde(default)]
    pub entities: Vec<TypeDeclaration>,
    #[serde(default)]
    pub relations: Vec<TypeDeclaration>,
    #[serde(default)]
    pub attributes: Vec<TypeDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeDeclaration {
    pub label: String,
    #[serde(default)]
    pub sup: Option<String>,
    /// Relations only.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Attributes only.
    #[serde(default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub plays: Vec<String>,
    #[serde(default)]
    pub owns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default)]
    pub entities: Vec<ThingDeclaration>,
    #[serde(default)]
    pub relations: Vec<ThingDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingDeclaration {
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub type_label: String,
    #[serde(default)]
    pub players: Vec<PlayerDeclaration>,
    #[serde(default)]
    pub has: Vec<AttributeDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDeclaration {
    pub role: String,
    pub player: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDeclaration {
    #[serde(rename = "type")]
    pub type_label: String,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Loaded keyspace
// ---------------------------------------------------------------------------

/// A loaded keyspace: stored data plus validated rules.
#[derive(Debug)]
pub struct Keyspace {
    graph: MemoryGraph,
    rules: Vec<Rule>,
    refs: BTreeMap<String, ConceptId>,
}

impl Keyspace {
    pub fn load(path: &Path) -> ReasonerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| KeyspaceError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let keyspace = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            things = keyspace.graph.len(),
            rules = keyspace.rules.len(),
            "keyspace loaded"
        );
        Ok(keyspace)
    }

    pub fn from_json(content: &str) -> ReasonerResult<Self> {
        let file: KeyspaceFile = serde_json::from_str(content).map_err(|e| KeyspaceError::Parse {
            message: e.to_string(),
        })?;
        Self::from_file(&file)
    }

    pub fn from_file(file: &KeyspaceFile) -> ReasonerResult<Self> {
        let schema = build_schema(&file.schema)?;
        let mut keyspace = Self {
            graph: MemoryGraph::new(schema),
            rules: Vec::with_capacity(file.rules.len()),
            refs: BTreeMap::new(),
        };
        for thing in &file.data.entities {
            let id = keyspace.graph.insert_entity(&thing.type_label)?;
            keyspace.attach(id, thing)?;
        }
        for thing in &file.data.relations {
            let players = thing
                .players
                .iter()
                .map(|p| Ok((p.role.as_str(), keyspace.lookup(&p.player)?)))
                .collect::<Result<Vec<_>, KeyspaceError>>()?;
            let id = keyspace.graph.insert_relation(&thing.type_label, &players)?;
            keyspace.attach(id, thing)?;
        }
        for definition in &file.rules {
            keyspace.rules.push(Rule::from_definition(definition)?);
        }
        check_unique_labels(&keyspace.rules)?;
        Ok(keyspace)
    }

    fn attach(&mut self, id: ConceptId, thing: &ThingDeclaration) -> Result<(), KeyspaceError> {
        for attribute in &thing.has {
            let value = self
                .graph
                .insert_attribute(&attribute.type_label, attribute.value.clone())?;
            self.graph.insert_ownership(id, value)?;
        }
        if let Some(reference) = &thing.reference {
            self.refs.insert(reference.clone(), id);
        }
        Ok(())
    }

    fn lookup(&self, reference: &str) -> Result<ConceptId, KeyspaceError> {
        self.concept(reference)
            .ok_or_else(|| KeyspaceError::UnknownConcept {
                reference: reference.to_string(),
            })
    }

    pub fn graph(&self) -> &MemoryGraph {
        &self.graph
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Concept id of a `ref` name from the file.
    pub fn concept(&self, reference: &str) -> Option<ConceptId> {
        self.refs.get(reference).copied()
    }

    /// `ref` name of a concept, if it had one.
    pub fn reference_of(&self, id: ConceptId) -> Option<&str> {
        self.refs
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }

    /// A reasoning context over this keyspace's data and rules.
    pub fn reasoning_context(&self) -> ReasonerResult<ReasoningContext<'_>> {
        ReasoningContext::new(&self.graph, &self.graph, &self.graph, self.rules.clone())
    }
}

fn build_schema(section: &SchemaSection) -> Result<Schema, KeyspaceError> {
    let mut schema = Schema::new();
    for decl in &section.entities {
        schema.define_entity(&decl.label, decl.sup.as_deref());
    }
    for decl in &section.relations {
        let roles: Vec<&str> = decl.roles.iter().map(String::as_str).collect();
        schema.define_relation(&decl.label, decl.sup.as_deref(), &roles);
    }
    for decl in &section.attributes {
        let value_type = decl.value_type.ok_or_else(|| KeyspaceError::Parse {
            message: format!("attribute type '{}' needs a value_type", decl.label),
        })?;
        schema.define_attribute(&decl.label, decl.sup.as_deref(), value_type);
    }
    let all = section
        .entities
        .iter()
        .chain(&section.relations)
        .chain(&section.attributes);
    for decl in all {
        let plays: Vec<&str> = decl.plays.iter().map(String::as_str).collect();
        let owns: Vec<&str> = decl.owns.iter().map(String::as_str).collect();
        schema.define_plays(&decl.label, &plays).define_owns(&decl.label, &owns);
    }
    schema.validate()?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonerError;

    const FRIENDS: &str = r#"{
        "schema": {
            "entities": [{ "label": "person", "plays": ["friend"], "owns": ["name"] }],
            "relations": [{ "label": "friendship", "roles": ["friend"] }],
            "attributes": [{ "label": "name", "value_type": "string" }]
        },
        "data": {
            "entities": [
                { "ref": "alice", "type": "person", "has": [{ "type": "name", "value": "Alice" }] },
                { "ref": "bob", "type": "person" }
            ],
            "relations": [
                { "type": "friendship",
                  "players": [{ "role": "friend", "player": "alice" },
                              { "role": "friend", "player": "bob" }] }
            ]
        }
    }"#;

    #[test]
    fn loads_schema_and_data() {
        let ks = Keyspace::from_json(FRIENDS).unwrap();
        // two people, one name, one friendship
        assert_eq!(ks.graph().len(), 4);
        let alice = ks.concept("alice").unwrap();
        assert_eq!(ks.reference_of(alice), Some("alice"));
        assert!(ks.rules().is_empty());
        assert!(ks.reasoning_context().is_ok());
    }

    #[test]
    fn unknown_player_reference_fails() {
        let broken = FRIENDS.replace("\"player\": \"bob\"", "\"player\": \"carol\"");
        let err = Keyspace::from_json(&broken).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::Keyspace(KeyspaceError::UnknownConcept { .. })
        ));
    }

    #[test]
    fn attribute_without_value_type_fails() {
        let broken = FRIENDS.replace(", \"value_type\": \"string\"", "");
        assert!(Keyspace::from_json(&broken).is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Keyspace::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ReasonerError::Keyspace(KeyspaceError::Parse { .. })));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("friends.json");
        std::fs::write(&path, FRIENDS).unwrap();
        let ks = Keyspace::load(&path).unwrap();
        assert!(ks.concept("bob").is_some());
        assert!(Keyspace::load(&dir.path().join("missing.json")).is_err());
    }
}
