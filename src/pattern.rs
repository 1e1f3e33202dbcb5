//! Query patterns: the abstract syntax the reasoner consumes.
//!
//! Patterns are produced by an external parser (or by the builder helpers
//! here) and are immutable. A [`Pattern`] is a conjunction, disjunction,
//! negation or a leaf [`Statement`]. Variables are opaque named placeholders;
//! names starting with `_` are reserved for anonymous variables that never
//! appear in answers returned to the caller.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, Label, Value};

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A named placeholder. Equality is by name; scope is the enclosing query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable(String);

impl Variable {
    /// Create a variable. A leading `$` is stripped.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self(name.strip_prefix('$').unwrap_or(name).to_string())
    }

    /// An anonymous variable with the given index.
    pub fn anonymous(index: usize) -> Self {
        Self(format!("_{index}"))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Anonymous variables are generated for unnamed relations and attributes.
    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with('_')
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl From<&str> for Variable {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Hands out anonymous variables that are unique within one query.
#[derive(Debug, Default)]
pub struct VariableGenerator {
    next: usize,
}

impl VariableGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start after every anonymous variable already used by `pattern`.
    pub fn avoiding(pattern: &Pattern) -> Self {
        let next = pattern
            .variables()
            .iter()
            .filter_map(|v| v.name().strip_prefix('_')?.parse::<usize>().ok())
            .max()
            .map_or(0, |m| m + 1);
        Self { next }
    }

    pub fn fresh(&mut self) -> Variable {
        let v = Variable::anonymous(self.next);
        self.next += 1;
        v
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// A role player inside a relation: `contained: $x`. A missing role matches
/// any role of the relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RolePlayer {
    #[serde(default)]
    pub role: Option<Label>,
    pub player: Variable,
}

impl RolePlayer {
    pub fn new(role: Option<Label>, player: Variable) -> Self {
        Self { role, player }
    }
}

impl std::fmt::Display for RolePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.role {
            Some(role) => write!(f, "{role}: {}", self.player),
            None => write!(f, "{}", self.player),
        }
    }
}

/// Value comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Comparator {
    /// Evaluate `lhs <op> rhs`. Incomparable values never satisfy anything.
    pub fn test(self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering::*;
        if let Comparator::Contains = self {
            return match (lhs, rhs) {
                (Value::String(l), Value::String(r)) => l.contains(r.as_str()),
                _ => false,
            };
        }
        let Some(ord) = lhs.partial_compare(rhs) else {
            return false;
        };
        match self {
            Comparator::Eq => ord == Equal,
            Comparator::Neq => ord != Equal,
            Comparator::Gt => ord == Greater,
            Comparator::Gte => ord != Less,
            Comparator::Lt => ord == Less,
            Comparator::Lte => ord != Greater,
            Comparator::Contains => false,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Neq => "!==",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Contains => "contains",
        }
    }
}

/// A leaf property constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// `$x isa person;`
    Isa {
        var: Variable,
        #[serde(rename = "type")]
        type_label: Label,
    },
    /// `$r (contained: $x, container: $y) isa contains;`
    Relation {
        #[serde(default)]
        var: Option<Variable>,
        #[serde(default, rename = "type")]
        type_label: Option<Label>,
        players: Vec<RolePlayer>,
    },
    /// `$x has name $n;` or `$x has name "Alice";`
    Has {
        owner: Variable,
        #[serde(rename = "type")]
        attribute_type: Label,
        #[serde(default)]
        attribute: Option<Variable>,
        #[serde(default)]
        value: Option<Value>,
    },
    /// `$n > 10;`
    Compare {
        var: Variable,
        comparator: Comparator,
        value: Value,
    },
    /// `$x id V123;`
    Id { var: Variable, id: ConceptId },
    /// `$x != $y;`
    Neq { left: Variable, right: Variable },
}

impl Statement {
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = BTreeSet::new();
        match self {
            Statement::Isa { var, .. } => {
                vars.insert(var.clone());
            }
            Statement::Relation { var, players, .. } => {
                vars.extend(var.iter().cloned());
                vars.extend(players.iter().map(|rp| rp.player.clone()));
            }
            Statement::Has {
                owner, attribute, ..
            } => {
                vars.insert(owner.clone());
                vars.extend(attribute.iter().cloned());
            }
            Statement::Compare { var, .. } | Statement::Id { var, .. } => {
                vars.insert(var.clone());
            }
            Statement::Neq { left, right } => {
                vars.insert(left.clone());
                vars.insert(right.clone());
            }
        }
        vars
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Isa { var, type_label } => write!(f, "{var} isa {type_label};"),
            Statement::Relation {
                var,
                type_label,
                players,
            } => {
                if let Some(var) = var {
                    write!(f, "{var} ")?;
                }
                let players: Vec<String> = players.iter().map(ToString::to_string).collect();
                write!(f, "({})", players.join(", "))?;
                if let Some(t) = type_label {
                    write!(f, " isa {t}")?;
                }
                f.write_str(";")
            }
            Statement::Has {
                owner,
                attribute_type,
                attribute,
                value,
            } => {
                write!(f, "{owner} has {attribute_type}")?;
                if let Some(a) = attribute {
                    write!(f, " {a}")?;
                }
                if let Some(v) = value {
                    write!(f, " {v}")?;
                }
                f.write_str(";")
            }
            Statement::Compare {
                var,
                comparator,
                value,
            } => write!(f, "{var} {} {value};", comparator.symbol()),
            Statement::Id { var, id } => write!(f, "{var} id {id};"),
            Statement::Neq { left, right } => write!(f, "{left} != {right};"),
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// An abstract syntax node: conjunction, disjunction, negation or leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    #[serde(rename = "and")]
    Conjunction(Vec<Pattern>),
    #[serde(rename = "or")]
    Disjunction(Vec<Pattern>),
    #[serde(rename = "not")]
    Negation(Box<Pattern>),
    #[serde(untagged)]
    Statement(Statement),
}

impl Pattern {
    pub fn and(items: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::Conjunction(items.into_iter().collect())
    }

    pub fn or(items: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::Disjunction(items.into_iter().collect())
    }

    pub fn not(pattern: Pattern) -> Self {
        Pattern::Negation(Box::new(pattern))
    }

    pub fn isa(var: &str, type_label: &str) -> Self {
        Pattern::Statement(Statement::Isa {
            var: Variable::new(var),
            type_label: Label::from(type_label),
        })
    }

    /// An anonymous relation with every role named: `(role: $p, ...) isa type;`.
    pub fn rel(type_label: &str, players: &[(&str, &str)]) -> Self {
        players
            .iter()
            .fold(RelationBuilder::new().isa(type_label), |b, (role, player)| {
                b.role(role, player)
            })
            .into()
    }

    /// Start building a relation statement.
    pub fn relation() -> RelationBuilder {
        RelationBuilder::new()
    }

    pub fn has(owner: &str, attribute_type: &str, attribute: &str) -> Self {
        Pattern::Statement(Statement::Has {
            owner: Variable::new(owner),
            attribute_type: Label::from(attribute_type),
            attribute: Some(Variable::new(attribute)),
            value: None,
        })
    }

    pub fn has_value(owner: &str, attribute_type: &str, value: impl Into<Value>) -> Self {
        Pattern::Statement(Statement::Has {
            owner: Variable::new(owner),
            attribute_type: Label::from(attribute_type),
            attribute: None,
            value: Some(value.into()),
        })
    }

    pub fn compare(var: &str, comparator: Comparator, value: impl Into<Value>) -> Self {
        Pattern::Statement(Statement::Compare {
            var: Variable::new(var),
            comparator,
            value: value.into(),
        })
    }

    pub fn id(var: &str, id: ConceptId) -> Self {
        Pattern::Statement(Statement::Id {
            var: Variable::new(var),
            id,
        })
    }

    pub fn neq(left: &str, right: &str) -> Self {
        Pattern::Statement(Statement::Neq {
            left: Variable::new(left),
            right: Variable::new(right),
        })
    }

    /// All variables mentioned anywhere in the pattern, including inside negations.
    pub fn variables(&self) -> BTreeSet<Variable> {
        match self {
            Pattern::Conjunction(items) | Pattern::Disjunction(items) => {
                items.iter().flat_map(Pattern::variables).collect()
            }
            Pattern::Negation(inner) => inner.variables(),
            Pattern::Statement(s) => s.variables(),
        }
    }

    /// Variables visible to the caller: named, and not only inside a negation.
    pub fn named_variables(&self) -> BTreeSet<Variable> {
        match self {
            Pattern::Conjunction(items) | Pattern::Disjunction(items) => {
                items.iter().flat_map(Pattern::named_variables).collect()
            }
            Pattern::Negation(_) => BTreeSet::new(),
            Pattern::Statement(s) => s
                .variables()
                .into_iter()
                .filter(|v| !v.is_anonymous())
                .collect(),
        }
    }

    /// Disjunctive normal form: a list of branches, each a list of leaves
    /// (statements and negations). Negated blocks are kept intact.
    pub fn dnf(&self) -> Vec<Vec<Pattern>> {
        match self {
            Pattern::Statement(_) | Pattern::Negation(_) => vec![vec![self.clone()]],
            Pattern::Disjunction(items) => items.iter().flat_map(Pattern::dnf).collect(),
            Pattern::Conjunction(items) => {
                let mut branches: Vec<Vec<Pattern>> = vec![Vec::new()];
                for item in items {
                    let item_branches = item.dnf();
                    let mut next = Vec::with_capacity(branches.len() * item_branches.len());
                    for prefix in &branches {
                        for suffix in &item_branches {
                            let mut branch = prefix.clone();
                            branch.extend(suffix.iter().cloned());
                            next.push(branch);
                        }
                    }
                    branches = next;
                }
                branches
            }
        }
    }
}

impl From<Statement> for Pattern {
    fn from(s: Statement) -> Self {
        Pattern::Statement(s)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Conjunction(items) => {
                f.write_str("{ ")?;
                for item in items {
                    write!(f, "{item} ")?;
                }
                f.write_str("};")
            }
            Pattern::Disjunction(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" or "))
            }
            Pattern::Negation(inner) => write!(f, "not {inner}"),
            Pattern::Statement(s) => write!(f, "{s}"),
        }
    }
}

/// Builder for relation statements.
#[derive(Debug, Clone, Default)]
pub struct RelationBuilder {
    var: Option<Variable>,
    type_label: Option<Label>,
    players: Vec<RolePlayer>,
}

impl RelationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(mut self, var: &str) -> Self {
        self.var = Some(Variable::new(var));
        self
    }

    pub fn isa(mut self, type_label: &str) -> Self {
        self.type_label = Some(Label::from(type_label));
        self
    }

    pub fn role(mut self, role: &str, player: &str) -> Self {
        self.players
            .push(RolePlayer::new(Some(Label::from(role)), Variable::new(player)));
        self
    }

    /// A player whose role is left unspecified.
    pub fn player(mut self, player: &str) -> Self {
        self.players.push(RolePlayer::new(None, Variable::new(player)));
        self
    }
}

impl From<RelationBuilder> for Pattern {
    fn from(b: RelationBuilder) -> Self {
        Pattern::Statement(Statement::Relation {
            var: b.var,
            type_label: b.type_label,
            players: b.players,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_strips_dollar_prefix() {
        assert_eq!(Variable::new("$x"), Variable::new("x"));
        assert_eq!(Variable::new("x").to_string(), "$x");
        assert!(Variable::anonymous(3).is_anonymous());
        assert!(!Variable::new("x").is_anonymous());
    }

    #[test]
    fn generator_avoids_existing_anonymous_variables() {
        let p = Pattern::and([Pattern::isa("_4", "person"), Pattern::isa("x", "person")]);
        let mut generator = VariableGenerator::avoiding(&p);
        assert_eq!(generator.fresh(), Variable::anonymous(5));
    }

    #[test]
    fn comparator_semantics() {
        assert!(Comparator::Gt.test(&Value::Long(5), &Value::Long(3)));
        assert!(Comparator::Lte.test(&Value::Long(3), &Value::Double(3.0)));
        assert!(Comparator::Contains.test(&Value::from("hello"), &Value::from("ell")));
        assert!(!Comparator::Eq.test(&Value::from("1"), &Value::Long(1)));
    }

    #[test]
    fn dnf_distributes_conjunction_over_disjunction() {
        let p = Pattern::and([
            Pattern::isa("x", "person"),
            Pattern::or([Pattern::isa("y", "a"), Pattern::isa("y", "b")]),
        ]);
        let branches = p.dnf();
        assert_eq!(branches.len(), 2);
        assert!(branches.iter().all(|b| b.len() == 2));
    }

    #[test]
    fn dnf_keeps_negations_as_leaves() {
        let p = Pattern::and([
            Pattern::isa("x", "person"),
            Pattern::not(Pattern::or([Pattern::isa("x", "a"), Pattern::isa("x", "b")])),
        ]);
        let branches = p.dnf();
        assert_eq!(branches.len(), 1);
        assert!(matches!(branches[0][1], Pattern::Negation(_)));
    }

    #[test]
    fn named_variables_skip_negations_and_anonymous() {
        let p = Pattern::and([
            Pattern::rel("contains", &[("contained", "x"), ("container", "_0")]),
            Pattern::not(Pattern::isa("y", "person")),
        ]);
        let named = p.named_variables();
        assert_eq!(named.len(), 1);
        assert!(named.contains(&Variable::new("x")));
    }

    #[test]
    fn pattern_json_shape() {
        let p = Pattern::and([Pattern::isa("x", "person")]);
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"and\""));
        assert!(json.contains("\"kind\":\"isa\""));
        let back: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn display_reads_like_query_text() {
        let p: Pattern = Pattern::relation()
            .var("r")
            .isa("contains")
            .role("contained", "x")
            .player("y")
            .into();
        assert_eq!(p.to_string(), "$r (contained: $x, $y) isa contains;");
    }
}
