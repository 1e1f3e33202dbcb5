//! Rich diagnostic error types for the reasoner.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`ReasonerError`] wraps them all so the
//! full diagnostic chain reaches the caller of the factory or the answer stream.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the reasoner.
#[derive(Debug, Error, Diagnostic)]
pub enum ReasonerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Keyspace(#[from] KeyspaceError),
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("malformed query: {message}")]
    #[diagnostic(
        code(reasoner::query::malformed),
        help(
            "A query needs at least one selectable atom (isa, relation or has), \
             and every variable used in a comparison must be bound by an atom \
             or by the substitution."
        )
    )]
    Malformed { message: String },

    #[error("negated block references {variable}, which the positive part does not bind")]
    #[diagnostic(
        code(reasoner::query::ungrounded_negation),
        help(
            "Closed-world negation is only defined once the positive part of the \
             query binds every variable the negated block shares with it. Move the \
             binding statement out of the negation or bind the variable explicitly."
        )
    )]
    UngroundedNegation { variable: String },

    #[error("unknown schema label: {label}")]
    #[diagnostic(
        code(reasoner::query::unknown_label),
        help("The label is not defined as a type or role in the schema. Check its spelling.")
    )]
    UnknownLabel { label: String },

    #[error("resolution depth exceeded maximum of {max_depth}")]
    #[diagnostic(
        code(reasoner::query::depth_exceeded),
        help(
            "Rule expansion nested deeper than `max_depth` atomic sub-goals. \
             Increase `max_depth` in ResolutionConfig or review the rule set \
             for chains that keep introducing new constants."
        )
    )]
    DepthExceeded { max_depth: usize },

    #[error("rule expansion did not reach a fixpoint within {iterations} iterations")]
    #[diagnostic(
        code(reasoner::query::no_fixpoint),
        help(
            "Recursive rules kept producing new answers. Increase \
             `max_fixpoint_iterations` in ResolutionConfig."
        )
    )]
    FixpointNotReached { iterations: usize },
}

// ---------------------------------------------------------------------------
// Cache errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("query cache inconsistency: {query} is alpha-equivalent to a cached entry with a different fingerprint")]
    #[diagnostic(
        code(reasoner::cache::inconsistency),
        help(
            "The alpha-equivalence hash and equality disagree. This is a bug in \
             the reasoner, not in the query. Please report it with the query text."
        )
    )]
    Inconsistency { query: String },
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("rule '{rule}' has an invalid conclusion: {message}")]
    #[diagnostic(
        code(reasoner::rule::invalid_head),
        help(
            "A rule must conclude exactly one relation (with its type and every role \
             named) or one attribute ownership whose attribute variable is bound in \
             the `when` block."
        )
    )]
    InvalidHead { rule: String, message: String },

    #[error("rule '{rule}' concludes {variable}, which its `when` block never binds")]
    #[diagnostic(
        code(reasoner::rule::unbound_head_variable),
        help("Every variable in the `then` block must also appear in the `when` block.")
    )]
    UnboundHeadVariable { rule: String, variable: String },

    #[error("rule '{rule}' has an empty `when` block")]
    #[diagnostic(
        code(reasoner::rule::empty_body),
        help("Add at least one statement to the `when` block.")
    )]
    EmptyBody { rule: String },

    #[error("rule set is not stratifiable: '{rule}' negates {label} inside a recursive cycle")]
    #[diagnostic(
        code(reasoner::rule::not_stratifiable),
        help(
            "Negation-as-failure needs the negated facts to be fully derivable before \
             they are negated. Break the cycle between these rules or drop the negation."
        )
    )]
    NotStratifiable { rule: String, label: String },

    #[error("more than one rule is labelled '{rule}'")]
    #[diagnostic(
        code(reasoner::rule::duplicate_label),
        help("Rule labels identify rules in explanations and dependency checks; rename one of them.")
    )]
    DuplicateLabel { rule: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read reasoner config: {path}")]
    #[diagnostic(
        code(reasoner::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse reasoner config {path}: {message}")]
    #[diagnostic(
        code(reasoner::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write reasoner config: {path}")]
    #[diagnostic(
        code(reasoner::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(reasoner::config::invalid),
        help("Check the ResolutionConfig fields. {message}")
    )]
    Invalid { message: String },
}

// ---------------------------------------------------------------------------
// Keyspace errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KeyspaceError {
    #[error("failed to read keyspace file: {path}")]
    #[diagnostic(
        code(reasoner::keyspace::io),
        help("Ensure the keyspace file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse keyspace: {message}")]
    #[diagnostic(
        code(reasoner::keyspace::parse),
        help("The keyspace must be a JSON document with `schema`, `data` and `rules` sections.")
    )]
    Parse { message: String },

    #[error("unknown type: {label}")]
    #[diagnostic(
        code(reasoner::keyspace::unknown_type),
        help("Define the type in the schema before inserting instances of it.")
    )]
    UnknownType { label: String },

    #[error("unknown concept: {reference}")]
    #[diagnostic(
        code(reasoner::keyspace::unknown_concept),
        help("Insert the concept before referencing it from a relation or ownership.")
    )]
    UnknownConcept { reference: String },

    #[error("{type_label} cannot play role {role}")]
    #[diagnostic(
        code(reasoner::keyspace::invalid_role),
        help("Declare `plays` for the type (or one of its supertypes) in the schema.")
    )]
    InvalidRole { type_label: String, role: String },

    #[error("{type_label} cannot own attribute {attribute}")]
    #[diagnostic(
        code(reasoner::keyspace::invalid_ownership),
        help("Declare `owns` for the type (or one of its supertypes) in the schema.")
    )]
    InvalidOwnership { type_label: String, attribute: String },

    #[error("value {value} does not fit attribute type {type_label}")]
    #[diagnostic(
        code(reasoner::keyspace::invalid_value),
        help("The value must match the value type declared for the attribute.")
    )]
    InvalidValue { type_label: String, value: String },
}

/// Convenience alias for functions returning reasoner results.
pub type ReasonerResult<T> = std::result::Result<T, ReasonerError>;
