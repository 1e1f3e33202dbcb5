// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kb-reasoner
//!
//! Rule-based reasoning over a typed knowledge graph: queries are answered
//! from stored facts and from facts derivable through `when`/`then` rules,
//! with negation-as-failure, disjunction and per-answer explanations.
//!
//! ## Architecture
//!
//! - **Patterns** (`pattern`): the query syntax tree handed in by a parser
//! - **Atoms** (`atom`): normalized constraints, alpha-equivalence, rule unification
//! - **Queries** (`query`): atomic, conjunctive, composite and disjunctive queries
//!   built by a [`QueryFactory`](query::QueryFactory)
//! - **Resolution** (`resolve`): tabled resolution with a cycle guard, streamed lazily
//! - **Caches** (`cache`): answers per alpha-equivalence class, rule applicability
//! - **Context** (`context`): per-transaction state shared by all queries
//! - **Storage** (`storage`): the traversal boundary and an in-memory petgraph store
//!
//! ## Library usage
//!
//! ```no_run
//! use kb_reasoner::keyspace::Keyspace;
//! use kb_reasoner::pattern::Pattern;
//!
//! let keyspace = Keyspace::load("family.json".as_ref()).unwrap();
//! let ctx = keyspace.reasoning_context().unwrap();
//! let query = ctx
//!     .factory()
//!     .resolvable(&Pattern::rel("parentship", &[("parent", "p"), ("child", "c")]))
//!     .unwrap();
//! for answer in query.resolve() {
//!     println!("{}", answer.unwrap());
//! }
//! ```

pub mod answer;
pub mod atom;
pub mod cache;
pub mod concept;
pub mod config;
pub mod context;
pub mod error;
pub mod explanation;
pub mod keyspace;
pub mod pattern;
pub mod query;
pub mod resolve;
pub mod rule;
pub mod schema;
pub mod statistics;
pub mod storage;
