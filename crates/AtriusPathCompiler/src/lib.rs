//! # Path Expression Compiler
//!
//! This crate compiles path expressions over FHIR resources into relational
//! plans. An expression such as `reverseResolve(Condition.subject).code.coding`
//! is not evaluated against a single resource; instead it becomes a scalar
//! [`plan::Expr`] over a relation anchored at a subject resource type, together
//! with the set of joins that relation needs. The aggregate executor combines
//! compiled filters, groupings and aggregations into one [`plan::QueryPlan`].
//!
//! ## Overview
//!
//! Compilation turns:
//! - **Member paths** into column paths, unnesting repeating elements through
//!   lateral joins (`name.given`)
//! - **Reference traversal** into key joins in either direction
//!   (`managingOrganization.resolve()`, `reverseResolve(Condition.subject)`)
//! - **Aggregating functions** into per-subject subqueries (`count()`, `first()`)
//! - **Terminology checks** into joins against materialised value-set
//!   expansions (`code.memberOf('http://...')`)
//!
//! ## Architecture
//!
//! - **Parser** (`parser.rs`): expression text to AST, with chumsky
//! - **Schema** (`schema.rs`): element definitions for FHIR R4 resources
//! - **Compiler** (`compiler.rs`): walks the AST with an explicit context and scope
//! - **Operators** and **Functions**: closed registries, one module per family
//! - **Joins** (`join.rs`) and **Plan** (`plan.rs`): the relational model
//! - **Context** (`context.rs`): per-request alias space and join memo
//! - **Reader** and **Terminology**: the interfaces an executor supplies
//!
//! ## Usage Example
//!
//! ```rust
//! use atrius_path_compiler::{CompilationContext, CompilerConfig, compile};
//! use std::collections::BTreeSet;
//!
//! let config = CompilerConfig::r4()?;
//! let mut ctx = CompilationContext::new(&config, "Patient", BTreeSet::new())?;
//!
//! let given = compile("name.given", &mut ctx)?;
//! assert!(!given.is_singular());
//! assert_eq!(given.joins.len(), 2);
//!
//! let count = compile("name.given.count()", &mut ctx)?;
//! assert_eq!(count.aggregate.unwrap().function.to_string(), "COUNT(j2)");
//! # Ok::<(), atrius_path_support::QueryError>(())
//! ```
//!
//! ## Error Handling
//!
//! Every failure is an [`atrius_path_support::QueryError`]. Errors raised while
//! compiling carry the source text of the sub-expression that failed.

pub mod compiler;
pub mod context;
pub mod expression;
pub mod functions;
pub mod join;
pub mod operators;
pub mod parser;
pub mod path;
pub mod plan;
pub mod reader;
pub mod schema;
pub mod terminology;

pub use compiler::compile;
pub use context::{CompilationContext, CompilerConfig, Scope};
pub use expression::{AggregateForm, CompiledExpression, Shape};
pub use join::{Alias, Join, JoinKind, JoinSet, JoinTarget};
pub use plan::{Aggregate, CompareOp, Expr, QueryPlan, SubPlan};
pub use reader::{InMemoryReader, Record, Relation, ResourceReader};
pub use schema::Schema;
pub use terminology::{TerminologyProvider, ValueSetCache, ValueSetExpansion};
