//! # Path Query Support Types
//!
//! This crate provides the foundational types shared by the path compiler and the
//! aggregate executor. It defines the value model that flows through compiled
//! plans and query results, and the error taxonomy every stage reports through.
//!
//! ## Core Types
//!
//! - [`Value`] - A single cell value, either a literal in an expression or a value
//!   produced by executing a plan
//! - [`Coding`] - A coded value (system, version, code, display) with coded equality
//! - [`ValueKind`] - The logical type of a compiled expression
//! - [`Cardinality`] - Whether an expression yields one or many values per subject
//! - [`QueryError`] - Errors raised while validating, compiling or executing a query
//!
//! ## Usage Example
//!
//! ```rust
//! use atrius_path_support::{Coding, Value};
//!
//! let left = Coding::parse_literal("http://snomed.info/sct|373882004").unwrap();
//! let right = Coding::new("http://snomed.info/sct", "373882004");
//! assert_eq!(left.equals(&right), Some(true));
//!
//! let value = Value::Coding(left);
//! assert_eq!(value.kind(), atrius_path_support::ValueKind::Coding);
//! ```

pub mod error;
pub mod value;

pub use error::{QueryError, QueryResult};
pub use value::{
    Cardinality, Coding, Value, ValueKind, parse_date_prefix, parse_date_time, parse_time,
};
