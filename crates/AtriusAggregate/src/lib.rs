//! # Aggregate Queries
//!
//! Answers aggregate requests over FHIR resources: count, group and filter a
//! subject resource type with path expressions, e.g. "the number of patients
//! by gender, among those with an emergency diagnosis".
//!
//! ## Architecture
//!
//! - **Request** (`request.rs`): the request model and its `Parameters` form
//! - **Executor** (`executor.rs`): drives a request through validation,
//!   compilation, planning, execution and shaping
//! - **Planner** (`planner.rs`): merges compiled parts into one query plan
//! - **Engine** (`engine.rs`): the [`QueryEngine`] seam and the in-memory
//!   reference engine
//! - **Response** (`response.rs`): grouped results as `Parameters`, JSON or CSV
//! - **Data source** (`data_source.rs`): NDJSON, Bundle and directory loading
//! - **Terminology** (`terminology.rs`): value set expansion for `memberOf`
//!
//! ## Usage Example
//!
//! ```rust
//! use atrius_aggregate::{AggregateExecutor, AggregateRequest, EngineConfig};
//! use atrius_path_compiler::InMemoryReader;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let mut reader = InMemoryReader::new();
//! reader.add_resource(json!({"resourceType": "Patient", "id": "p1", "gender": "female"}))?;
//! reader.add_resource(json!({"resourceType": "Patient", "id": "p2", "gender": "male"}))?;
//! reader.add_resource(json!({"resourceType": "Patient", "id": "p3", "gender": "female"}))?;
//!
//! let executor = AggregateExecutor::new(EngineConfig::r4()?, Arc::new(reader));
//! let request = AggregateRequest::new("Patient")
//!     .with_aggregation("Number of patients", "count()")
//!     .with_grouping("Gender", "gender");
//!
//! let response = executor.execute(&request)?;
//! assert_eq!(response.groupings.len(), 2);
//! let parameters = response.to_parameters();
//! assert_eq!(parameters["parameter"][0]["part"][0]["valueCode"], "female");
//! assert_eq!(parameters["parameter"][0]["part"][1]["valueUnsignedInt"], 2);
//! # Ok::<(), atrius_path_support::QueryError>(())
//! ```

pub mod config;
pub mod data_source;
pub mod engine;
pub mod executor;
pub mod planner;
pub mod request;
pub mod response;
pub mod terminology;

pub use config::EngineConfig;
pub use data_source::{LoadError, NdjsonReader};
pub use engine::{InMemoryEngine, QueryEngine, ResultSet};
pub use executor::{AggregateExecutor, ExecutionState};
pub use request::{AggregateRequest, LabelledExpression};
pub use response::{AggregateResponse, ResultGrouping};
#[cfg(feature = "terminology-http")]
pub use terminology::HttpTerminology;
pub use terminology::StaticTerminology;
