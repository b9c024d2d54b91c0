use thiserror::Error;

/// Errors raised while validating, compiling or executing an aggregate query.
///
/// The variants follow the order in which a request moves through the system.
/// Request and schema errors are raised synchronously during validation and
/// compilation and always name the offending sub-expression; execution and
/// terminology errors come from collaborators and are passed through untouched.
///
/// # Examples
///
/// ```rust
/// use atrius_path_support::QueryError;
///
/// let error = QueryError::Unsupported("Indexer operation is not supported".to_string());
/// assert!(error.is_request_error());
/// assert_eq!(error.issue_code(), "not-supported");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Malformed request structure, e.g. a missing label or subject type.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The expression text could not be parsed.
    #[error("Error parsing expression '{expression}': {message}")]
    Parse { expression: String, message: String },

    /// A grammar construct, function or variable outside the supported subset.
    #[error("{0}")]
    Unsupported(String),

    /// A type or cardinality precondition was violated.
    ///
    /// Also raised when navigating through a polymorphic reference that has not
    /// been narrowed to a single record type.
    #[error("Type error: {0}")]
    Type(String),

    /// A function or operator received the wrong number or kind of arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A path segment does not exist on the resolved type.
    #[error("Unknown element '{element}' on type {type_name}")]
    UnknownElement { type_name: String, element: String },

    /// The terminology collaborator failed to expand or validate a value set.
    #[error("Terminology error: {0}")]
    Terminology(String),

    /// The execution engine failed. Never retried.
    #[error("Execution error: {0}")]
    Execution(String),

    /// An invariant of the compiler itself was broken.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Returns true for errors caused by the request itself (validation, grammar,
    /// typing, schema resolution) as opposed to failures of a collaborator.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidRequest(_)
                | QueryError::Parse { .. }
                | QueryError::Unsupported(_)
                | QueryError::Type(_)
                | QueryError::InvalidArgument(_)
                | QueryError::UnknownElement { .. }
        )
    }

    /// The OperationOutcome issue type code for this error.
    pub fn issue_code(&self) -> &'static str {
        match self {
            QueryError::InvalidRequest(_)
            | QueryError::Parse { .. }
            | QueryError::Type(_)
            | QueryError::InvalidArgument(_) => "invalid",
            QueryError::Unsupported(_) => "not-supported",
            QueryError::UnknownElement { .. } => "not-found",
            QueryError::Terminology(_) | QueryError::Execution(_) => "processing",
            QueryError::Internal(_) => "exception",
        }
    }

    /// Renders this error as a FHIR OperationOutcome resource.
    pub fn operation_outcome(&self) -> serde_json::Value {
        serde_json::json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": self.issue_code(),
                "details": {
                    "text": self.to_string()
                }
            }]
        })
    }
}

/// Result type alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
