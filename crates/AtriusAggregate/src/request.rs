//! Aggregate requests and their FHIR `Parameters` form.
//!
//! A request names a subject resource type, one or more aggregations, any
//! number of groupings and any number of filters:
//!
//! ```json
//! {
//!   "resourceType": "Parameters",
//!   "parameter": [
//!     { "name": "subjectResource", "valueCode": "Patient" },
//!     { "name": "aggregation", "part": [
//!       { "name": "label", "valueString": "Number of patients" },
//!       { "name": "expression", "valueString": "count()" }
//!     ]},
//!     { "name": "grouping", "part": [
//!       { "name": "expression", "valueString": "gender" }
//!     ]},
//!     { "name": "filter", "valueString": "active = true" }
//!   ]
//! }
//! ```

use atrius_path_support::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An expression with an optional display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledExpression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub expression: String,
}

impl LabelledExpression {
    pub fn new(label: Option<&str>, expression: &str) -> Self {
        LabelledExpression {
            label: label.map(String::from),
            expression: expression.to_string(),
        }
    }

    /// The label, falling back to the expression text.
    pub fn display(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.expression)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub subject: String,
    pub aggregations: Vec<LabelledExpression>,
    #[serde(default)]
    pub groupings: Vec<LabelledExpression>,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl AggregateRequest {
    pub fn new(subject: &str) -> Self {
        AggregateRequest {
            subject: subject.to_string(),
            aggregations: Vec::new(),
            groupings: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn with_aggregation(mut self, label: &str, expression: &str) -> Self {
        self.aggregations
            .push(LabelledExpression::new(Some(label), expression));
        self
    }

    pub fn with_grouping(mut self, label: &str, expression: &str) -> Self {
        self.groupings
            .push(LabelledExpression::new(Some(label), expression));
        self
    }

    pub fn with_filter(mut self, expression: &str) -> Self {
        self.filters.push(expression.to_string());
        self
    }

    /// Parses request text holding a `Parameters` resource.
    pub fn from_json(text: &str) -> QueryResult<Self> {
        let parameters: JsonValue = serde_json::from_str(text).map_err(|e| {
            QueryError::InvalidRequest(format!("Request is not valid JSON: {}", e))
        })?;
        Self::from_parameters(&parameters)
    }

    /// Reads a request from a FHIR `Parameters` resource.
    pub fn from_parameters(parameters: &JsonValue) -> QueryResult<Self> {
        if parameters.get("resourceType").and_then(|t| t.as_str()) != Some("Parameters") {
            return Err(QueryError::InvalidRequest(
                "Request must be a Parameters resource".to_string(),
            ));
        }
        let entries = parameters
            .get("parameter")
            .and_then(|p| p.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let named = |name: &str| -> Vec<&JsonValue> {
            entries
                .iter()
                .filter(|p| p.get("name").and_then(|n| n.as_str()) == Some(name))
                .collect()
        };

        let subjects = named("subjectResource");
        if subjects.len() != 1 {
            return Err(QueryError::InvalidRequest(
                "There must be one subject resource parameter".to_string(),
            ));
        }
        let subject = subjects[0]
            .get("valueCode")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                QueryError::InvalidRequest(
                    "Subject resource parameter must have code value".to_string(),
                )
            })?;

        let aggregations = named("aggregation")
            .into_iter()
            .map(|p| labelled_expression(p, "Aggregation"))
            .collect::<QueryResult<Vec<_>>>()?;
        let groupings = named("grouping")
            .into_iter()
            .map(|p| labelled_expression(p, "Grouping"))
            .collect::<QueryResult<Vec<_>>>()?;
        let filters = named("filter")
            .into_iter()
            .map(|p| {
                string_value(p).ok_or_else(|| {
                    QueryError::InvalidRequest("Filter parameter must have value".to_string())
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(AggregateRequest {
            subject: subject.to_string(),
            aggregations,
            groupings,
            filters,
        })
    }

    /// Structural checks made before any expression is compiled.
    pub fn validate(&self) -> QueryResult<()> {
        if self.subject.trim().is_empty() {
            return Err(QueryError::InvalidRequest(
                "Subject resource parameter must have code value".to_string(),
            ));
        }
        if self.aggregations.is_empty() {
            return Err(QueryError::InvalidRequest(
                "At least one aggregation is required".to_string(),
            ));
        }
        let blank = |what: &str| {
            QueryError::InvalidRequest(format!("{} expression must have value", what))
        };
        if self.aggregations.iter().any(|a| a.expression.trim().is_empty()) {
            return Err(blank("Aggregation"));
        }
        if self.groupings.iter().any(|g| g.expression.trim().is_empty()) {
            return Err(blank("Grouping"));
        }
        if self.filters.iter().any(|f| f.trim().is_empty()) {
            return Err(QueryError::InvalidRequest(
                "Filter parameter must have value".to_string(),
            ));
        }
        Ok(())
    }
}

/// The string held by whichever `value[x]` field a parameter carries.
fn string_value(parameter: &JsonValue) -> Option<String> {
    parameter
        .as_object()?
        .iter()
        .find(|(key, _)| key.starts_with("value"))
        .and_then(|(_, value)| value.as_str())
        .map(String::from)
}

fn has_value(parameter: &JsonValue) -> bool {
    parameter
        .as_object()
        .is_some_and(|o| o.keys().any(|k| k.starts_with("value")))
}

fn labelled_expression(parameter: &JsonValue, what: &str) -> QueryResult<LabelledExpression> {
    let parts = parameter
        .get("part")
        .and_then(|p| p.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let part = |name: &str| {
        parts
            .iter()
            .find(|p| p.get("name").and_then(|n| n.as_str()) == Some(name))
    };

    let label = match part("label") {
        Some(label) if has_value(label) => Some(string_value(label).ok_or_else(|| {
            QueryError::InvalidRequest(format!("{} label must have value", what))
        })?),
        Some(_) => {
            return Err(QueryError::InvalidRequest(format!(
                "{} label must have value",
                what
            )));
        }
        None => None,
    };
    let expression = part("expression")
        .and_then(string_value)
        .ok_or_else(|| QueryError::InvalidRequest(format!("{} expression must have value", what)))?;

    Ok(LabelledExpression { label, expression })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parameters(parameter: JsonValue) -> JsonValue {
        json!({ "resourceType": "Parameters", "parameter": parameter })
    }

    #[test]
    fn test_from_parameters() {
        let request = AggregateRequest::from_parameters(&parameters(json!([
            { "name": "subjectResource", "valueCode": "Patient" },
            { "name": "aggregation", "part": [
                { "name": "label", "valueString": "Number of patients" },
                { "name": "expression", "valueString": "count()" }
            ]},
            { "name": "grouping", "part": [
                { "name": "expression", "valueString": "gender" }
            ]},
            { "name": "filter", "valueString": "active = true" }
        ])))
        .unwrap();

        assert_eq!(request.subject, "Patient");
        assert_eq!(
            request.aggregations,
            vec![LabelledExpression::new(Some("Number of patients"), "count()")]
        );
        assert_eq!(request.groupings[0].label, None);
        assert_eq!(request.groupings[0].display(), "gender");
        assert_eq!(request.filters, vec!["active = true"]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_subject_resource_errors() {
        let err = AggregateRequest::from_parameters(&parameters(json!([]))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid request: There must be one subject resource parameter"
        );

        let err = AggregateRequest::from_parameters(&parameters(json!([
            { "name": "subjectResource", "valueString": "Patient" }
        ])))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid request: Subject resource parameter must have code value"
        );
    }

    #[test]
    fn test_part_errors() {
        let err = AggregateRequest::from_parameters(&parameters(json!([
            { "name": "subjectResource", "valueCode": "Patient" },
            { "name": "aggregation", "part": [
                { "name": "label" },
                { "name": "expression", "valueString": "count()" }
            ]}
        ])))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: Aggregation label must have value");

        let err = AggregateRequest::from_parameters(&parameters(json!([
            { "name": "subjectResource", "valueCode": "Patient" },
            { "name": "grouping", "part": [{ "name": "expression" }] }
        ])))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: Grouping expression must have value");

        let err = AggregateRequest::from_parameters(&parameters(json!([
            { "name": "subjectResource", "valueCode": "Patient" },
            { "name": "filter" }
        ])))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: Filter parameter must have value");
    }

    #[test]
    fn test_validate_requires_an_aggregation() {
        let err = AggregateRequest::new("Patient")
            .with_grouping("Gender", "gender")
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: At least one aggregation is required");
    }

    #[test]
    fn test_non_parameters_resource() {
        let err = AggregateRequest::from_json(r#"{"resourceType": "Bundle"}"#).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
        assert!(AggregateRequest::from_json("{").is_err());
    }
}
