//! Terminology providers for `memberOf`.
//!
//! [`StaticTerminology`] answers from FHIR ValueSet resources that carry an
//! `expansion`, loaded from a file or added directly. With the
//! `terminology-http` feature, [`HttpTerminology`] asks a terminology server
//! to expand the value set.

use atrius_path_compiler::TerminologyProvider;
use atrius_path_support::{Coding, QueryError, QueryResult};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Value set expansions held in memory, keyed by canonical url.
#[derive(Debug, Clone, Default)]
pub struct StaticTerminology {
    expansions: HashMap<String, Vec<Coding>>,
}

impl StaticTerminology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expansion(mut self, url: &str, codings: Vec<Coding>) -> Self {
        self.expansions.insert(url.to_string(), codings);
        self
    }

    /// Adds a ValueSet resource. Its `url` names it and its
    /// `expansion.contains` entries, nested ones included, are its members.
    pub fn add_value_set(&mut self, value_set: &JsonValue) -> QueryResult<()> {
        let url = value_set
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| QueryError::Terminology("ValueSet has no url".to_string()))?;
        let contains = value_set
            .get("expansion")
            .and_then(|e| e.get("contains"))
            .ok_or_else(|| {
                QueryError::Terminology(format!("ValueSet {} has no expansion", url))
            })?;
        let mut codings = Vec::new();
        collect_contains(contains, &mut codings);
        debug!(url, codes = codings.len(), "Loaded value set expansion");
        self.expansions.insert(url.to_string(), codings);
        Ok(())
    }

    /// Loads a ValueSet resource, an array of them or a Bundle of them.
    pub fn from_json(json: &JsonValue) -> QueryResult<Self> {
        let mut terminology = Self::new();
        let value_sets: Vec<&JsonValue> = match json {
            JsonValue::Array(items) => items.iter().collect(),
            _ if json.get("resourceType").and_then(|t| t.as_str()) == Some("Bundle") => json
                .get("entry")
                .and_then(|e| e.as_array())
                .map(|entries| entries.iter().filter_map(|e| e.get("resource")).collect())
                .unwrap_or_default(),
            _ => vec![json],
        };
        for value_set in value_sets {
            terminology.add_value_set(value_set)?;
        }
        Ok(terminology)
    }

    pub fn from_file(path: &Path) -> QueryResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            QueryError::Terminology(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let json: JsonValue = serde_json::from_str(&text).map_err(|e| {
            QueryError::Terminology(format!("Cannot parse {}: {}", path.display(), e))
        })?;
        let terminology = Self::from_json(&json)?;
        info!(path = %path.display(), value_sets = terminology.len(), "Loaded value sets");
        Ok(terminology)
    }

    pub fn len(&self) -> usize {
        self.expansions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expansions.is_empty()
    }
}

fn collect_contains(contains: &JsonValue, out: &mut Vec<Coding>) {
    for entry in contains.as_array().map(Vec::as_slice).unwrap_or_default() {
        if let Some(coding) = Coding::from_json(entry).filter(|c| c.code.is_some()) {
            out.push(coding);
        }
        if let Some(nested) = entry.get("contains") {
            collect_contains(nested, out);
        }
    }
}

impl TerminologyProvider for StaticTerminology {
    fn expand(&self, url: &str) -> QueryResult<Vec<Coding>> {
        self.expansions
            .get(url)
            .cloned()
            .ok_or_else(|| QueryError::Terminology(format!("Unknown value set: {}", url)))
    }
}

/// Expands value sets with `GET {base}/ValueSet/$expand?url=...`.
#[cfg(feature = "terminology-http")]
#[derive(Debug, Clone)]
pub struct HttpTerminology {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "terminology-http")]
impl HttpTerminology {
    pub fn new(base_url: &str) -> Self {
        HttpTerminology {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[cfg(feature = "terminology-http")]
impl TerminologyProvider for HttpTerminology {
    fn expand(&self, url: &str) -> QueryResult<Vec<Coding>> {
        let endpoint = format!("{}/ValueSet/$expand", self.base_url);
        info!(endpoint = %endpoint, url, "Expanding value set");
        let value_set: JsonValue = self
            .client
            .get(&endpoint)
            .query(&[("url", url)])
            .header("Accept", "application/fhir+json")
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json::<JsonValue>())
            .map_err(|e| QueryError::Terminology(format!("Expansion of {} failed: {}", url, e)))?;
        let contains = value_set
            .get("expansion")
            .and_then(|e| e.get("contains"))
            .cloned()
            .unwrap_or(JsonValue::Array(Vec::new()));
        let mut codings = Vec::new();
        collect_contains(&contains, &mut codings);
        Ok(codings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value_set() -> JsonValue {
        json!({
            "resourceType": "ValueSet",
            "url": "http://example.org/ValueSet/ed-diagnosis",
            "expansion": {
                "contains": [
                    {"system": "http://snomed.info/sct", "code": "444814009", "display": "Viral sinusitis"},
                    {"abstract": true, "display": "Grouper", "contains": [
                        {"system": "http://snomed.info/sct", "code": "195662009"}
                    ]}
                ]
            }
        })
    }

    #[test]
    fn test_expansion_includes_nested_entries() {
        let terminology = StaticTerminology::from_json(&value_set()).unwrap();
        let codings = terminology
            .expand("http://example.org/ValueSet/ed-diagnosis")
            .unwrap();
        assert_eq!(codings.len(), 2);
        assert_eq!(codings[1], Coding::new("http://snomed.info/sct", "195662009"));
        assert_eq!(
            terminology
                .validate_code(
                    "http://example.org/ValueSet/ed-diagnosis",
                    &Coding::new("http://snomed.info/sct", "444814009")
                )
                .unwrap(),
            Some(true)
        );
    }

    #[test]
    fn test_unknown_value_set() {
        let err = StaticTerminology::new().expand("http://example.org/vs").unwrap_err();
        assert!(matches!(err, QueryError::Terminology(_)));
    }

    #[test]
    fn test_bundle_of_value_sets() {
        let bundle = json!({"resourceType": "Bundle", "entry": [{"resource": value_set()}]});
        assert_eq!(StaticTerminology::from_json(&bundle).unwrap().len(), 1);
        let err = StaticTerminology::from_json(&json!({"resourceType": "ValueSet"})).unwrap_err();
        assert_eq!(err.to_string(), "Terminology error: ValueSet has no url");
    }
}
