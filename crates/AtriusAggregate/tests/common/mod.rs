use atrius_aggregate::{AggregateExecutor, AggregateResponse, EngineConfig, StaticTerminology};
use atrius_path_compiler::InMemoryReader;
use atrius_path_support::{Coding, Value};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

#[allow(dead_code)]
pub const ED_DIAGNOSIS_VALUE_SET: &str = "http://snomed.info/sct?fhir_vs=refset/32570521000036109";
pub const SNOMED: &str = "http://snomed.info/sct";

/// Four patients: two female, one male and one without a gender. The first
/// two have conditions, the last two have none.
pub fn resources() -> Vec<JsonValue> {
    vec![
        json!({
            "resourceType": "Patient", "id": "p1", "gender": "female", "birthDate": "1970-03-01",
            "name": [{"family": "Smith", "given": ["Ann", "Marie"]}]
        }),
        json!({
            "resourceType": "Patient", "id": "p2", "gender": "male", "birthDate": "1982-11-20",
            "name": [{"family": "Jones", "given": ["Bob"]}]
        }),
        json!({
            "resourceType": "Patient", "id": "p3", "gender": "female", "birthDate": "1990-06-15"
        }),
        json!({
            "resourceType": "Patient", "id": "p4", "birthDate": "2001-01-01",
            "name": [{"given": ["Kim"]}]
        }),
        json!({
            "resourceType": "Condition", "id": "c1", "subject": {"reference": "Patient/p1"},
            "code": {"coding": [{"system": SNOMED, "code": "444814009", "display": "Viral sinusitis"}]},
            "onsetDateTime": "2010-05-01T10:00:00Z"
        }),
        json!({
            "resourceType": "Condition", "id": "c2", "subject": {"reference": "Patient/p1"},
            "code": {"coding": [{"system": SNOMED, "code": "38341003", "display": "Hypertension"}]},
            "onsetDateTime": "2015-02-07T13:28:17Z"
        }),
        json!({
            "resourceType": "Condition", "id": "c3", "subject": {"reference": "Patient/p2"},
            "code": {"coding": [{"system": SNOMED, "code": "195662009", "display": "Acute viral pharyngitis"}]}
        }),
        json!({"resourceType": "Organization", "id": "o1", "name": "Acme Hospital"}),
        json!({
            "resourceType": "Encounter", "id": "e1",
            "serviceProvider": {"reference": "Organization/o1"}
        }),
        json!({"resourceType": "Encounter", "id": "e2"}),
    ]
}

#[allow(dead_code)]
pub fn reader() -> InMemoryReader {
    let mut reader = InMemoryReader::new();
    for resource in resources() {
        reader.add_resource(resource).unwrap();
    }
    reader
}

#[allow(dead_code)]
pub fn terminology() -> StaticTerminology {
    StaticTerminology::new().with_expansion(
        ED_DIAGNOSIS_VALUE_SET,
        vec![Coding::new(SNOMED, "444814009"), Coding::new(SNOMED, "195662009")],
    )
}

#[allow(dead_code)]
pub fn executor() -> AggregateExecutor {
    let config = EngineConfig::r4()
        .unwrap()
        .with_terminology_provider(Arc::new(terminology()));
    AggregateExecutor::new(config, Arc::new(reader()))
}

/// The first label and first result of each grouping, in response order.
#[allow(dead_code)]
pub fn cells(response: &AggregateResponse) -> Vec<(Option<Value>, Option<Value>)> {
    response
        .groupings
        .iter()
        .map(|g| (g.labels[0].clone(), g.results[0].clone()))
        .collect()
}

#[allow(dead_code)]
pub fn label(text: &str) -> Option<Value> {
    Some(Value::from(text))
}

#[allow(dead_code)]
pub fn count(n: i64) -> Option<Value> {
    Some(Value::Integer(n))
}
