//! Aggregate responses and their FHIR `Parameters` and CSV forms.

use atrius_path_support::Value;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use std::cmp::Ordering;
use std::io::Write;

/// One observed combination of grouping values, with the aggregation results
/// for it. A grouping expression without a value for the combination gives
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultGrouping {
    pub labels: Vec<Option<Value>>,
    pub results: Vec<Option<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResponse {
    /// Column headings: grouping labels, then aggregation labels.
    pub columns: Vec<String>,
    /// FHIR type codes of the grouping values.
    pub label_types: Vec<String>,
    /// FHIR type codes of the aggregation results.
    pub result_types: Vec<String>,
    pub groupings: Vec<ResultGrouping>,
}

/// Orders grouping keys value by value, with no-value after every value.
fn compare_labels(left: &[Option<Value>], right: &[Option<Value>]) -> Ordering {
    for (l, r) in left.iter().zip(right) {
        let ordering = match (l, r) {
            (Some(l), Some(r)) => l.cmp(r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

/// `value[x]` key for a FHIR type code, e.g. `dateTime` to `valueDateTime`.
fn value_key(type_code: &str) -> String {
    let mut chars = type_code.chars();
    match chars.next() {
        Some(first) => format!("value{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => "valueString".to_string(),
    }
}

fn part(name: &str, value: Option<&Value>, type_code: &str) -> JsonValue {
    let mut object = Map::new();
    object.insert("name".to_string(), JsonValue::from(name));
    if let Some(value) = value {
        object.insert(value_key(type_code), value.to_json());
    }
    JsonValue::Object(object)
}

impl AggregateResponse {
    /// Sorts the groupings by their labels, no-value last.
    pub fn sort(&mut self) {
        self.groupings
            .sort_by(|a, b| compare_labels(&a.labels, &b.labels));
    }

    /// Renders the response as a FHIR `Parameters` resource.
    pub fn to_parameters(&self) -> JsonValue {
        let parameter: Vec<JsonValue> = self
            .groupings
            .iter()
            .map(|grouping| {
                let labels = grouping
                    .labels
                    .iter()
                    .zip(&self.label_types)
                    .map(|(value, type_code)| part("label", value.as_ref(), type_code));
                let results = grouping
                    .results
                    .iter()
                    .zip(&self.result_types)
                    .map(|(value, type_code)| part("result", value.as_ref(), type_code));
                json!({
                    "name": "grouping",
                    "part": labels.chain(results).collect::<Vec<_>>()
                })
            })
            .collect();
        json!({
            "resourceType": "Parameters",
            "parameter": parameter
        })
    }

    /// Writes one CSV row per grouping, with a header row of column labels.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for grouping in &self.groupings {
            let cells: Vec<String> = grouping
                .labels
                .iter()
                .chain(&grouping.results)
                .map(|cell| cell.as_ref().map(|v| v.to_string()).unwrap_or_default())
                .collect();
            writer.write_record(&cells)?;
        }
        writer.flush()?;
        Ok(())
    }
}
