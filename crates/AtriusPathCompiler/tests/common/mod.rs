use atrius_path_compiler::{CompilationContext, CompilerConfig, JoinSet, TerminologyProvider};
use atrius_path_support::{Coding, QueryResult};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const ED_DIAGNOSIS_VALUE_SET: &str = "http://snomed.info/sct?fhir_vs=refset/32570521000036109";

/// A terminology provider with one fixed expansion.
pub struct FixedTerminology;

impl TerminologyProvider for FixedTerminology {
    fn expand(&self, _url: &str) -> QueryResult<Vec<Coding>> {
        Ok(vec![
            Coding::new("http://snomed.info/sct", "444814009"),
            Coding::new("http://snomed.info/sct", "195662009"),
        ])
    }
}

pub fn config() -> CompilerConfig {
    CompilerConfig::r4()
        .unwrap()
        .with_terminology_provider(Arc::new(FixedTerminology))
}

/// A context over `subject` with every record type the tests use available.
pub fn context(subject: &str) -> CompilationContext {
    let types: BTreeSet<String> = [
        "Patient",
        "Condition",
        "Encounter",
        "AllergyIntolerance",
        "DiagnosticReport",
        "Claim",
        "Organization",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    CompilationContext::new(&config(), subject, types).unwrap()
}

/// The joins of a set rendered in dependency order.
#[allow(dead_code)]
pub fn rendered(joins: &JoinSet) -> Vec<String> {
    joins
        .in_dependency_order()
        .iter()
        .map(|join| join.to_string())
        .collect()
}
