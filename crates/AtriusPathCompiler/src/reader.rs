//! Access to the records of each record type.

use atrius_path_support::{QueryError, QueryResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One stored record. The identity is kept alongside the resource body.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub resource: serde_json::Value,
}

impl Record {
    /// Wraps a resource, reading its identity from the `id` element.
    pub fn from_resource(resource: serde_json::Value) -> QueryResult<Record> {
        let id = resource
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| QueryError::Execution("Resource has no id".to_string()))?
            .to_string();
        Ok(Record { id, resource })
    }
}

/// All records of one type.
#[derive(Debug, Clone)]
pub struct Relation {
    pub record_type: String,
    pub records: Arc<Vec<Record>>,
}

/// The source of base relations.
pub trait ResourceReader: Send + Sync {
    /// Returns the base relation for `record_type`. Unknown types read as empty.
    fn read(&self, record_type: &str) -> QueryResult<Relation>;

    /// Record types that can be read. Bare identifiers naming one of these
    /// compile to a root reference.
    fn available_record_types(&self) -> BTreeSet<String>;
}

/// A reader over records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReader {
    relations: BTreeMap<String, Arc<Vec<Record>>>,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource under its `resourceType`.
    pub fn add_resource(&mut self, resource: serde_json::Value) -> QueryResult<()> {
        let record_type = resource
            .get("resourceType")
            .and_then(|t| t.as_str())
            .ok_or_else(|| QueryError::Execution("Resource has no resourceType".to_string()))?
            .to_string();
        let record = Record::from_resource(resource)?;
        Arc::make_mut(self.relations.entry(record_type).or_default()).push(record);
        Ok(())
    }

    pub fn with_records(mut self, record_type: &str, records: Vec<Record>) -> Self {
        Arc::make_mut(self.relations.entry(record_type.to_string()).or_default()).extend(records);
        self
    }

    pub fn len(&self) -> usize {
        self.relations.values().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceReader for InMemoryReader {
    fn read(&self, record_type: &str) -> QueryResult<Relation> {
        Ok(Relation {
            record_type: record_type.to_string(),
            records: self.relations.get(record_type).cloned().unwrap_or_default(),
        })
    }

    fn available_record_types(&self) -> BTreeSet<String> {
        self.relations.keys().cloned().collect()
    }
}
