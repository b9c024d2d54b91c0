//! # Record-Type Schema
//!
//! Element definitions for the record types an expression may navigate. Each
//! type lists its elements with their storage type code, whether they repeat,
//! and for references the record types they may point at. Choice elements are
//! listed under their concrete names (`multipleBirthBoolean`, `onsetDateTime`).
//!
//! A FHIR R4 subset is embedded and loaded on first use through
//! [`Schema::r4`]; other schemas load with [`Schema::from_json`].

use atrius_path_support::{Cardinality, QueryError, QueryResult, ValueKind};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

const R4_SCHEMA: &str = include_str!("../resources/r4_schema.json");

static R4: Lazy<QueryResult<Arc<Schema>>> = Lazy::new(|| Schema::from_json(R4_SCHEMA).map(Arc::new));

/// Type codes stored as a single primitive JSON value.
static PRIMITIVE_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut s = HashSet::new();
    s.insert("boolean");
    s.insert("string");
    s.insert("integer");
    s.insert("decimal");
    s.insert("date");
    s.insert("dateTime");
    s.insert("time");
    s.insert("code");
    s.insert("id");
    s.insert("uri");
    s.insert("url");
    s.insert("canonical");
    s.insert("markdown");
    s.insert("base64Binary");
    s.insert("instant");
    s.insert("oid");
    s.insert("positiveInt");
    s.insert("unsignedInt");
    s.insert("uuid");
    s
});

/// Target wildcard meaning "any record type".
pub const ANY_RESOURCE: &str = "Resource";

pub fn is_primitive_type(type_code: &str) -> bool {
    PRIMITIVE_TYPES.contains(type_code)
}

/// Maps a storage type code to the logical kind of its values.
pub fn value_kind(type_code: &str) -> ValueKind {
    match type_code {
        "boolean" => ValueKind::Boolean,
        "integer" | "positiveInt" | "unsignedInt" => ValueKind::Integer,
        "decimal" => ValueKind::Decimal,
        "date" => ValueKind::Date,
        "dateTime" | "instant" => ValueKind::DateTime,
        "time" => ValueKind::Time,
        "Coding" => ValueKind::Coding,
        "Reference" => ValueKind::Reference,
        code if is_primitive_type(code) => ValueKind::String,
        _ => ValueKind::Complex,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Resource,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl ElementDefinition {
    pub fn repeating(&self) -> bool {
        self.max.as_deref() == Some("*")
    }

    pub fn cardinality(&self) -> Cardinality {
        if self.repeating() {
            Cardinality::Collection
        } else {
            Cardinality::Singular
        }
    }

    pub fn kind(&self) -> ValueKind {
        value_kind(&self.type_code)
    }

    pub fn is_reference(&self) -> bool {
        self.type_code == "Reference"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub elements: Vec<ElementDefinition>,
}

impl TypeDefinition {
    pub fn element(&self, name: &str) -> Option<&ElementDefinition> {
        self.elements.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    types: Vec<TypeDefinition>,
}

/// The set of known types, indexed by name.
#[derive(Debug, Clone)]
pub struct Schema {
    types: HashMap<String, TypeDefinition>,
}

impl Schema {
    /// The embedded FHIR R4 subset.
    pub fn r4() -> QueryResult<Arc<Schema>> {
        R4.clone()
    }

    /// Loads a schema document of the form `{"types": [...]}`.
    ///
    /// Reference targets naming types the schema does not define are dropped,
    /// and the `Resource` wildcard expands to every record type.
    pub fn from_json(text: &str) -> QueryResult<Schema> {
        let document: SchemaDocument = serde_json::from_str(text)
            .map_err(|e| QueryError::Internal(format!("Invalid schema document: {}", e)))?;

        let resource_types: BTreeSet<String> = document
            .types
            .iter()
            .filter(|t| t.kind == TypeKind::Resource)
            .map(|t| t.name.clone())
            .collect();

        let mut types = HashMap::new();
        for mut definition in document.types {
            for element in definition.elements.iter_mut() {
                if element.targets.iter().any(|t| t == ANY_RESOURCE) {
                    element.targets = resource_types.iter().cloned().collect();
                } else {
                    element.targets.retain(|t| resource_types.contains(t));
                }
            }
            types.insert(definition.name.clone(), definition);
        }
        Ok(Schema { types })
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDefinition> {
        self.types.get(type_name)
    }

    pub fn is_resource(&self, type_name: &str) -> bool {
        self.get(type_name)
            .map(|t| t.kind == TypeKind::Resource)
            .unwrap_or(false)
    }

    pub fn resource_types(&self) -> BTreeSet<String> {
        self.types
            .values()
            .filter(|t| t.kind == TypeKind::Resource)
            .map(|t| t.name.clone())
            .collect()
    }

    /// Looks up an element, failing with [`QueryError::UnknownElement`].
    pub fn element(&self, type_name: &str, element: &str) -> QueryResult<&ElementDefinition> {
        self.get(type_name)
            .and_then(|t| t.element(element))
            .ok_or_else(|| QueryError::UnknownElement {
                type_name: type_name.to_string(),
                element: element.to_string(),
            })
    }
}
