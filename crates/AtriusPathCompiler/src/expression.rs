//! Typed intermediate representation of a compiled expression.

use atrius_path_support::{Cardinality, Value, ValueKind};
use std::sync::Arc;

use crate::join::{Alias, Join, JoinSet};
use crate::plan::{Aggregate, Expr};

/// What kind of thing a compiled value is, beyond its [`ValueKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Primitive,
    /// A structured element such as a CodeableConcept or HumanName.
    Complex,
    /// A Reference element and the record types it may point at.
    Reference(Vec<String>),
    /// A whole record of the given type.
    Resource(String),
    /// A resolved reference that may be any of these record types.
    Polymorphic(Vec<String>),
}

/// The form a node takes when used as an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateForm {
    pub function: Aggregate,
    /// Joins the aggregate reads.
    pub joins: JoinSet,
}

/// A compiled, typed expression.
///
/// The backing relation is the subject's base relation extended with
/// `joins`; `value` is read from each of its rows. Nodes are immutable and
/// every compilation step builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    /// Source text of the sub-expression this node was compiled from.
    pub source: String,
    pub kind: ValueKind,
    /// Storage type code, e.g. `code`, `CodeableConcept`, `Patient`.
    pub type_code: Option<String>,
    pub cardinality: Cardinality,
    /// Present only for literals, which have no backing relation.
    pub literal: Option<Value>,
    pub shape: Shape,
    pub value: Expr,
    pub joins: JoinSet,
    pub aggregate: Option<AggregateForm>,
    /// The root node this one was navigated from.
    pub origin: Option<Arc<CompiledExpression>>,
}

/// A compiled expression's relation spelled out for planning.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRelation {
    pub identity: Expr,
    pub value: Expr,
    pub joins: Vec<Join>,
}

impl CompiledExpression {
    /// The node for a record type's base relation.
    pub fn root(record_type: &str) -> CompiledExpression {
        CompiledExpression {
            source: record_type.to_string(),
            kind: ValueKind::Reference,
            type_code: Some(record_type.to_string()),
            cardinality: Cardinality::Singular,
            literal: None,
            shape: Shape::Resource(record_type.to_string()),
            value: Expr::column(Alias::root(record_type), vec![]),
            joins: JoinSet::new(),
            aggregate: None,
            origin: None,
        }
    }

    pub fn literal(source: String, value: Value, kind: ValueKind, type_code: &str) -> CompiledExpression {
        CompiledExpression {
            source,
            kind,
            type_code: Some(type_code.to_string()),
            cardinality: Cardinality::Singular,
            literal: Some(value.clone()),
            shape: Shape::Primitive,
            value: Expr::Literal(value),
            joins: JoinSet::new(),
            aggregate: None,
            origin: None,
        }
    }

    pub fn is_literal(&self) -> bool {
        self.literal.is_some()
    }

    pub fn is_singular(&self) -> bool {
        self.cardinality.is_singular()
    }

    pub fn is_boolean(&self) -> bool {
        self.kind == ValueKind::Boolean
    }

    pub fn resource_type(&self) -> Option<&str> {
        match &self.shape {
            Shape::Resource(t) => Some(t),
            _ => None,
        }
    }

    pub fn type_code(&self) -> &str {
        self.type_code.as_deref().unwrap_or("")
    }

    pub fn is_codeable_concept(&self) -> bool {
        self.type_code() == "CodeableConcept"
    }

    /// The identity of the record this node denotes, or the value itself for
    /// elements.
    pub fn identity(&self) -> Expr {
        match self.shape {
            Shape::Resource(_) => self.value.navigate("id"),
            _ => self.value.clone(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn relation(&self, subject: &Alias) -> SubjectRelation {
        SubjectRelation {
            identity: Expr::column(subject.clone(), vec!["id".to_string()]),
            value: self.value.clone(),
            joins: self.joins.in_dependency_order().into_iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_node() {
        let root = CompiledExpression::root("Patient");
        assert_eq!(root.resource_type(), Some("Patient"));
        assert!(root.is_singular());
        assert_eq!(root.identity().to_string(), "Patient.id");
        assert!(root.joins.is_empty());
    }

    #[test]
    fn test_literal_node_has_no_relation() {
        let node = CompiledExpression::literal("'female'".into(), Value::from("female"), ValueKind::String, "string");
        assert!(node.is_literal());
        assert!(node.joins.is_empty());
        assert_eq!(node.value.to_string(), "'female'");
    }

    #[test]
    fn test_relation_identity_is_subject_id() {
        let root = CompiledExpression::root("Patient");
        let relation = root.relation(&Alias::root("Patient"));
        assert_eq!(relation.identity.to_string(), "Patient.id");
        assert_eq!(relation.value.to_string(), "Patient");
        assert!(relation.joins.is_empty());
    }
}
