//! `in` and `contains`.
//!
//! `element in collection` compiles to a subquery that yields one row per
//! subject: `SELECT Subject.id, IFNULL(MAX(pred), FALSE) ... GROUP BY
//! Subject.id`. The result is never null. `contains` is `in` with its operands
//! swapped.

use atrius_path_support::{Cardinality, QueryError, QueryResult, ValueKind};

use super::{BinaryOperator, OperatorInput};
use crate::context::CompilationContext;
use crate::expression::{CompiledExpression, Shape};
use crate::functions::per_subject;
use crate::join::JoinKind;
use crate::path::member;
use crate::plan::{Aggregate, CompareOp, Expr};

fn is_element_kind(operand: &CompiledExpression) -> bool {
    match operand.kind {
        ValueKind::Boolean
        | ValueKind::Integer
        | ValueKind::Decimal
        | ValueKind::String
        | ValueKind::Date
        | ValueKind::DateTime
        | ValueKind::Time
        | ValueKind::Coding => true,
        ValueKind::Complex => operand.is_codeable_concept(),
        ValueKind::Reference | ValueKind::Null => false,
    }
}

pub fn membership(
    ctx: &mut CompilationContext,
    operator: BinaryOperator,
    input: OperatorInput<'_>,
) -> QueryResult<CompiledExpression> {
    let OperatorInput {
        source,
        left,
        right,
        scope,
    } = input;
    let (element, collection) = match operator {
        BinaryOperator::Contains => (right, left),
        _ => (left, right),
    };

    if scope.element {
        return Err(QueryError::Unsupported(format!(
            "{} operator can not be used within the criteria of a where function on a collection: {}",
            operator, source
        )));
    }
    if !element.is_singular() {
        return Err(QueryError::Type(format!(
            "Element operand to {} operator must be singular: {}",
            operator, element.source
        )));
    }
    if !is_element_kind(&element) {
        return Err(QueryError::Type(format!(
            "Element operand to {} operator is of unsupported type {}: {}",
            operator, element.kind, element.source
        )));
    }
    if collection.is_literal() || collection.cardinality != Cardinality::Collection {
        return Err(QueryError::Type(format!(
            "Collection operand to {} operator must be a collection: {}",
            operator, collection.source
        )));
    }

    // A collection of concepts is matched through its codings.
    let collection = if collection.is_codeable_concept() {
        let coding_source = format!("{}.coding", collection.source);
        member(ctx, &collection, "coding", coding_source)?
    } else {
        collection
    };

    let element_coded = element.kind == ValueKind::Coding || element.is_codeable_concept();
    let predicate = if element_coded {
        if collection.kind != ValueKind::Coding {
            return Err(incompatible(operator, &element, &collection, &source));
        }
        if element.is_codeable_concept() {
            Expr::AnyCodingEquals {
                concept: Box::new(element.value.clone()),
                coding: Box::new(collection.value.clone()),
            }
        } else {
            Expr::CodingEquals(
                Box::new(element.value.clone()),
                Box::new(collection.value.clone()),
            )
        }
    } else {
        if !element.kind.is_comparable_with(collection.kind)
            || collection.kind == ValueKind::Coding
            || collection.kind == ValueKind::Complex
            || collection.kind == ValueKind::Reference
        {
            return Err(incompatible(operator, &element, &collection, &source));
        }
        let (e, c) = if element.kind.is_date_like() {
            (
                Expr::ToDate(Box::new(element.value.clone())),
                Expr::ToDate(Box::new(collection.value.clone())),
            )
        } else {
            (element.value.clone(), collection.value.clone())
        };
        Expr::Compare {
            op: CompareOp::Equal,
            left: Box::new(e),
            right: Box::new(c),
        }
    };

    let inner = element.joins.merge(&collection.joins)?;
    let join = per_subject(ctx, JoinKind::Membership, &inner, Aggregate::Max(predicate));
    let value = Expr::Coalesce(vec![
        Expr::column(join.alias.clone(), vec![]),
        Expr::literal(false),
    ]);

    Ok(CompiledExpression {
        source,
        kind: ValueKind::Boolean,
        type_code: Some("boolean".to_string()),
        cardinality: Cardinality::Singular,
        literal: None,
        shape: Shape::Primitive,
        value,
        joins: crate::join::JoinSet::new().with(join)?,
        aggregate: None,
        origin: element.origin.clone().or_else(|| collection.origin.clone()),
    })
}

fn incompatible(
    operator: BinaryOperator,
    element: &CompiledExpression,
    collection: &CompiledExpression,
    source: &str,
) -> QueryError {
    QueryError::Type(format!(
        "Operands to {} operator are not of compatible types ({} and {}): {}",
        operator, element.kind, collection.kind, source
    ))
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::context::{CompilationContext, CompilerConfig};
    use crate::join::{JoinKind, JoinTarget};
    use crate::plan::{Aggregate, Expr};
    use atrius_path_support::{QueryError, ValueKind};
    use std::collections::BTreeSet;

    fn context(subject: &str) -> CompilationContext {
        let config = CompilerConfig::r4().unwrap();
        CompilationContext::new(&config, subject, BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_literal_coding_in_collection() {
        let mut ctx = context("Condition");
        let compiled =
            compile("http://snomed.info/sct|73211009 in code.coding", &mut ctx).unwrap();
        assert_eq!(compiled.kind, ValueKind::Boolean);
        assert!(compiled.is_singular());
        assert_eq!(compiled.joins.len(), 1);

        let join = compiled.joins.iter().next().unwrap();
        assert_eq!(join.kind, JoinKind::Membership);
        let JoinTarget::Subquery { plan, .. } = &join.target else {
            panic!("expected subquery");
        };
        assert!(matches!(plan.aggregate, Aggregate::Max(Expr::CodingEquals(_, _))));
        assert_eq!(
            compiled.value.to_string(),
            format!("IFNULL({}, FALSE)", join.alias)
        );
    }

    #[test]
    fn test_contains_swaps_operands() {
        let mut ctx = context("Patient");
        let contains = compile("name.given contains 'Jo'", &mut ctx).unwrap();
        let within = compile("'Jo' in name.given", &mut ctx).unwrap();
        assert_eq!(contains.value, within.value);
        assert_eq!(contains.joins, within.joins);
    }

    #[test]
    fn test_concept_collection_is_matched_through_codings() {
        let mut ctx = context("Patient");
        assert!(compile("http://snomed.info/sct|1 in communication.language", &mut ctx).is_ok());
    }

    #[test]
    fn test_singular_collection_rejected() {
        let mut ctx = context("Patient");
        let err = compile("'female' in gender", &mut ctx).unwrap_err();
        assert!(matches!(err, QueryError::Type(_)));
    }

    #[test]
    fn test_incompatible_kinds_rejected() {
        let mut ctx = context("Patient");
        assert!(compile("5 in name.given", &mut ctx).is_err());
    }
}
