//! Equality and ordering comparisons.
//!
//! Both operands must be singular. Ordering needs two values of the same
//! orderable kind; date and dateTime may be mixed and compare at date
//! granularity. Codings compare with coded equality, and a CodeableConcept
//! equals a Coding when any of its codings does.

use atrius_path_support::{Cardinality, QueryError, QueryResult, ValueKind};

use super::OperatorInput;
use crate::expression::{CompiledExpression, Shape};
use crate::plan::{CompareOp, Expr};

fn is_concept(operand: &CompiledExpression) -> bool {
    operand.is_codeable_concept() && operand.kind == ValueKind::Complex
}

pub fn compare(op: CompareOp, input: OperatorInput<'_>) -> QueryResult<CompiledExpression> {
    let OperatorInput {
        source,
        left,
        right,
        ..
    } = input;

    if !left.is_singular() {
        return Err(QueryError::Type(format!(
            "Left operand to {} operator must be singular: {}",
            op.symbol(),
            left.source
        )));
    }
    if !right.is_singular() {
        return Err(QueryError::Type(format!(
            "Right operand to {} operator must be singular: {}",
            op.symbol(),
            right.source
        )));
    }
    if left.is_literal() && right.is_literal() {
        return Err(QueryError::InvalidArgument(format!(
            "Cannot have two literal operands to {} operator: {}",
            op.symbol(),
            source
        )));
    }

    let coded = match (left.kind == ValueKind::Coding, right.kind == ValueKind::Coding) {
        (true, true) => true,
        (true, false) => is_concept(&right),
        (false, true) => is_concept(&left),
        (false, false) => false,
    };

    let predicate = if !op.is_ordering() && coded {
        let (l, r) = (Box::new(left.value.clone()), Box::new(right.value.clone()));
        let equals = match (is_concept(&left), is_concept(&right)) {
            (true, _) => Expr::AnyCodingEquals { concept: l, coding: r },
            (_, true) => Expr::AnyCodingEquals { concept: r, coding: l },
            _ => Expr::CodingEquals(l, r),
        };
        match op {
            CompareOp::NotEqual => Expr::Not(Box::new(equals)),
            _ => equals,
        }
    } else if is_concept(&left) || is_concept(&right) {
        // A concept only meets a coding, and only under = and !=.
        return Err(incompatible(op, &left, &right, &source));
    } else {
        check_kinds(op, &left, &right, &source)?;
        let (l, r) = if left.kind.is_date_like() || right.kind.is_date_like() {
            (
                Expr::ToDate(Box::new(left.value.clone())),
                Expr::ToDate(Box::new(right.value.clone())),
            )
        } else {
            (left.value.clone(), right.value.clone())
        };
        Expr::Compare {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    };

    let joins = if left.is_literal() {
        right.joins.clone()
    } else if right.is_literal() {
        left.joins.clone()
    } else {
        left.joins.merge(&right.joins)?
    };

    Ok(CompiledExpression {
        source,
        kind: ValueKind::Boolean,
        type_code: Some("boolean".to_string()),
        cardinality: Cardinality::Singular,
        literal: None,
        shape: Shape::Primitive,
        value: predicate,
        joins,
        aggregate: None,
        origin: left.origin.clone().or_else(|| right.origin.clone()),
    })
}

fn incompatible(
    op: CompareOp,
    left: &CompiledExpression,
    right: &CompiledExpression,
    source: &str,
) -> QueryError {
    QueryError::Type(format!(
        "Operands to {} operator are not of compatible types ({} and {}): {}",
        op.symbol(),
        left.kind,
        right.kind,
        source
    ))
}

fn check_kinds(
    op: CompareOp,
    left: &CompiledExpression,
    right: &CompiledExpression,
    source: &str,
) -> QueryResult<()> {
    let structured = |kind: ValueKind| {
        matches!(
            kind,
            ValueKind::Complex | ValueKind::Reference | ValueKind::Coding
        )
    };
    if structured(left.kind) || structured(right.kind) {
        return Err(incompatible(op, left, right, source));
    }
    if op.is_ordering() {
        let same_kind = left.kind == right.kind
            || (left.kind.is_date_like() && right.kind.is_date_like());
        if !(left.kind.is_orderable() && right.kind.is_orderable() && same_kind) {
            return Err(QueryError::Type(format!(
                "Operands to {} operator must be of the same orderable type ({} and {}): {}",
                op.symbol(),
                left.kind,
                right.kind,
                source
            )));
        }
    } else if !left.kind.is_comparable_with(right.kind) {
        return Err(incompatible(op, left, right, source));
    }
    Ok(())
}
