//! `where(criteria)` and `not()`.

use atrius_path_support::{Cardinality, QueryError, QueryResult, Value, ValueKind};

use super::FunctionInput;
use crate::context::CompilationContext;
use crate::expression::{CompiledExpression, Shape};
use crate::plan::Expr;

/// Keeps the elements of the input for which `criteria` is true.
///
/// Non-matching elements are masked to null rather than removed, so the
/// result keeps the input's relation and cardinality.
pub fn where_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    if call.input.is_literal() {
        return Err(QueryError::InvalidArgument(format!(
            "Input to where function can not be a literal: {}",
            call.source
        )));
    }
    let usage = "where function accepts one argument";
    let criteria = call.single_argument(ctx, usage)?;
    if !criteria.is_singular() || !criteria.is_boolean() {
        return Err(QueryError::Type(format!(
            "Argument to where function must be a singular Boolean expression: {}",
            call.source
        )));
    }

    let input = call.input;
    let joins = input.joins.merge(&criteria.joins)?;
    let value = Expr::Case {
        when: Box::new(criteria.value),
        then: Box::new(input.value.clone()),
        otherwise: Box::new(Expr::null()),
    };
    Ok(CompiledExpression {
        source: call.source,
        value,
        joins,
        aggregate: None,
        ..input
    })
}

pub fn not_function(call: FunctionInput<'_>) -> QueryResult<CompiledExpression> {
    call.expect_no_arguments()?;
    let input = call.input;
    if !input.is_singular() || !input.is_boolean() {
        return Err(QueryError::Type(format!(
            "Input to not function must be a singular Boolean: {}",
            call.source
        )));
    }

    let (value, literal) = match &input.literal {
        Some(Value::Boolean(b)) => (Expr::literal(!*b), Some(Value::Boolean(!*b))),
        _ => (Expr::Not(Box::new(input.value.clone())), None),
    };
    Ok(CompiledExpression {
        source: call.source,
        kind: ValueKind::Boolean,
        type_code: Some("boolean".to_string()),
        cardinality: Cardinality::Singular,
        literal,
        shape: Shape::Primitive,
        value,
        joins: input.joins.clone(),
        aggregate: None,
        origin: input.origin.clone(),
    })
}
