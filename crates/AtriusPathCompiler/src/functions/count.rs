//! `count()` and `empty()`.
//!
//! Both summarise the input per subject. The per-subject value comes from a
//! derived subquery grouped by subject identity and coalesced to zero, so a
//! subject with no values counts 0 rather than null.

use atrius_path_support::{Cardinality, QueryError, QueryResult, ValueKind};

use super::{FunctionInput, per_subject};
use crate::context::CompilationContext;
use crate::expression::{AggregateForm, CompiledExpression, Shape};
use crate::join::{JoinKind, JoinSet};
use crate::plan::{Aggregate, CompareOp, Expr};

/// Counts non-null values; whole records count by distinct identity.
fn counted(input: &CompiledExpression) -> Aggregate {
    match input.shape {
        Shape::Resource(_) => Aggregate::CountDistinct(input.identity()),
        _ => Aggregate::Count(input.value.clone()),
    }
}

fn check_input(call: &FunctionInput<'_>) -> QueryResult<()> {
    call.expect_no_arguments()?;
    if call.input.is_literal() {
        return Err(QueryError::InvalidArgument(format!(
            "Input to {} function can not be a literal: {}",
            call.name, call.source
        )));
    }
    Ok(())
}

pub fn count_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    check_input(&call)?;
    call.reject_in_element_scope()?;

    let input = call.input;
    let aggregate = counted(&input);
    let join = per_subject(ctx, JoinKind::Derived, &input.joins, aggregate.clone());
    let value = Expr::Coalesce(vec![
        Expr::column(join.alias.clone(), vec![]),
        Expr::literal(0i64),
    ]);

    Ok(CompiledExpression {
        source: call.source,
        kind: ValueKind::Integer,
        type_code: Some("unsignedInt".to_string()),
        cardinality: Cardinality::Singular,
        literal: None,
        shape: Shape::Primitive,
        value,
        joins: JoinSet::new().with(join)?,
        aggregate: Some(AggregateForm {
            function: aggregate,
            joins: input.joins.clone(),
        }),
        origin: input.origin.clone(),
    })
}

pub fn empty_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    check_input(&call)?;
    let input = call.input;

    let (value, joins) = if input.is_singular() {
        (
            Expr::Not(Box::new(Expr::IsNotNull(Box::new(input.value.clone())))),
            input.joins.clone(),
        )
    } else {
        if call.scope.element {
            return Err(QueryError::Unsupported(format!(
                "empty function on a collection can not be used within the criteria of a where function on a collection: {}",
                call.source
            )));
        }
        let join = per_subject(ctx, JoinKind::Derived, &input.joins, counted(&input));
        let count = Expr::Coalesce(vec![
            Expr::column(join.alias.clone(), vec![]),
            Expr::literal(0i64),
        ]);
        let value = Expr::Compare {
            op: CompareOp::Equal,
            left: Box::new(count),
            right: Box::new(Expr::literal(0i64)),
        };
        (value, JoinSet::new().with(join)?)
    };

    Ok(CompiledExpression {
        source: call.source,
        kind: ValueKind::Boolean,
        type_code: Some("boolean".to_string()),
        cardinality: Cardinality::Singular,
        literal: None,
        shape: Shape::Primitive,
        value,
        joins,
        aggregate: None,
        origin: input.origin.clone(),
    })
}
