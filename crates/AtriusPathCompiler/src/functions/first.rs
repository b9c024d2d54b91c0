//! `first()`.
//!
//! The per-subject value is the first non-null input value in row order,
//! taken from a subquery grouped by subject identity.

use atrius_path_support::{Cardinality, QueryError, QueryResult};

use super::{FunctionInput, per_subject};
use crate::context::CompilationContext;
use crate::expression::{AggregateForm, CompiledExpression};
use crate::join::{JoinKind, JoinSet};
use crate::plan::{Aggregate, Expr};

pub fn first_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    call.expect_no_arguments()?;
    call.reject_in_element_scope()?;
    let input = call.input;
    if input.is_literal() {
        return Err(QueryError::InvalidArgument(format!(
            "Input to first function can not be a literal: {}",
            call.source
        )));
    }
    let aggregate = Aggregate::First(input.value.clone());
    if input.is_singular() {
        let mut node = input.with_source(call.source);
        node.aggregate = Some(AggregateForm {
            function: aggregate,
            joins: node.joins.clone(),
        });
        return Ok(node);
    }

    let join = per_subject(ctx, JoinKind::Derived, &input.joins, aggregate.clone());

    Ok(CompiledExpression {
        source: call.source,
        kind: input.kind,
        type_code: input.type_code.clone(),
        cardinality: Cardinality::Singular,
        literal: None,
        shape: input.shape.clone(),
        value: Expr::column(join.alias.clone(), vec![]),
        joins: JoinSet::new().with(join)?,
        aggregate: Some(AggregateForm {
            function: aggregate,
            joins: input.joins.clone(),
        }),
        origin: input.origin.clone(),
    })
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::context::{CompilationContext, CompilerConfig};
    use crate::join::{JoinKind, JoinTarget};
    use crate::plan::Expr;
    use atrius_path_support::ValueKind;
    use std::collections::BTreeSet;

    fn context() -> CompilationContext {
        let config = CompilerConfig::r4().unwrap();
        CompilationContext::new(&config, "Patient", BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_first_is_grouped_by_subject_identity() {
        let mut ctx = context();
        let compiled = compile("name.family.first()", &mut ctx).unwrap();
        assert_eq!(compiled.kind, ValueKind::String);
        assert!(compiled.is_singular());

        let join = compiled.joins.iter().next().unwrap();
        assert_eq!(join.kind, JoinKind::Derived);
        let JoinTarget::Subquery { plan, key } = &join.target else {
            panic!("expected subquery");
        };
        assert_eq!(key.to_string(), "Patient.id");
        assert!(plan.to_string().ends_with("GROUP BY Patient.id"));
        assert_eq!(compiled.value, Expr::column(join.alias.clone(), vec![]));
    }

    /// Older releases grouped `first()` by the value itself, which returned one
    /// row per distinct value instead of one per subject. Grouping by subject
    /// identity is the behaviour kept here.
    #[test]
    fn test_first_does_not_group_by_value() {
        let mut ctx = context();
        let compiled = compile("name.family.first()", &mut ctx).unwrap();
        let join = compiled.joins.iter().next().unwrap();
        let JoinTarget::Subquery { plan, .. } = &join.target else {
            panic!("expected subquery");
        };
        assert!(!plan.to_string().contains("GROUP BY j1"));
    }

    #[test]
    fn test_first_of_singular_is_identity() {
        let mut ctx = context();
        let compiled = compile("gender.first()", &mut ctx).unwrap();
        assert_eq!(compiled.value.to_string(), "Patient.gender");
        assert!(compiled.joins.is_empty());
        assert_eq!(
            compiled.aggregate.unwrap().function.to_string(),
            "FIRST(Patient.gender)"
        );
    }

    #[test]
    fn test_first_rejects_arguments() {
        let mut ctx = context();
        assert!(compile("name.first(1)", &mut ctx).is_err());
    }
}
