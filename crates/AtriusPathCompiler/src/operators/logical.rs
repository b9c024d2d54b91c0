//! `and`, `or`, `xor` and `implies`, with three-valued semantics.

use atrius_path_support::{Cardinality, QueryError, QueryResult, ValueKind};

use super::{BinaryOperator, OperatorInput};
use crate::expression::{CompiledExpression, Shape};
use crate::plan::Expr;

pub fn logical(
    operator: BinaryOperator,
    input: OperatorInput<'_>,
) -> QueryResult<CompiledExpression> {
    let OperatorInput {
        source,
        left,
        right,
        ..
    } = input;

    for operand in [&left, &right] {
        if !operand.is_singular() || !operand.is_boolean() {
            return Err(QueryError::Type(format!(
                "Operands to {} operator must be singular Boolean values: {}",
                operator, operand.source
            )));
        }
    }

    let (l, r) = (Box::new(left.value.clone()), Box::new(right.value.clone()));
    let value = match operator {
        BinaryOperator::And => Expr::And(l, r),
        BinaryOperator::Or => Expr::Or(l, r),
        BinaryOperator::Xor => Expr::Xor(l, r),
        BinaryOperator::Implies => Expr::Implies(l, r),
        other => {
            return Err(QueryError::Internal(format!(
                "{} is not a logical operator",
                other
            )));
        }
    };

    Ok(CompiledExpression {
        joins: left.joins.merge(&right.joins)?,
        source,
        kind: ValueKind::Boolean,
        type_code: Some("boolean".to_string()),
        cardinality: Cardinality::Singular,
        literal: None,
        shape: Shape::Primitive,
        value,
        aggregate: None,
        origin: left.origin.clone().or_else(|| right.origin.clone()),
    })
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::context::{CompilationContext, CompilerConfig};
    use atrius_path_support::QueryError;
    use std::collections::BTreeSet;

    fn context() -> CompilationContext {
        let config = CompilerConfig::r4().unwrap();
        CompilationContext::new(&config, "Patient", BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_date_range() {
        let mut ctx = context();
        let compiled = compile("birthDate > @1980 and birthDate < @1990", &mut ctx).unwrap();
        assert_eq!(
            compiled.value.to_string(),
            "((TO_DATE(Patient.birthDate) > TO_DATE(DATE '1980-01-01')) AND \
             (TO_DATE(Patient.birthDate) < TO_DATE(DATE '1990-01-01')))"
        );
        assert_eq!(compiled.source, "birthDate > @1980 and birthDate < @1990");
    }

    #[test]
    fn test_non_boolean_operand_rejected() {
        let mut ctx = context();
        let err = compile("gender and active", &mut ctx).unwrap_err();
        assert!(matches!(err, QueryError::Type(_)));
        assert!(err.to_string().contains("gender"));
    }

    #[test]
    fn test_implies_and_xor() {
        let mut ctx = context();
        let implies = compile("active implies multipleBirthBoolean", &mut ctx).unwrap();
        assert_eq!(
            implies.value.to_string(),
            "(Patient.active IMPLIES Patient.multipleBirthBoolean)"
        );
        let xor = compile("active xor deceasedBoolean", &mut ctx).unwrap();
        assert_eq!(xor.value.to_string(), "(Patient.active XOR Patient.deceasedBoolean)");
    }
}
