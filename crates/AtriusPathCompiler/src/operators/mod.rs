//! # Binary Operators
//!
//! The closed set of binary operators the compiler supports, resolved from the
//! operator token. Each family lives in its own module:
//!
//! - [`comparison`]: `=`, `!=`, `<`, `<=`, `>`, `>=`
//! - [`logical`]: `and`, `or`, `xor`, `implies`
//! - [`membership`]: `in`, `contains`
//!
//! All operators produce a singular boolean.

pub mod comparison;
pub mod logical;
pub mod membership;

use atrius_path_support::{QueryError, QueryResult};
use std::fmt;

use crate::context::{CompilationContext, Scope};
use crate::expression::CompiledExpression;
use crate::plan::CompareOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Compare(CompareOp),
    In,
    Contains,
    And,
    Or,
    Xor,
    Implies,
}

impl BinaryOperator {
    pub fn from_token(token: &str) -> QueryResult<BinaryOperator> {
        Ok(match token {
            "=" => BinaryOperator::Compare(CompareOp::Equal),
            "!=" => BinaryOperator::Compare(CompareOp::NotEqual),
            "<" => BinaryOperator::Compare(CompareOp::Less),
            "<=" => BinaryOperator::Compare(CompareOp::LessOrEqual),
            ">" => BinaryOperator::Compare(CompareOp::Greater),
            ">=" => BinaryOperator::Compare(CompareOp::GreaterOrEqual),
            "in" => BinaryOperator::In,
            "contains" => BinaryOperator::Contains,
            "and" => BinaryOperator::And,
            "or" => BinaryOperator::Or,
            "xor" => BinaryOperator::Xor,
            "implies" => BinaryOperator::Implies,
            other => {
                return Err(QueryError::Unsupported(format!(
                    "Operator is not supported: {}",
                    other
                )));
            }
        })
    }

    pub fn token(self) -> &'static str {
        match self {
            BinaryOperator::Compare(op) => op.symbol(),
            BinaryOperator::In => "in",
            BinaryOperator::Contains => "contains",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Xor => "xor",
            BinaryOperator::Implies => "implies",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// The operands of one operator application.
pub struct OperatorInput<'a> {
    /// Source text of the whole operator expression.
    pub source: String,
    pub left: CompiledExpression,
    pub right: CompiledExpression,
    pub scope: &'a Scope,
}

/// Compiles `left <op> right`.
pub fn apply(
    ctx: &mut CompilationContext,
    operator: BinaryOperator,
    input: OperatorInput<'_>,
) -> QueryResult<CompiledExpression> {
    match operator {
        BinaryOperator::Compare(op) => comparison::compare(op, input),
        BinaryOperator::In | BinaryOperator::Contains => {
            membership::membership(ctx, operator, input)
        }
        BinaryOperator::And
        | BinaryOperator::Or
        | BinaryOperator::Xor
        | BinaryOperator::Implies => logical::logical(operator, input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_round_trip() {
        for token in ["=", "!=", "<", "<=", ">", ">=", "in", "contains", "and", "or", "xor", "implies"] {
            assert_eq!(BinaryOperator::from_token(token).unwrap().token(), token);
        }
    }

    #[test]
    fn test_equivalence_is_unsupported() {
        assert!(matches!(
            BinaryOperator::from_token("~"),
            Err(QueryError::Unsupported(_))
        ));
        assert!(BinaryOperator::from_token("!~").is_err());
    }
}
