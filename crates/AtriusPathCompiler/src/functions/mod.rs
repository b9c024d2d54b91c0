//! # Functions
//!
//! The closed set of functions the compiler understands, resolved by name
//! through a registry. Each function validates its own arity and argument
//! types and names the offending sub-expression in its errors.
//!
//! | Function | Module |
//! |---|---|
//! | `count()` | [`count`] |
//! | `first()` | [`first`] |
//! | `empty()` | [`count`] |
//! | `resolve()`, `ofType(T)`, `reverseResolve(T.field)` | [`resolve`] |
//! | `memberOf(url)` | [`member_of`] |
//! | `dateFormat(pattern)` | [`date_format`] |
//! | `where(criteria)`, `not()` | [`filtering`] |

pub mod count;
pub mod date_format;
pub mod filtering;
pub mod first;
pub mod member_of;
pub mod resolve;

use atrius_path_support::{QueryError, QueryResult, Value};
use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::context::{CompilationContext, Scope};
use crate::expression::CompiledExpression;
use crate::join::{Join, JoinKind, JoinSet, JoinTarget};
use crate::parser::Expression;
use crate::plan::{Aggregate, Expr, SubPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Count,
    First,
    Empty,
    Resolve,
    OfType,
    ReverseResolve,
    MemberOf,
    DateFormat,
    Where,
    Not,
}

static FUNCTIONS: Lazy<HashMap<&'static str, FunctionKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("count", FunctionKind::Count);
    m.insert("first", FunctionKind::First);
    m.insert("empty", FunctionKind::Empty);
    m.insert("resolve", FunctionKind::Resolve);
    m.insert("ofType", FunctionKind::OfType);
    m.insert("reverseResolve", FunctionKind::ReverseResolve);
    m.insert("memberOf", FunctionKind::MemberOf);
    m.insert("dateFormat", FunctionKind::DateFormat);
    m.insert("where", FunctionKind::Where);
    m.insert("not", FunctionKind::Not);
    m
});

impl FunctionKind {
    pub fn lookup(name: &str) -> QueryResult<FunctionKind> {
        FUNCTIONS
            .get(name)
            .copied()
            .ok_or_else(|| QueryError::Unsupported(format!("Unrecognised function: {}", name)))
    }
}

/// One function call: its input, unevaluated arguments and scope.
pub struct FunctionInput<'a> {
    pub name: &'a str,
    /// Source text of the whole invocation, e.g. `code.coding.count()`.
    pub source: String,
    pub input: CompiledExpression,
    pub arguments: &'a [Expression],
    pub scope: &'a Scope,
}

impl FunctionInput<'_> {
    /// Fails unless the call has no arguments.
    pub fn expect_no_arguments(&self) -> QueryResult<()> {
        if self.arguments.is_empty() {
            Ok(())
        } else {
            Err(QueryError::InvalidArgument(format!(
                "Arguments can not be passed to {} function: {}",
                self.name, self.source
            )))
        }
    }

    /// Fails when the call sits inside per-element criteria, where a
    /// per-subject aggregation has no meaning.
    pub fn reject_in_element_scope(&self) -> QueryResult<()> {
        if self.scope.element {
            Err(QueryError::Unsupported(format!(
                "{} function can not be used within the criteria of a where function on a collection: {}",
                self.name, self.source
            )))
        } else {
            Ok(())
        }
    }

    /// Compiles the single argument of the call, with `$this` bound to the input.
    pub fn single_argument(
        &self,
        ctx: &mut CompilationContext,
        usage: &str,
    ) -> QueryResult<CompiledExpression> {
        let [argument] = self.arguments else {
            return Err(QueryError::InvalidArgument(format!(
                "{}: {}",
                usage, self.source
            )));
        };
        let element = self.scope.element || !self.input.is_singular();
        let mut this = self.input.clone();
        this.cardinality = atrius_path_support::Cardinality::Singular;
        crate::compiler::compile_expression(ctx, argument, &Scope::argument(this, element))
    }

    /// Compiles the single argument and requires it to be a string literal.
    pub fn string_argument(&self, ctx: &mut CompilationContext, usage: &str) -> QueryResult<String> {
        let argument = self.single_argument(ctx, usage)?;
        match argument.literal {
            Some(Value::String(s)) => Ok(s),
            _ => Err(QueryError::InvalidArgument(format!(
                "{}: {}",
                usage, self.source
            ))),
        }
    }
}

/// Wraps `aggregate` over the rows of `joins` into a subquery correlated with
/// the subject, returning the join that brings its value in.
pub(crate) fn per_subject(
    ctx: &mut CompilationContext,
    kind: JoinKind,
    joins: &JoinSet,
    aggregate: Aggregate,
) -> Join {
    let subject = ctx.subject_alias();
    let plan = SubPlan {
        subject: subject.clone(),
        joins: joins.in_dependency_order().into_iter().cloned().collect(),
        aggregate,
    };
    ctx.join(
        kind,
        JoinTarget::Subquery {
            plan: Box::new(plan),
            key: Expr::column(subject, vec!["id".to_string()]),
        },
    )
}

/// Compiles a function call.
pub fn invoke(ctx: &mut CompilationContext, call: FunctionInput<'_>) -> QueryResult<CompiledExpression> {
    match FunctionKind::lookup(call.name)? {
        FunctionKind::Count => count::count_function(ctx, call),
        FunctionKind::Empty => count::empty_function(ctx, call),
        FunctionKind::First => first::first_function(ctx, call),
        FunctionKind::Resolve => resolve::resolve_function(ctx, call),
        FunctionKind::OfType => resolve::of_type_function(ctx, call),
        FunctionKind::ReverseResolve => resolve::reverse_resolve_function(ctx, call),
        FunctionKind::MemberOf => member_of::member_of_function(ctx, call),
        FunctionKind::DateFormat => date_format::date_format_function(ctx, call),
        FunctionKind::Where => filtering::where_function(ctx, call),
        FunctionKind::Not => filtering::not_function(call),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(FunctionKind::lookup("count").unwrap(), FunctionKind::Count);
        assert_eq!(
            FunctionKind::lookup("reverseResolve").unwrap(),
            FunctionKind::ReverseResolve
        );
        let err = FunctionKind::lookup("iif").unwrap_err();
        assert_eq!(err.to_string(), "Unrecognised function: iif");
    }
}
