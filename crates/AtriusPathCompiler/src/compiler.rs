//! # Expression Compiler
//!
//! Walks the parsed AST and produces a [`CompiledExpression`]. The walk is
//! explicit: the compilation context carries per-request state and a
//! [`Scope`] carries the `$this` binding while a function's arguments are
//! compiled.
//!
//! Every node records the source text of its own sub-expression, which error
//! messages use to point at the failing part of a larger expression.

use atrius_path_support::{
    QueryError, QueryResult, Value, ValueKind, parse_date_prefix, parse_date_time, parse_time,
};
use tracing::debug;

use crate::context::{CompilationContext, Scope};
use crate::expression::CompiledExpression;
use crate::functions::{self, FunctionInput};
use crate::operators::{self, BinaryOperator, OperatorInput};
use crate::parser::{self, Expression, Invocation, Literal, Term};
use crate::path;

/// Parses and compiles `text` against the subject of `ctx`.
pub fn compile(text: &str, ctx: &mut CompilationContext) -> QueryResult<CompiledExpression> {
    let expression = parser::parse(text)?;
    let compiled = compile_expression(ctx, &expression, &Scope::top())?;
    debug!(
        expression = text,
        kind = %compiled.kind,
        joins = compiled.joins.len(),
        "Compiled expression"
    );
    Ok(compiled.with_source(text))
}

pub(crate) fn compile_expression(
    ctx: &mut CompilationContext,
    expression: &Expression,
    scope: &Scope,
) -> QueryResult<CompiledExpression> {
    let unsupported = |what: &str| -> QueryResult<CompiledExpression> {
        Err(QueryError::Unsupported(format!(
            "{} not supported: {}",
            what, expression
        )))
    };

    match expression {
        Expression::Term(term) => compile_term(ctx, term, expression, scope),
        Expression::Invocation(base, invocation) => {
            let input = compile_expression(ctx, base, scope)?;
            compile_invocation(ctx, input, invocation, expression, scope)
        }
        Expression::Indexer(_, _) => unsupported("Indexer operation is"),
        Expression::Polarity(_, _) => unsupported("Polarity operator is"),
        Expression::Multiplicative(_, _, _) => unsupported("Multiplicative expressions are"),
        Expression::Additive(_, _, _) => unsupported("Additive expressions are"),
        Expression::Type(_, _, _) => unsupported("Type expressions are"),
        Expression::Union(_, _) => unsupported("Union expressions are"),
        Expression::Inequality(left, op, right)
        | Expression::Equality(left, op, right)
        | Expression::Membership(left, op, right)
        | Expression::Or(left, op, right) => {
            compile_operator(ctx, left, op, right, expression, scope)
        }
        Expression::And(left, right) => compile_operator(ctx, left, "and", right, expression, scope),
        Expression::Implies(left, right) => {
            compile_operator(ctx, left, "implies", right, expression, scope)
        }
    }
}

fn compile_operator(
    ctx: &mut CompilationContext,
    left: &Expression,
    token: &str,
    right: &Expression,
    expression: &Expression,
    scope: &Scope,
) -> QueryResult<CompiledExpression> {
    let operator = BinaryOperator::from_token(token)?;
    let left = compile_expression(ctx, left, scope)?;
    let right = compile_expression(ctx, right, scope)?;
    operators::apply(
        ctx,
        operator,
        OperatorInput {
            source: expression.to_string(),
            left,
            right,
            scope,
        },
    )
}

fn compile_invocation(
    ctx: &mut CompilationContext,
    input: CompiledExpression,
    invocation: &Invocation,
    expression: &Expression,
    scope: &Scope,
) -> QueryResult<CompiledExpression> {
    match invocation {
        Invocation::Member(name) => path::member(ctx, &input, name, expression.to_string()),
        Invocation::Function(name, arguments) => functions::invoke(
            ctx,
            FunctionInput {
                name,
                source: expression.to_string(),
                input,
                arguments,
                scope,
            },
        ),
        Invocation::This | Invocation::Index | Invocation::Total => Err(QueryError::Unsupported(
            format!("Invalid invocation: {}", expression),
        )),
    }
}

fn compile_term(
    ctx: &mut CompilationContext,
    term: &Term,
    expression: &Expression,
    scope: &Scope,
) -> QueryResult<CompiledExpression> {
    let source = expression.to_string();
    match term {
        Term::Literal(literal) => compile_literal(literal, source),
        Term::Parenthesized(inner) => {
            Ok(compile_expression(ctx, inner, scope)?.with_source(source))
        }
        Term::ExternalConstant(name) => match name.as_str() {
            "resource" | "context" => Ok(subject_node(ctx).with_source(source)),
            _ => Err(QueryError::Unsupported(format!(
                "Unrecognised environment variable: {}",
                source
            ))),
        },
        Term::Invocation(Invocation::This) => match &scope.this {
            Some(this) => Ok(this.as_ref().clone().with_source(source)),
            None => Err(QueryError::Unsupported(
                "$this can only be used within the context of arguments to a function".to_string(),
            )),
        },
        Term::Invocation(Invocation::Index) | Term::Invocation(Invocation::Total) => Err(
            QueryError::Unsupported(format!("{} is not supported", source)),
        ),
        Term::Invocation(Invocation::Member(name)) => {
            if ctx.is_record_type(name) {
                if name == ctx.subject_type() {
                    return Ok(subject_node(ctx).with_source(source));
                }
                return Ok(CompiledExpression::root(name).with_source(source));
            }
            let input = implicit_input(ctx, scope);
            path::member(ctx, &input, name, source)
        }
        Term::Invocation(invocation @ Invocation::Function(_, _)) => {
            let input = implicit_input(ctx, scope);
            compile_invocation(ctx, input, invocation, expression, scope)
        }
    }
}

/// The subject node, as its own origin.
fn subject_node(ctx: &CompilationContext) -> CompiledExpression {
    let subject = ctx.subject();
    let mut node = subject.as_ref().clone();
    node.origin = Some(subject);
    node
}

/// The input of an invocation with no explicit base: `$this` inside function
/// arguments, the subject otherwise.
fn implicit_input(ctx: &CompilationContext, scope: &Scope) -> CompiledExpression {
    match &scope.this {
        Some(this) => this.as_ref().clone(),
        None => ctx.subject().as_ref().clone(),
    }
}

fn compile_literal(literal: &Literal, source: String) -> QueryResult<CompiledExpression> {
    let invalid = |what: &str| {
        QueryError::InvalidArgument(format!("Invalid {} literal: {}", what, source))
    };
    let (value, kind, type_code) = match literal {
        Literal::Null => (Value::Null, ValueKind::Null, "null"),
        Literal::Boolean(b) => (Value::Boolean(*b), ValueKind::Boolean, "boolean"),
        Literal::String(s) => (Value::String(s.clone()), ValueKind::String, "string"),
        Literal::Integer(i) => (Value::Integer(*i), ValueKind::Integer, "integer"),
        Literal::Number(d) => (Value::Decimal(*d), ValueKind::Decimal, "decimal"),
        Literal::Date(text) => (
            Value::Date(parse_date_prefix(text).ok_or_else(|| invalid("date"))?),
            ValueKind::Date,
            "date",
        ),
        Literal::DateTime(text) => (
            Value::DateTime(parse_date_time(text).ok_or_else(|| invalid("dateTime"))?),
            ValueKind::DateTime,
            "dateTime",
        ),
        Literal::Time(text) => (
            Value::Time(parse_time(text).ok_or_else(|| invalid("time"))?),
            ValueKind::Time,
            "time",
        ),
        Literal::Coding(coding) => (Value::Coding(coding.clone()), ValueKind::Coding, "Coding"),
        Literal::Quantity(_, _) => {
            return Err(QueryError::Unsupported(format!(
                "Quantity literals are not supported: {}",
                source
            )));
        }
    };
    Ok(CompiledExpression::literal(source, value, kind, type_code))
}
