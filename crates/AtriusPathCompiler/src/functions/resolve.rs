//! Reference traversal: `resolve()`, `ofType(T)` and `reverseResolve(T.field)`.
//!
//! `resolve()` follows a reference forwards to the record it points at. When
//! the reference may point at several record types the result stays
//! polymorphic, with no join, until `ofType` picks one. `reverseResolve`
//! goes the other way and finds every record of a type whose reference field
//! points at the input.

use atrius_path_support::{Cardinality, QueryError, QueryResult, ValueKind};

use super::FunctionInput;
use crate::context::CompilationContext;
use crate::expression::{CompiledExpression, Shape};
use crate::join::{JoinKind, JoinTarget};
use crate::parser::{Expression, Invocation, Term};
use crate::path::origin_of;
use crate::plan::Expr;

/// The node for `record_type` records reached through `join_target`.
fn resolved(
    ctx: &mut CompilationContext,
    input: &CompiledExpression,
    source: String,
    record_type: &str,
) -> QueryResult<CompiledExpression> {
    let join = ctx.join(
        JoinKind::Reference,
        JoinTarget::Resolve {
            record_type: record_type.to_string(),
            reference: input.value.clone(),
        },
    );
    Ok(CompiledExpression {
        source,
        kind: ValueKind::Reference,
        type_code: Some(record_type.to_string()),
        cardinality: input.cardinality,
        literal: None,
        shape: Shape::Resource(record_type.to_string()),
        value: Expr::column(join.alias.clone(), vec![]),
        joins: input.joins.with(join)?,
        aggregate: None,
        origin: origin_of(input),
    })
}

pub fn resolve_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    call.expect_no_arguments()?;
    let input = call.input;
    let Shape::Reference(targets) = &input.shape else {
        return Err(QueryError::Type(format!(
            "Input to resolve function must be a Reference: {}",
            call.source
        )));
    };

    match targets.as_slice() {
        [] => Err(QueryError::Type(format!(
            "Reference can not be resolved to any known resource type: {}",
            call.source
        ))),
        [record_type] => {
            let record_type = record_type.clone();
            resolved(ctx, &input, call.source, &record_type)
        }
        _ => {
            let targets = targets.clone();
            Ok(CompiledExpression {
                source: call.source,
                type_code: None,
                shape: Shape::Polymorphic(targets),
                origin: origin_of(&input),
                ..input
            })
        }
    }
}

/// The bare type name given as an argument, e.g. `Patient` in `ofType(Patient)`.
fn type_argument<'a>(call: &'a FunctionInput<'_>) -> Option<&'a str> {
    match call.arguments {
        [Expression::Term(Term::Invocation(Invocation::Member(name)))] => Some(name),
        _ => None,
    }
}

pub fn of_type_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    let record_type = type_argument(&call)
        .ok_or_else(|| {
            QueryError::InvalidArgument(format!(
                "ofType function accepts one argument naming a resource type: {}",
                call.source
            ))
        })?
        .to_string();
    let input = &call.input;

    match &input.shape {
        Shape::Polymorphic(targets) if targets.contains(&record_type) => {
            let input = input.clone();
            resolved(ctx, &input, call.source, &record_type)
        }
        Shape::Resource(t) if *t == record_type => Ok(input.clone().with_source(call.source)),
        Shape::Polymorphic(targets) => Err(QueryError::Type(format!(
            "Reference can not refer to {}, only to {}: {}",
            record_type,
            targets.join(", "),
            call.source
        ))),
        _ => Err(QueryError::Type(format!(
            "Input to ofType function must be a resolved reference or a {} resource: {}",
            record_type, call.source
        ))),
    }
}

/// The dotted path given as an argument, e.g. `Condition.subject` in
/// `reverseResolve(Condition.subject)`, read without compiling it.
fn path_argument(argument: &Expression) -> Option<Vec<String>> {
    match argument {
        Expression::Term(Term::Invocation(Invocation::Member(name))) => Some(vec![name.clone()]),
        Expression::Invocation(base, Invocation::Member(name)) => {
            let mut path = path_argument(base)?;
            path.push(name.clone());
            Some(path)
        }
        _ => None,
    }
}

pub fn reverse_resolve_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    let input = &call.input;
    let Some(anchor_type) = input.resource_type().map(str::to_string) else {
        return Err(QueryError::Type(format!(
            "Input to reverseResolve function must be a Resource: {}",
            call.source
        )));
    };

    let [argument] = call.arguments else {
        return Err(QueryError::InvalidArgument(format!(
            "reverseResolve function accepts one argument: {}",
            call.source
        )));
    };
    let not_a_reference_path = || {
        QueryError::InvalidArgument(format!(
            "Argument to reverseResolve function must be a path to a reference element of a resource: {}",
            call.source
        ))
    };

    let (record_type, field) = match path_argument(argument) {
        Some(mut path) if path.len() > 1 && ctx.is_record_type(&path[0]) => {
            let field = path.split_off(1);
            (path.remove(0), field)
        }
        _ => return Err(not_a_reference_path()),
    };

    let mut type_name = record_type.clone();
    let mut element = None;
    for name in &field {
        let definition = ctx.schema().element(&type_name, name)?;
        type_name = definition.type_code.clone();
        element = Some(definition);
    }
    let targets = match element {
        Some(element) if element.is_reference() => &element.targets,
        _ => return Err(not_a_reference_path()),
    };
    if !targets.contains(&anchor_type) {
        return Err(QueryError::Type(format!(
            "Reference {} can not refer to {}: {}",
            argument, anchor_type, call.source
        )));
    }

    let join = ctx.join(
        JoinKind::ReverseReference,
        JoinTarget::ReverseResolve {
            record_type: record_type.clone(),
            field,
            anchor_type,
            anchor: input.identity(),
        },
    );

    Ok(CompiledExpression {
        source: call.source,
        kind: ValueKind::Reference,
        type_code: Some(record_type.clone()),
        cardinality: Cardinality::Collection,
        literal: None,
        shape: Shape::Resource(record_type),
        value: Expr::column(join.alias.clone(), vec![]),
        joins: input.joins.with(join)?,
        aggregate: None,
        origin: origin_of(input),
    })
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::context::{CompilationContext, CompilerConfig};
    use crate::expression::Shape;
    use crate::join::{JoinKind, JoinTarget};
    use atrius_path_support::{Cardinality, QueryError};

    fn context(subject: &str) -> CompilationContext {
        let config = CompilerConfig::r4().unwrap();
        let types = ["Patient", "Condition", "Encounter", "Organization", "Group"]
            .into_iter()
            .map(String::from)
            .collect();
        CompilationContext::new(&config, subject, types).unwrap()
    }

    #[test]
    fn test_resolve_single_target() {
        let mut ctx = context("Patient");
        let compiled = compile("managingOrganization.resolve()", &mut ctx).unwrap();
        assert_eq!(compiled.shape, Shape::Resource("Organization".into()));
        let join = compiled.joins.iter().next().unwrap();
        assert_eq!(join.kind, JoinKind::Reference);
        assert_eq!(
            join.to_string(),
            "LEFT JOIN Organization AS j1 ON j1.id = \
             REFERENCE_KEY(Patient.managingOrganization, 'Organization')"
        );

        let name = compile("managingOrganization.resolve().name", &mut ctx).unwrap();
        assert_eq!(name.value.to_string(), "j1.name");
        assert_eq!(name.joins.len(), 1);
    }

    #[test]
    fn test_resolve_polymorphic_needs_of_type() {
        let mut ctx = context("Condition");
        let polymorphic = compile("subject.resolve()", &mut ctx).unwrap();
        assert!(matches!(polymorphic.shape, Shape::Polymorphic(_)));
        assert!(polymorphic.joins.is_empty());

        let err = compile("subject.resolve().gender", &mut ctx).unwrap_err();
        assert!(err.to_string().contains("use ofType"));

        let gender = compile("subject.resolve().ofType(Patient).gender", &mut ctx).unwrap();
        assert_eq!(gender.value.to_string(), "j1.gender");
        assert!(compile("subject.resolve().ofType(Encounter)", &mut ctx).is_err());
    }

    #[test]
    fn test_resolve_rejects_non_reference() {
        let mut ctx = context("Patient");
        let err = compile("gender.resolve()", &mut ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type error: Input to resolve function must be a Reference: gender.resolve()"
        );
    }

    #[test]
    fn test_reverse_resolve() {
        let mut ctx = context("Patient");
        let compiled = compile("reverseResolve(Condition.subject)", &mut ctx).unwrap();
        assert_eq!(compiled.shape, Shape::Resource("Condition".into()));
        assert_eq!(compiled.cardinality, Cardinality::Collection);
        let join = compiled.joins.iter().next().unwrap();
        assert_eq!(
            join.to_string(),
            "LEFT JOIN Condition AS j1 ON REFERS_TO(j1.subject, 'Patient', Patient.id)"
        );

        let codes = compile("reverseResolve(Condition.subject).code.coding", &mut ctx).unwrap();
        assert_eq!(codes.joins.len(), 2);
        assert!(codes.joins.iter().any(|j| j.alias == join.alias));
    }

    #[test]
    fn test_reverse_resolve_through_repeating_element() {
        let mut ctx = context("Patient");
        let compiled = compile("reverseResolve(Group.member.entity)", &mut ctx).unwrap();
        assert_eq!(compiled.shape, Shape::Resource("Group".into()));
        let join = compiled
            .joins
            .iter()
            .find(|j| j.kind == JoinKind::ReverseReference)
            .unwrap();
        assert_eq!(
            join.to_string(),
            format!(
                "LEFT JOIN Group AS {} ON REFERS_TO({}.member.entity, 'Patient', Patient.id)",
                join.alias, join.alias
            )
        );
        // Encounter.participant.individual targets Practitioner only.
        let err = compile("reverseResolve(Encounter.participant.individual)", &mut ctx);
        assert!(matches!(err, Err(QueryError::Type(_))));

        let mut ctx = context("Organization");
        let compiled = compile("reverseResolve(Encounter.serviceProvider)", &mut ctx).unwrap();
        let join = compiled.joins.iter().next().unwrap();
        let JoinTarget::ReverseResolve { field, .. } = &join.target else {
            panic!("expected reverse join");
        };
        assert_eq!(field, &vec!["serviceProvider".to_string()]);
    }

    #[test]
    fn test_reverse_resolve_argument_allocates_no_joins() {
        let mut ctx = context("Patient");
        let compiled = compile("reverseResolve(Group.member.entity)", &mut ctx).unwrap();
        assert_eq!(compiled.joins.len(), 1);
        let join = compiled.joins.iter().next().unwrap();
        assert_eq!(join.alias.to_string(), "j1");

        let names = compile("name.given", &mut ctx).unwrap();
        let aliases: Vec<String> = names.joins.iter().map(|j| j.alias.to_string()).collect();
        assert_eq!(aliases, vec!["j2", "j3"]);
    }

    #[test]
    fn test_reverse_resolve_argument_errors() {
        let mut ctx = context("Patient");
        let err = compile("reverseResolve(Condition.code)", &mut ctx).unwrap_err();
        assert!(err
            .to_string()
            .contains("must be a path to a reference element of a resource"));

        let err = compile("reverseResolve(Encounter.serviceProvider)", &mut ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type error: Reference Encounter.serviceProvider can not refer to Patient: \
             reverseResolve(Encounter.serviceProvider)"
        );

        let err = compile("gender.reverseResolve(Condition.subject)", &mut ctx).unwrap_err();
        assert!(err.to_string().contains("must be a Resource"));

        for argument in ["Condition", "subject", "Condition.subject.first()", "'Condition.subject'"] {
            let err = compile(&format!("reverseResolve({})", argument), &mut ctx).unwrap_err();
            assert!(matches!(err, QueryError::InvalidArgument(_)), "{}", argument);
        }
        let err = compile("reverseResolve(Condition.missing)", &mut ctx).unwrap_err();
        assert!(matches!(err, QueryError::UnknownElement { .. }));
    }
}
