//! Member navigation.

use atrius_path_support::{Cardinality, QueryError, QueryResult};
use std::sync::Arc;

use crate::context::CompilationContext;
use crate::expression::{CompiledExpression, Shape};
use crate::join::{JoinKind, JoinTarget};
use crate::plan::Expr;
use crate::schema::{ElementDefinition, is_primitive_type};

fn element_shape(element: &ElementDefinition) -> Shape {
    if element.is_reference() {
        Shape::Reference(element.targets.clone())
    } else if is_primitive_type(&element.type_code) {
        Shape::Primitive
    } else {
        Shape::Complex
    }
}

/// The node an expression was navigated from, carried down the path.
pub fn origin_of(input: &CompiledExpression) -> Option<Arc<CompiledExpression>> {
    input
        .origin
        .clone()
        .or_else(|| Some(Arc::new(input.clone())))
}

/// Compiles `input.name`.
///
/// A repeating element is unnested through a lateral join and the result is a
/// collection from then on.
pub fn member(
    ctx: &mut CompilationContext,
    input: &CompiledExpression,
    name: &str,
    source: String,
) -> QueryResult<CompiledExpression> {
    if input.is_literal() {
        return Err(QueryError::Type(format!(
            "Cannot navigate to {} from a literal value: {}",
            name, source
        )));
    }
    let type_name = match &input.shape {
        Shape::Polymorphic(types) => {
            return Err(QueryError::Type(format!(
                "Cannot navigate to {} from a reference that may resolve to {}; use ofType to select one: {}",
                name,
                types.join(", "),
                source
            )));
        }
        Shape::Resource(record_type) => record_type.clone(),
        _ => input.type_code().to_string(),
    };

    let element = ctx.schema().element(&type_name, name)?.clone();
    let navigated = input.value.navigate(name);

    let (value, joins, cardinality) = if element.repeating() {
        let join = ctx.join(JoinKind::Table, JoinTarget::Unnest { source: navigated });
        let value = Expr::column(join.alias.clone(), vec![]);
        (value, input.joins.with(join)?, Cardinality::Collection)
    } else {
        (
            navigated,
            input.joins.clone(),
            input.cardinality.then(Cardinality::Singular),
        )
    };

    Ok(CompiledExpression {
        source,
        kind: element.kind(),
        type_code: Some(element.type_code.clone()),
        cardinality,
        literal: None,
        shape: element_shape(&element),
        value,
        joins,
        aggregate: None,
        origin: origin_of(input),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerConfig;
    use atrius_path_support::ValueKind;
    use std::collections::BTreeSet;

    fn context() -> CompilationContext {
        let config = CompilerConfig::r4().unwrap();
        CompilationContext::new(&config, "Patient", BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_singular_member() {
        let mut ctx = context();
        let subject = ctx.subject();
        let gender = member(&mut ctx, &subject, "gender", "gender".into()).unwrap();
        assert_eq!(gender.kind, ValueKind::String);
        assert!(gender.is_singular());
        assert!(gender.joins.is_empty());
        assert_eq!(gender.value.to_string(), "Patient.gender");
        assert_eq!(gender.origin.unwrap().resource_type(), Some("Patient"));
    }

    #[test]
    fn test_repeating_member_unnests() {
        let mut ctx = context();
        let subject = ctx.subject();
        let name = member(&mut ctx, &subject, "name", "name".into()).unwrap();
        let given = member(&mut ctx, &name, "given", "name.given".into()).unwrap();
        assert_eq!(given.cardinality, Cardinality::Collection);
        assert_eq!(given.joins.len(), 2);
        assert_eq!(given.value.to_string(), "j2");
        let order: Vec<String> = given
            .joins
            .in_dependency_order()
            .iter()
            .map(|j| j.to_string())
            .collect();
        assert_eq!(
            order,
            vec![
                "LEFT JOIN LATERAL UNNEST(Patient.name) AS j1",
                "LEFT JOIN LATERAL UNNEST(j1.given) AS j2",
            ]
        );
    }

    #[test]
    fn test_unknown_member() {
        let mut ctx = context();
        let subject = ctx.subject();
        let err = member(&mut ctx, &subject, "colour", "colour".into()).unwrap_err();
        assert!(matches!(err, QueryError::UnknownElement { .. }));
    }

    #[test]
    fn test_reference_member_keeps_targets() {
        let mut ctx = context();
        let subject = ctx.subject();
        let org = member(
            &mut ctx,
            &subject,
            "managingOrganization",
            "managingOrganization".into(),
        )
        .unwrap();
        assert_eq!(org.shape, Shape::Reference(vec!["Organization".into()]));
    }
}
