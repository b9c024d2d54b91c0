//! Assembles compiled request parts into one [`QueryPlan`].
//!
//! Filters are ANDed before grouping, grouping values form the group key and
//! the aggregate forms of the aggregations form the select list. The joins of
//! every part are merged into one set, so a join that two parts share (same
//! target, same alias) appears once.
//!
//! Aggregations whose inputs unnest independent collections multiply each
//! other's rows. Counts of record identities are unaffected since they count
//! distinct ids; other combinations are not corrected for.

use atrius_path_compiler::{
    Alias, CompiledExpression, Expr, JoinKind, JoinSet, JoinTarget, QueryPlan, Shape,
};
use atrius_path_support::{QueryError, QueryResult, ValueKind};
use tracing::debug;

/// The compiled parts of one request.
#[derive(Debug, Clone, Default)]
pub struct CompiledRequest {
    pub filters: Vec<CompiledExpression>,
    pub groupings: Vec<CompiledExpression>,
    pub aggregations: Vec<CompiledExpression>,
}

pub fn check_filter(filter: &CompiledExpression) -> QueryResult<()> {
    if !filter.is_boolean() || !filter.is_singular() {
        return Err(QueryError::Type(format!(
            "Filter expression must be a singular Boolean value: {}",
            filter.source
        )));
    }
    Ok(())
}

pub fn check_grouping(grouping: &CompiledExpression) -> QueryResult<()> {
    if grouping.shape != Shape::Primitive && grouping.kind != ValueKind::Coding {
        return Err(QueryError::Type(format!(
            "Grouping expression must be a primitive or Coding value: {}",
            grouping.source
        )));
    }
    Ok(())
}

pub fn check_aggregation(aggregation: &CompiledExpression) -> QueryResult<()> {
    if aggregation.aggregate.is_none() {
        return Err(QueryError::Type(format!(
            "Aggregation expression must be an aggregate function: {}",
            aggregation.source
        )));
    }
    Ok(())
}

pub fn plan(subject: &Alias, request: &CompiledRequest) -> QueryResult<QueryPlan> {
    let mut parts: Vec<(&str, Expr, &JoinSet)> = Vec::new();
    for filter in &request.filters {
        check_filter(filter)?;
        parts.push((filter.source.as_str(), filter.value.clone(), &filter.joins));
    }
    for grouping in &request.groupings {
        check_grouping(grouping)?;
        parts.push((grouping.source.as_str(), grouping.value.clone(), &grouping.joins));
    }
    let mut aggregations = Vec::with_capacity(request.aggregations.len());
    for aggregation in &request.aggregations {
        check_aggregation(aggregation)?;
        if let Some(form) = &aggregation.aggregate {
            parts.push((aggregation.source.as_str(), form.function.expr().clone(), &form.joins));
            aggregations.push(form.function.clone());
        }
    }

    let mut joins = JoinSet::new();
    for (_, _, part) in &parts {
        joins = joins.merge(part)?;
    }
    for (source, value, _) in &parts {
        joins.check_reachable(subject, source, &[value])?;
    }

    let mut value_sets: Vec<String> = joins
        .iter()
        .filter(|join| join.kind == JoinKind::ValueSet)
        .filter_map(|join| match &join.target {
            JoinTarget::ValueSet { table, .. } => Some(table.clone()),
            _ => None,
        })
        .collect();
    value_sets.sort();
    value_sets.dedup();

    let plan = QueryPlan {
        subject: subject.clone(),
        joins: joins.in_dependency_order().into_iter().cloned().collect(),
        filters: request.filters.iter().map(|f| f.value.clone()).collect(),
        groupings: request.groupings.iter().map(|g| g.value.clone()).collect(),
        aggregations,
        value_sets,
    };
    debug!(joins = plan.joins.len(), value_sets = plan.value_sets.len(), "Planned query");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrius_path_compiler::{CompilationContext, CompilerConfig, compile};

    fn context() -> CompilationContext {
        let config = CompilerConfig::r4().unwrap();
        let types = ["Patient", "Condition"].into_iter().map(String::from).collect();
        CompilationContext::new(&config, "Patient", types).unwrap()
    }

    fn compiled(ctx: &mut CompilationContext, texts: &[&str]) -> Vec<CompiledExpression> {
        texts.iter().map(|t| compile(t, ctx).unwrap()).collect()
    }

    #[test]
    fn test_shared_joins_appear_once() {
        let mut ctx = context();
        let request = CompiledRequest {
            filters: vec![],
            groupings: compiled(&mut ctx, &["name.given"]),
            aggregations: compiled(&mut ctx, &["count()", "name.given.count()"]),
        };
        let plan = plan(&ctx.subject_alias(), &request).unwrap();
        assert_eq!(plan.joins.len(), 2);
        assert_eq!(
            plan.to_string(),
            "SELECT j2, COUNT(DISTINCT Patient.id), COUNT(j2)\n\
             FROM Patient AS Patient\n\
             LEFT JOIN LATERAL UNNEST(Patient.name) AS j1\n\
             LEFT JOIN LATERAL UNNEST(j1.given) AS j2\n\
             GROUP BY j2"
        );
    }

    #[test]
    fn test_part_checks() {
        let mut ctx = context();
        let request = CompiledRequest {
            aggregations: compiled(&mut ctx, &["gender"]),
            ..Default::default()
        };
        let err = plan(&ctx.subject_alias(), &request).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type error: Aggregation expression must be an aggregate function: gender"
        );

        let request = CompiledRequest {
            groupings: compiled(&mut ctx, &["name"]),
            aggregations: compiled(&mut ctx, &["count()"]),
            ..Default::default()
        };
        let err = plan(&ctx.subject_alias(), &request).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type error: Grouping expression must be a primitive or Coding value: name"
        );

        let request = CompiledRequest {
            filters: compiled(&mut ctx, &["gender"]),
            aggregations: compiled(&mut ctx, &["count()"]),
            ..Default::default()
        };
        assert!(plan(&ctx.subject_alias(), &request).is_err());
    }

    #[test]
    fn test_unreachable_root_is_rejected() {
        let mut ctx = context();
        let request = CompiledRequest {
            groupings: compiled(&mut ctx, &["Condition.clinicalStatus.coding.code"]),
            aggregations: compiled(&mut ctx, &["count()"]),
            ..Default::default()
        };
        let err = plan(&ctx.subject_alias(), &request).unwrap_err();
        assert!(err.to_string().contains("cannot be reached from subject resource Patient"));
    }

    #[test]
    fn test_filters_are_kept_in_order() {
        let mut ctx = context();
        let request = CompiledRequest {
            filters: compiled(&mut ctx, &["gender = 'female'", "active = true"]),
            aggregations: compiled(&mut ctx, &["count()"]),
            ..Default::default()
        };
        let plan = plan(&ctx.subject_alias(), &request).unwrap();
        assert_eq!(plan.filters.len(), 2);
        assert!(plan.to_string().contains("WHERE (Patient.gender = 'female') AND "));
        assert!(plan.value_sets.is_empty());
    }
}
