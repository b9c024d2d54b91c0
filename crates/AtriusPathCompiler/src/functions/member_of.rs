//! `memberOf(url)`.
//!
//! The expansion of the value set is materialised once per url as a table
//! in the value-set cache, and the input coding is left joined against it.
//! Membership is "the join matched"; an absent input gives an empty result.
//! The check applies element by element, so a collection of codings gives a
//! collection of booleans.

use atrius_path_support::{QueryError, QueryResult, ValueKind};

use super::FunctionInput;
use crate::context::CompilationContext;
use crate::expression::{CompiledExpression, Shape};
use crate::join::{JoinKind, JoinTarget};
use crate::plan::Expr;

pub fn member_of_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    let usage = "memberOf function accepts one argument of type String";
    let url = call.string_argument(ctx, usage)?;
    let input = &call.input;
    if input.is_literal() || !(input.kind == ValueKind::Coding || input.is_codeable_concept()) {
        return Err(QueryError::Type(format!(
            "Input to memberOf function must be a Coding or CodeableConcept: {}",
            call.source
        )));
    }

    let table = ctx.value_set_cache().materialise(&url, ctx.terminology())?;
    let join = ctx.join(
        JoinKind::ValueSet,
        JoinTarget::ValueSet {
            table,
            coding: input.value.clone(),
        },
    );
    let value = Expr::Case {
        when: Box::new(Expr::IsNotNull(Box::new(input.value.clone()))),
        then: Box::new(Expr::IsNotNull(Box::new(Expr::column(
            join.alias.clone(),
            vec![],
        )))),
        otherwise: Box::new(Expr::null()),
    };

    Ok(CompiledExpression {
        source: call.source.clone(),
        kind: ValueKind::Boolean,
        type_code: Some("boolean".to_string()),
        cardinality: input.cardinality,
        literal: None,
        shape: Shape::Primitive,
        value,
        joins: input.joins.with(join)?,
        aggregate: None,
        origin: input.origin.clone(),
    })
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::context::{CompilationContext, CompilerConfig};
    use crate::join::{JoinKind, JoinTarget};
    use crate::terminology::{TerminologyProvider, ValueSetCache};
    use atrius_path_support::{Coding, QueryError, QueryResult};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const URL: &str = "http://example.org/fhir/ValueSet/diabetes";

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl TerminologyProvider for CountingProvider {
        fn expand(&self, _url: &str) -> QueryResult<Vec<Coding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Coding::new("http://snomed.info/sct", "73211009")])
        }
    }

    fn context(provider: Option<Arc<CountingProvider>>) -> CompilationContext {
        let mut config = CompilerConfig::r4().unwrap();
        if let Some(provider) = provider {
            config = config.with_terminology_provider(provider);
        }
        CompilationContext::new(&config, "Condition", BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_member_of_concept() {
        let provider = Arc::new(CountingProvider::default());
        let mut ctx = context(Some(provider.clone()));
        let compiled = compile(&format!("code.memberOf('{}')", URL), &mut ctx).unwrap();
        assert!(compiled.is_boolean());
        assert!(compiled.is_singular());

        let join = compiled.joins.iter().next().unwrap();
        assert_eq!(join.kind, JoinKind::ValueSet);
        let JoinTarget::ValueSet { table, .. } = &join.target else {
            panic!("expected value set join");
        };
        assert_eq!(table, &ValueSetCache::table_name(URL));
        assert!(ctx.value_set_cache().contains(table));
        assert_eq!(
            compiled.value.to_string(),
            format!(
                "CASE WHEN Condition.code IS NOT NULL THEN {} IS NOT NULL ELSE NULL END",
                join.alias
            )
        );
    }

    #[test]
    fn test_value_set_is_expanded_once() {
        let provider = Arc::new(CountingProvider::default());
        let mut ctx = context(Some(provider.clone()));
        compile(&format!("code.memberOf('{}')", URL), &mut ctx).unwrap();
        compile(&format!("code.memberOf('{}').not()", URL), &mut ctx).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_member_of_without_terminology() {
        let mut ctx = context(None);
        let err = compile(&format!("code.memberOf('{}')", URL), &mut ctx).unwrap_err();
        assert!(matches!(err, QueryError::Terminology(_)));
    }

    #[test]
    fn test_member_of_argument_must_be_string() {
        let provider = Arc::new(CountingProvider::default());
        let mut ctx = context(Some(provider));
        let err = compile("code.memberOf(5)", &mut ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: memberOf function accepts one argument of type String: code.memberOf(5)"
        );
        assert!(compile(&format!("onsetDateTime.memberOf('{}')", URL), &mut ctx).is_err());
    }

    #[test]
    fn test_member_of_allowed_in_where_on_collection() {
        let provider = Arc::new(CountingProvider::default());
        let mut ctx = context(Some(provider));
        let compiled = compile(
            &format!("code.coding.where($this.memberOf('{}')).count()", URL),
            &mut ctx,
        );
        assert!(compiled.is_ok());
    }
}
