//! Per-request compilation state.
//!
//! One [`CompilationContext`] is created for each request and passed by
//! `&mut` through every compilation call. It owns the alias generator and the
//! join memo, so every expression of a request shares one alias space and a
//! join target compiled twice gets the same alias both times.

use atrius_path_support::{QueryError, QueryResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::expression::CompiledExpression;
use crate::join::{Alias, AliasGenerator, Join, JoinKind, JoinTarget};
use crate::schema::Schema;
use crate::terminology::{TerminologyProvider, ValueSetCache};

/// Shared configuration for compiling requests.
///
/// Cheap to clone; everything is behind an `Arc`.
#[derive(Clone)]
pub struct CompilerConfig {
    pub schema: Arc<Schema>,
    pub value_set_cache: Arc<ValueSetCache>,
    pub terminology: Option<Arc<dyn TerminologyProvider>>,
}

impl CompilerConfig {
    pub fn new(schema: Arc<Schema>) -> Self {
        CompilerConfig {
            schema,
            value_set_cache: Arc::new(ValueSetCache::new()),
            terminology: None,
        }
    }

    /// A configuration over the embedded R4 schema.
    pub fn r4() -> QueryResult<Self> {
        Ok(Self::new(Schema::r4()?))
    }

    /// Attach a terminology provider, used by `memberOf` to expand value sets.
    pub fn with_terminology_provider(mut self, provider: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = Some(provider);
        self
    }

    /// Share a value-set cache with other configurations or the engine.
    pub fn with_value_set_cache(mut self, cache: Arc<ValueSetCache>) -> Self {
        self.value_set_cache = cache;
        self
    }
}

/// The binding of `$this` while compiling a function's arguments.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub this: Option<Arc<CompiledExpression>>,
    /// True while compiling criteria that are evaluated once per element of a
    /// collection. Per-subject aggregation is not available there.
    pub element: bool,
}

impl Scope {
    /// The scope of a top-level expression: no `$this`.
    pub fn top() -> Scope {
        Scope::default()
    }

    /// The scope of a function's arguments, with `$this` bound to `input`.
    pub fn argument(input: CompiledExpression, element: bool) -> Scope {
        Scope {
            this: Some(Arc::new(input)),
            element,
        }
    }
}

pub struct CompilationContext {
    config: CompilerConfig,
    subject: Arc<CompiledExpression>,
    record_types: BTreeSet<String>,
    aliases: AliasGenerator,
    memo: HashMap<(JoinKind, JoinTarget), Alias>,
}

impl CompilationContext {
    /// Creates the context for one request over `subject_type`.
    ///
    /// `record_types` are the types the reader can supply; only those the
    /// schema knows as record types are kept.
    pub fn new(
        config: &CompilerConfig,
        subject_type: &str,
        record_types: BTreeSet<String>,
    ) -> QueryResult<Self> {
        if !config.schema.is_resource(subject_type) {
            return Err(QueryError::InvalidRequest(format!(
                "Unknown subject resource type: {}",
                subject_type
            )));
        }
        let mut record_types: BTreeSet<String> = record_types
            .into_iter()
            .filter(|t| config.schema.is_resource(t))
            .collect();
        record_types.insert(subject_type.to_string());

        Ok(CompilationContext {
            config: config.clone(),
            subject: Arc::new(CompiledExpression::root(subject_type)),
            record_types,
            aliases: AliasGenerator::new(),
            memo: HashMap::new(),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.config.schema
    }

    pub fn subject(&self) -> Arc<CompiledExpression> {
        self.subject.clone()
    }

    pub fn subject_alias(&self) -> Alias {
        Alias::root(self.subject_type())
    }

    pub fn subject_type(&self) -> &str {
        self.subject.type_code()
    }

    pub fn is_record_type(&self, name: &str) -> bool {
        self.record_types.contains(name)
    }

    pub fn value_set_cache(&self) -> &Arc<ValueSetCache> {
        &self.config.value_set_cache
    }

    pub fn terminology(&self) -> Option<&dyn TerminologyProvider> {
        self.config.terminology.as_deref()
    }

    /// Returns the join for `target`, reusing the alias of an identical join
    /// created earlier in this request.
    pub fn join(&mut self, kind: JoinKind, target: JoinTarget) -> Join {
        let key = (kind, target);
        if let Some(alias) = self.memo.get(&key) {
            return Join::new(kind, alias.clone(), key.1);
        }
        let alias = self.aliases.next_alias();
        debug!(alias = %alias, kind = ?kind, "Created join");
        self.memo.insert(key.clone(), alias.clone());
        Join::new(kind, alias, key.1)
    }
}
