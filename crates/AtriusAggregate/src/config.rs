//! Library-side configuration for the aggregate executor.

use atrius_path_compiler::{CompilerConfig, Schema, TerminologyProvider, ValueSetCache};
use atrius_path_support::QueryResult;
use std::sync::Arc;

use crate::engine::{InMemoryEngine, QueryEngine};

/// Configuration shared by every request an executor handles.
///
/// # Examples
///
/// ```rust
/// use atrius_aggregate::{EngineConfig, StaticTerminology};
/// use std::sync::Arc;
///
/// let config = EngineConfig::r4()?
///     .with_terminology_provider(Arc::new(StaticTerminology::new()));
/// assert!(config.compiler().terminology.is_some());
/// # Ok::<(), atrius_path_support::QueryError>(())
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    compiler: CompilerConfig,
    engine: Arc<dyn QueryEngine>,
}

impl EngineConfig {
    pub fn new(schema: Arc<Schema>) -> Self {
        EngineConfig {
            compiler: CompilerConfig::new(schema),
            engine: Arc::new(InMemoryEngine::new()),
        }
    }

    /// A configuration over the embedded R4 schema and the in-memory engine.
    pub fn r4() -> QueryResult<Self> {
        Ok(Self::new(Schema::r4()?))
    }

    pub fn with_terminology_provider(mut self, provider: Arc<dyn TerminologyProvider>) -> Self {
        self.compiler = self.compiler.with_terminology_provider(provider);
        self
    }

    pub fn with_value_set_cache(mut self, cache: Arc<ValueSetCache>) -> Self {
        self.compiler = self.compiler.with_value_set_cache(cache);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn compiler(&self) -> &CompilerConfig {
        &self.compiler
    }

    pub fn engine(&self) -> &dyn QueryEngine {
        self.engine.as_ref()
    }

    pub fn value_set_cache(&self) -> &Arc<ValueSetCache> {
        &self.compiler.value_set_cache
    }
}
