//! # Terminology and Value-Set Cache
//!
//! `memberOf` needs the expansion of a value set as a relation the engine can
//! join against. The [`ValueSetCache`] holds those expansions, keyed by a table
//! name derived from the value-set URL, and fills itself from a
//! [`TerminologyProvider`] on first use.
//!
//! Materialisation is best effort: the existence check and the insert are not
//! atomic, so two requests racing on the same URL may both expand it. Both
//! produce the same rows and the last writer wins.

use atrius_path_support::{Coding, QueryError, QueryResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

/// Expands value sets and checks codes against them.
///
/// Implementations are synchronous; the compiler calls them while compiling
/// `memberOf`.
pub trait TerminologyProvider: Send + Sync {
    /// Every coding in the value set identified by `url`.
    fn expand(&self, url: &str) -> QueryResult<Vec<Coding>>;

    /// Whether `coding` is in the value set.
    ///
    /// Returns `None` when the coding lacks a system or code.
    fn validate_code(&self, url: &str, coding: &Coding) -> QueryResult<Option<bool>> {
        if coding.system.is_none() || coding.code.is_none() {
            return Ok(None);
        }
        let expansion = self.expand(url)?;
        Ok(Some(
            expansion
                .iter()
                .any(|member| member.equals(coding) == Some(true)),
        ))
    }
}

/// The materialised expansion of one value set.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSetExpansion {
    pub url: String,
    pub table: String,
    pub codings: Vec<Coding>,
}

impl ValueSetExpansion {
    /// Whether any coding of the expansion has coded equality with `coding`.
    pub fn contains(&self, coding: &Coding) -> Option<bool> {
        if coding.system.is_none() || coding.code.is_none() {
            return None;
        }
        Some(
            self.codings
                .iter()
                .any(|member| member.equals(coding) == Some(true)),
        )
    }
}

/// Value-set expansions shared across requests, keyed by table name.
#[derive(Debug, Default)]
pub struct ValueSetCache {
    tables: RwLock<HashMap<String, Arc<ValueSetExpansion>>>,
}

impl ValueSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table name an expansion of `url` is stored under.
    pub fn table_name(url: &str) -> String {
        format!("valueset_{:016x}", xxh3_64(url.as_bytes()))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    pub fn get(&self, table: &str) -> Option<Arc<ValueSetExpansion>> {
        self.tables.read().get(table).cloned()
    }

    pub fn insert(&self, url: &str, codings: Vec<Coding>) -> Arc<ValueSetExpansion> {
        let table = Self::table_name(url);
        let expansion = Arc::new(ValueSetExpansion {
            url: url.to_string(),
            table: table.clone(),
            codings,
        });
        self.tables.write().insert(table, expansion.clone());
        expansion
    }

    /// Makes sure the expansion of `url` is present, expanding it with
    /// `provider` if it is not, and returns its table name.
    pub fn materialise(
        &self,
        url: &str,
        provider: Option<&dyn TerminologyProvider>,
    ) -> QueryResult<String> {
        let table = Self::table_name(url);
        if self.contains(&table) {
            debug!(url, table = %table, "Value set already materialised");
            return Ok(table);
        }
        let provider = provider.ok_or_else(|| {
            QueryError::Terminology(format!(
                "No terminology service configured to expand value set {}",
                url
            ))
        })?;
        // Expansion runs outside the lock.
        let codings = provider.expand(url)?;
        info!(url, table = %table, codes = codings.len(), "Materialised value set");
        self.insert(url, codings);
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl TerminologyProvider for CountingProvider {
        fn expand(&self, _url: &str) -> QueryResult<Vec<Coding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Coding::new("http://snomed.info/sct", "73211009")])
        }
    }

    #[test]
    fn test_table_name_is_stable() {
        let a = ValueSetCache::table_name("http://example.org/vs");
        let b = ValueSetCache::table_name("http://example.org/vs");
        let c = ValueSetCache::table_name("http://example.org/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("valueset_"));
        assert_eq!(a.len(), "valueset_".len() + 16);
    }

    #[test]
    fn test_materialise_expands_once() {
        let cache = ValueSetCache::new();
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
        };
        let url = "http://snomed.info/sct?fhir_vs=refset/32570521000036109";
        let first = cache.materialise(url, Some(&provider)).unwrap();
        let second = cache.materialise(url, Some(&provider)).unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let expansion = cache.get(&first).unwrap();
        assert_eq!(
            expansion.contains(&Coding::new("http://snomed.info/sct", "73211009")),
            Some(true)
        );
        assert_eq!(
            expansion.contains(&Coding::new("http://snomed.info/sct", "1")),
            Some(false)
        );
    }

    #[test]
    fn test_materialise_without_provider_fails() {
        let cache = ValueSetCache::new();
        let err = cache.materialise("http://example.org/vs", None).unwrap_err();
        assert!(matches!(err, QueryError::Terminology(_)));
    }

    #[test]
    fn test_default_validate_code() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
        };
        let known = Coding::new("http://snomed.info/sct", "73211009");
        assert_eq!(provider.validate_code("vs", &known).unwrap(), Some(true));
        assert_eq!(provider.validate_code("vs", &Coding::default()).unwrap(), None);
    }
}
