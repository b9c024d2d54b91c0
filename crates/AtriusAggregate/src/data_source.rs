//! # Data Loading
//!
//! Loads FHIR resources into an [`InMemoryReader`] from:
//!
//! - **Directories** of `<Type>.ndjson` files (and `.json` Bundles), parsed in
//!   parallel with rayon
//! - **NDJSON files**: one resource per line, blank lines ignored
//! - **JSON files**: a Bundle, a single resource or an array of resources
//!
//! Every resource needs a `resourceType` and an `id`. An invalid line fails the
//! load with its line number unless invalid input is skipped, in which case it
//! is logged and left out.

use atrius_path_compiler::InMemoryReader;
use atrius_path_support::QueryError;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while loading resource data.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A file or directory could not be read.
    #[error("Cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The content is not a Bundle, resource, array of resources or NDJSON.
    #[error("Invalid content in '{source_name}': {message}")]
    InvalidContent {
        source_name: String,
        message: String,
    },

    /// A parsed resource was rejected by the reader.
    #[error("Invalid resource in '{source_name}': {error}")]
    InvalidResource {
        source_name: String,
        error: QueryError,
    },
}

impl LoadError {
    fn invalid(source_name: &str, message: impl Into<String>) -> Self {
        LoadError::InvalidContent {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }
}

/// Reads resources from NDJSON and JSON sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct NdjsonReader {
    skip_invalid: bool,
}

impl NdjsonReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and skip invalid lines and resources instead of failing.
    pub fn with_skip_invalid(mut self, skip_invalid: bool) -> Self {
        self.skip_invalid = skip_invalid;
        self
    }

    /// Loads a directory, an NDJSON file or a JSON file, by what `path` is.
    pub fn load_path(&self, path: &Path) -> Result<InMemoryReader, LoadError> {
        if path.is_dir() {
            return self.load_directory(path);
        }
        let resources = self.read_file(path)?;
        self.into_reader(vec![(path.display().to_string(), resources)])
    }

    /// Loads every `.ndjson` and `.json` file in `dir`.
    pub fn load_directory(&self, dir: &Path) -> Result<InMemoryReader, LoadError> {
        let io_error = |source| LoadError::Io {
            path: dir.display().to_string(),
            source,
        };
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_error)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("ndjson") | Some("json")
                    )
            })
            .collect();
        files.sort();

        let failures = Mutex::new(Vec::new());
        let loaded: Vec<(String, Vec<JsonValue>)> = files
            .par_iter()
            .filter_map(|path| match self.read_file(path) {
                Ok(resources) => Some((path.display().to_string(), resources)),
                Err(error) => {
                    failures.lock().push(error);
                    None
                }
            })
            .collect();
        if let Some(error) = failures.into_inner().into_iter().next() {
            return Err(error);
        }

        for (source_name, resources) in &loaded {
            let expected = Path::new(source_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let mismatched = resources
                .iter()
                .filter(|r| r.get("resourceType").and_then(|t| t.as_str()) != Some(expected))
                .count();
            if source_name.ends_with(".ndjson") && mismatched > 0 {
                warn!(file = %source_name, mismatched, "Resources do not match the file's type");
            }
        }
        info!(directory = %dir.display(), files = loaded.len(), "Loaded data directory");
        self.into_reader(loaded)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<JsonValue>, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let source_name = path.display().to_string();
        if path.extension().and_then(|e| e.to_str()) == Some("ndjson") {
            self.parse_ndjson(&text, &source_name)
        } else {
            parse_json(&text, &source_name)
        }
    }

    /// Parses NDJSON text, one resource per non-blank line.
    pub fn parse_ndjson(&self, text: &str, source_name: &str) -> Result<Vec<JsonValue>, LoadError> {
        let mut resources = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<JsonValue>(line)
                .map_err(|e| e.to_string())
                .and_then(|value| {
                    if value.get("resourceType").and_then(|t| t.as_str()).is_some() {
                        Ok(value)
                    } else {
                        Err("Missing 'resourceType' field".to_string())
                    }
                });
            match parsed {
                Ok(value) => resources.push(value),
                Err(message) if self.skip_invalid => {
                    warn!(source = source_name, line = number + 1, error = %message, "Skipping invalid line");
                }
                Err(message) => {
                    return Err(LoadError::invalid(
                        source_name,
                        format!("Line {}: {}", number + 1, message),
                    ));
                }
            }
        }
        Ok(resources)
    }

    fn into_reader(&self, sources: Vec<(String, Vec<JsonValue>)>) -> Result<InMemoryReader, LoadError> {
        let mut reader = InMemoryReader::new();
        for (source_name, resources) in sources {
            for resource in resources {
                match reader.add_resource(resource) {
                    Ok(()) => {}
                    Err(error) if self.skip_invalid => {
                        warn!(source = %source_name, error = %error, "Skipping invalid resource");
                    }
                    Err(error) => return Err(LoadError::InvalidResource { source_name, error }),
                }
            }
        }
        info!(resources = reader.len(), "Loaded resources");
        Ok(reader)
    }
}

/// Parses a Bundle, a single resource or an array of resources.
pub fn parse_json(text: &str, source_name: &str) -> Result<Vec<JsonValue>, LoadError> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| LoadError::invalid(source_name, e.to_string()))?;
    match value {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Object(_) => match value.get("resourceType").and_then(|t| t.as_str()) {
            Some("Bundle") => Ok(value
                .get("entry")
                .and_then(|e| e.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.get("resource").cloned())
                        .collect()
                })
                .unwrap_or_default()),
            Some(_) => Ok(vec![value]),
            None => Err(LoadError::invalid(source_name, "Missing 'resourceType' field")),
        },
        _ => Err(LoadError::invalid(
            source_name,
            "Expected a Bundle, a resource or an array of resources",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrius_path_compiler::ResourceReader;

    #[test]
    fn test_parse_ndjson_reports_line_numbers() {
        let text = "{\"resourceType\": \"Patient\", \"id\": \"p1\"}\n\n{not json}\n";
        let err = NdjsonReader::new().parse_ndjson(text, "Patient.ndjson").unwrap_err();
        assert!(err.to_string().starts_with("Invalid content in 'Patient.ndjson': Line 3:"));

        let resources = NdjsonReader::new()
            .with_skip_invalid(true)
            .parse_ndjson(text, "Patient.ndjson")
            .unwrap();
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn test_parse_ndjson_requires_resource_type() {
        let err = NdjsonReader::new()
            .parse_ndjson("{\"id\": \"p1\"}", "Patient.ndjson")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid content in 'Patient.ndjson': Line 1: Missing 'resourceType' field"
        );
    }

    #[test]
    fn test_parse_json_bundle() {
        let bundle = r#"{"resourceType": "Bundle", "entry": [
            {"resource": {"resourceType": "Patient", "id": "p1"}},
            {"resource": {"resourceType": "Condition", "id": "c1"}}
        ]}"#;
        let resources = parse_json(bundle, "bundle.json").unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(parse_json(r#"{"resourceType": "Patient", "id": "p1"}"#, "p.json").unwrap().len(), 1);
        assert!(parse_json("42", "x.json").is_err());
    }

    #[test]
    fn test_resource_without_id() {
        let reader = NdjsonReader::new();
        let err = reader
            .into_reader(vec![("x".into(), vec![serde_json::json!({"resourceType": "Patient"})])])
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidResource { .. }));

        let loaded = reader
            .with_skip_invalid(true)
            .into_reader(vec![("x".into(), vec![serde_json::json!({"resourceType": "Patient"})])])
            .unwrap();
        assert!(loaded.read("Patient").unwrap().records.is_empty());
    }
}
