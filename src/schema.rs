//! Events JSON schema
//!
//! The schema is loaded and compiled once at startup. Validation itself is
//! delegated to the `jsonschema` crate; this module only turns its output
//! into a pass/fail report with printable diagnostics.

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Where the schema document comes from
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// A JSON file on disk
    File(PathBuf),
    /// An already parsed document
    Inline(Value),
}

impl SchemaSource {
    /// Read and compile the schema
    pub fn load(&self) -> Result<SchemaValidator> {
        match self {
            SchemaSource::File(path) => SchemaValidator::from_file(path),
            SchemaSource::Inline(document) => SchemaValidator::compile(document.clone()),
        }
    }

    /// Human-readable origin, for logs
    pub fn describe(&self) -> String {
        match self {
            SchemaSource::File(path) => path.display().to_string(),
            SchemaSource::Inline(_) => "inline".to_string(),
        }
    }
}

/// Result of validating one document
#[derive(Debug, Clone, Default)]
pub struct SchemaReport {
    /// One entry per violation, empty when the document is valid
    pub diagnostics: Vec<String>,
}

impl SchemaReport {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Compiled events schema
pub struct SchemaValidator {
    validator: jsonschema::Validator,
    document: Value,
}

impl SchemaValidator {
    /// Compile a schema document
    pub fn compile(document: Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&document)
            .map_err(|e| Error::schema(format!("Invalid events schema: {}", e)))?;

        Ok(Self {
            validator,
            document,
        })
    }

    /// Load and compile a schema file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::schema(format!("Could not read schema {}: {}", path.display(), e))
        })?;
        let document: Value = serde_json::from_str(&contents).map_err(|e| {
            Error::schema(format!("Schema {} is not valid JSON: {}", path.display(), e))
        })?;

        Self::compile(document)
    }

    /// Validate a submission payload
    pub fn validate(&self, instance: &Value) -> SchemaReport {
        SchemaReport {
            diagnostics: self
                .validator
                .iter_errors(instance)
                .map(|error| error.to_string())
                .collect(),
        }
    }

    /// The source document
    pub fn document(&self) -> &Value {
        &self.document
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}
