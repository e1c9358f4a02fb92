//! Repository Error Types
//!
//! A single error enum covers every failure the repository layer reports:
//! expression compilation, schema definition, write conflicts, admission
//! control and backend failures. Decorators never swallow an inner failure;
//! they either propagate it unchanged or wrap it with [`RepositoryError::context`].

use crate::expressions::ExpressionType;
use std::time::Duration;
use thiserror::Error;

/// Repository operation errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The compiler has no reducer for this expression type
    #[error("Unsupported expression: {expression_type}{}", aggregate_suffix(.aggregate_only))]
    UnsupportedExpression {
        expression_type: ExpressionType,
        aggregate_only: bool,
    },

    /// A stored column has a type the declared property cannot widen to
    #[error("Schema conflict on {table}.{property}: stored as {existing}, declared as {declared}")]
    SchemaConflict {
        table: String,
        property: String,
        existing: String,
        declared: String,
    },

    /// A reference cycle could not be broken with a key-only stub
    #[error("Unresolvable reference cycle: {context}")]
    ReferenceCycle { context: String },

    /// The backend could not be reached or failed unexpectedly
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A change-feed subscriber fell behind and missed events
    #[error("Change feed on {table} lagged, {skipped} event(s) missed")]
    FeedLagged { table: String, skipped: u64 },

    /// Admission or execution exceeded its deadline
    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Optimistic version check failed
    #[error("Concurrent modification of {table}[{key}]: expected version {expected}, found {actual}")]
    ConcurrentModification {
        table: String,
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Insert of a key that already exists
    #[error("Duplicate key {key} in {table}")]
    DuplicateKey { table: String, key: String },

    /// A unique index rejected the write
    #[error("Unique constraint violated on {table}.{property}")]
    UniqueConstraint { table: String, property: String },

    /// Update of an entity that does not exist
    #[error("Entity {key} not found in {table}")]
    NotFound { table: String, key: String },

    /// Query descriptor failed validation
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Entity document is malformed (missing key, not an object)
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// Pipeline or runtime misconfiguration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Entity encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inner error enriched with what was being done
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RepositoryError>,
    },
}

fn aggregate_suffix(aggregate_only: &bool) -> &'static str {
    if *aggregate_only {
        " (only valid inside an aggregation)"
    } else {
        ""
    }
}

impl RepositoryError {
    pub fn unsupported(expression_type: ExpressionType) -> Self {
        Self::UnsupportedExpression {
            expression_type,
            aggregate_only: false,
        }
    }

    pub fn aggregate_only(expression_type: ExpressionType) -> Self {
        Self::UnsupportedExpression {
            expression_type,
            aggregate_only: true,
        }
    }

    pub fn schema_conflict(
        table: impl Into<String>,
        property: impl Into<String>,
        existing: impl ToString,
        declared: impl ToString,
    ) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            property: property.into(),
            existing: existing.to_string(),
            declared: declared.to_string(),
        }
    }

    pub fn reference_cycle(context: impl Into<String>) -> Self {
        Self::ReferenceCycle {
            context: context.into(),
        }
    }

    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn feed_lagged(table: impl Into<String>, skipped: u64) -> Self {
        Self::FeedLagged {
            table: table.into(),
            skipped,
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn concurrent_modification(
        table: impl Into<String>,
        key: impl Into<String>,
        expected: u64,
        actual: u64,
    ) -> Self {
        Self::ConcurrentModification {
            table: table.into(),
            key: key.into(),
            expected,
            actual,
        }
    }

    pub fn duplicate_key(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            key: key.into(),
        }
    }

    pub fn unique_constraint(table: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UniqueConstraint {
            table: table.into(),
            property: property.into(),
        }
    }

    pub fn not_found(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            key: key.into(),
        }
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn invalid_entity(msg: impl Into<String>) -> Self {
        Self::InvalidEntity(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap this error with a description of the enclosing operation
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping every context layer
    pub fn root_cause(&self) -> &RepositoryError {
        match self {
            Self::WithContext { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Attach context to the error of a `Result`
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_root_cause() {
        let err = RepositoryError::not_found("Product", "p-1")
            .context("resolving reference Product.vendor")
            .context("insert Product");

        assert!(matches!(err.root_cause(), RepositoryError::NotFound { .. }));
        assert_eq!(
            err.to_string(),
            "insert Product: resolving reference Product.vendor: Entity p-1 not found in Product"
        );
    }

    #[test]
    fn test_aggregate_only_message() {
        let err = RepositoryError::aggregate_only(ExpressionType::Sum);
        assert_eq!(
            err.to_string(),
            "Unsupported expression: Sum (only valid inside an aggregation)"
        );
    }
}
