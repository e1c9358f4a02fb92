//! Schema Provisioning
//!
//! Backends with a declared schema need their storage created (or widened)
//! before an entity type is first written. [`SchemaProvider`] is the contract
//! for that collaborator:
//!
//! - [`MemorySchemaProvider`] - reference implementation recording DDL statements
//! - [`CacheSchemaProvider`] - decorator memoising creation per table and
//!   creating referenced types first

mod cache_schema;
mod memory_schema;

pub use cache_schema::CacheSchemaProvider;
pub use memory_schema::MemorySchemaProvider;

use crate::error::Result;
use crate::models::MetaClass;
use async_trait::async_trait;

/// Creates or updates backend storage for entity types
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    fn database_name(&self) -> &str;

    /// Ensure storage for `meta` exists and matches its declared properties
    ///
    /// # Errors
    ///
    /// `SchemaConflict` when a stored column cannot be widened to the declared type.
    async fn create_or_update(&self, meta: &'static MetaClass) -> Result<()>;

    fn table_name(&self, meta: &MetaClass) -> String {
        meta.name().to_string()
    }

    /// Forget every definition (called when all data is dropped)
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}
