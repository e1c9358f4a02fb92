//! Schema Creation Cache
//!
//! Wraps a [`SchemaProvider`] so each table is created at most once per
//! process. The first caller for a table triggers creation; concurrent and
//! later callers await the same `OnceCell`. Referenced entity types are
//! created before the types referencing them. A type whose cell is already in
//! the map (in progress or done) is skipped during that pre-creation, which
//! terminates the walk on cyclic reference graphs.

use crate::error::Result;
use crate::models::MetaClass;
use crate::schema::SchemaProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

type SchemaCell = Arc<OnceCell<()>>;

/// Memoising decorator around a schema provider
pub struct CacheSchemaProvider {
    inner: Arc<dyn SchemaProvider>,
    cells: Mutex<HashMap<String, SchemaCell>>,
}

impl CacheSchemaProvider {
    pub fn new(inner: Arc<dyn SchemaProvider>) -> Self {
        Self {
            inner,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn decorate(inner: Arc<dyn SchemaProvider>) -> Arc<dyn SchemaProvider> {
        Arc::new(Self::new(inner))
    }

    /// Whether creation of `table` has completed
    pub async fn is_cached(&self, table: &str) -> bool {
        self.cells
            .lock()
            .await
            .get(table)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    async fn create_with_references(&self, meta: &'static MetaClass) -> Result<()> {
        for referenced in meta.referenced_types() {
            let table = self.inner.table_name(referenced);
            let known = self.cells.lock().await.contains_key(&table);
            if !known {
                self.create_or_update(referenced).await?;
            }
        }
        debug!("Creating schema for {}", meta.name());
        self.inner.create_or_update(meta).await
    }
}

#[async_trait]
impl SchemaProvider for CacheSchemaProvider {
    fn database_name(&self) -> &str {
        self.inner.database_name()
    }

    fn table_name(&self, meta: &MetaClass) -> String {
        self.inner.table_name(meta)
    }

    async fn create_or_update(&self, meta: &'static MetaClass) -> Result<()> {
        let table = self.inner.table_name(meta);
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(table.clone()).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| self.create_with_references(meta))
            .await
            .map(|_| ());

        if result.is_err() {
            // Let a later caller retry with a fresh cell
            let mut cells = self.cells.lock().await;
            if let Some(current) = cells.get(&table) {
                if Arc::ptr_eq(current, &cell) && !current.initialized() {
                    cells.remove(&table);
                }
            }
        }
        result
    }

    async fn clear(&self) -> Result<()> {
        self.cells.lock().await.clear();
        self.inner.clear().await
    }
}
