//! In-Memory Schema Provider
//!
//! Records the DDL a schemaful document store would execute for each entity
//! type, and tracks declared column types so incompatible redeclarations are
//! detected.
//!
//! ## Generated Statements
//!
//! ```text
//! DEFINE TABLE IF NOT EXISTS Product SCHEMAFULL;
//! DEFINE FIELD IF NOT EXISTS key ON TABLE Product TYPE string;
//! DEFINE FIELD IF NOT EXISTS vendor ON TABLE Product TYPE option<record<Vendor>>;
//! DEFINE INDEX IF NOT EXISTS Product.keyIndex ON TABLE Product COLUMNS key UNIQUE;
//! DEFINE INDEX IF NOT EXISTS Product.textIndex ON TABLE Product COLUMNS name SEARCH;
//! ```
//!
//! Embedded (keyless) entity properties get an extra `<name>AsString` column
//! holding their text rendering.

use crate::error::{RepositoryError, Result};
use crate::models::{MetaClass, PropertyMeta, ValueType};
use crate::schema::SchemaProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct SchemaState {
    /// Declared column types per table
    tables: HashMap<String, HashMap<String, ValueType>>,
    statements: Vec<String>,
}

/// Schema provider recording DDL statements in memory
pub struct MemorySchemaProvider {
    database_name: String,
    state: Mutex<SchemaState>,
    ddl_runs: AtomicUsize,
    pending_failures: AtomicUsize,
    latency: Option<Duration>,
}

impl MemorySchemaProvider {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            state: Mutex::new(SchemaState::default()),
            ddl_runs: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Delay every schema operation, widening race windows in tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `count` schema operations with `BackendUnavailable`
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `create_or_update` calls that reached this provider
    pub fn ddl_runs(&self) -> usize {
        self.ddl_runs.load(Ordering::SeqCst)
    }

    /// Every statement executed so far, in order
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    pub async fn has_table(&self, table: &str) -> bool {
        self.state.lock().await.tables.contains_key(table)
    }

    pub async fn column_type(&self, table: &str, column: &str) -> Option<ValueType> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .and_then(|columns| columns.get(column))
            .cloned()
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Column type name for a declared property type
fn column_type_name(value_type: &ValueType) -> String {
    match value_type {
        ValueType::Boolean => "bool".to_string(),
        ValueType::Integer => "int".to_string(),
        ValueType::Float => "float".to_string(),
        ValueType::String => "string".to_string(),
        ValueType::List(inner) => format!("array<{}>", column_type_name(inner)),
        ValueType::Entity(entity) => {
            if entity.meta_class().key_property().is_some() {
                format!("record<{}>", entity.name())
            } else {
                "object".to_string()
            }
        }
        ValueType::Any => "any".to_string(),
    }
}

fn field_statement(table: &str, property: &PropertyMeta) -> String {
    let base = column_type_name(property.value_type());
    let column = if property.is_key() {
        base
    } else {
        format!("option<{}>", base)
    };
    format!(
        "DEFINE FIELD IF NOT EXISTS {} ON TABLE {} TYPE {};",
        property.name(),
        table,
        column
    )
}

#[async_trait]
impl SchemaProvider for MemorySchemaProvider {
    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn create_or_update(&self, meta: &'static MetaClass) -> Result<()> {
        self.ddl_runs.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure() {
            return Err(RepositoryError::backend_unavailable(format!(
                "schema backend rejected {}",
                meta.name()
            )));
        }

        let table = self.table_name(meta);
        let mut state = self.state.lock().await;

        // Validate every column before writing anything
        if let Some(columns) = state.tables.get(&table) {
            for property in meta.properties() {
                if let Some(existing) = columns.get(property.name()) {
                    if !existing.can_widen_to(property.value_type()) {
                        return Err(RepositoryError::schema_conflict(
                            &table,
                            property.name(),
                            existing,
                            property.value_type(),
                        ));
                    }
                }
            }
        }

        let mut statements = Vec::new();
        if !state.tables.contains_key(&table) {
            statements.push(format!("DEFINE TABLE IF NOT EXISTS {} SCHEMAFULL;", table));
        }
        let columns = state.tables.entry(table.clone()).or_default();

        for property in meta.properties() {
            let changed = columns
                .get(property.name())
                .map(|existing| existing != property.value_type())
                .unwrap_or(true);
            if !changed {
                continue;
            }
            columns.insert(property.name().to_string(), property.value_type().clone());
            statements.push(field_statement(&table, property));

            if property.is_embedded() {
                statements.push(format!(
                    "DEFINE FIELD IF NOT EXISTS {}AsString ON TABLE {} TYPE option<string>;",
                    property.name(),
                    table
                ));
            }
            if property.is_key() {
                statements.push(format!(
                    "DEFINE INDEX IF NOT EXISTS {table}.{name}Index ON TABLE {table} COLUMNS {name} UNIQUE;",
                    table = table,
                    name = property.name()
                ));
            } else if let Some(index) = property.indexable() {
                statements.push(format!(
                    "DEFINE INDEX IF NOT EXISTS {table}.{name}Index ON TABLE {table} COLUMNS {name}{unique};",
                    table = table,
                    name = property.name(),
                    unique = if index.unique { " UNIQUE" } else { "" }
                ));
            }
        }

        let searchable: Vec<&str> = meta
            .properties()
            .iter()
            .filter(|p| p.is_searchable())
            .map(PropertyMeta::name)
            .collect();
        if !searchable.is_empty() && !statements.is_empty() {
            statements.push(format!(
                "DEFINE INDEX IF NOT EXISTS {table}.textIndex ON TABLE {table} COLUMNS {columns} SEARCH;",
                table = table,
                columns = searchable.join(", ")
            ));
        }

        debug!(
            "Schema for {} in {}: {} statement(s)",
            table,
            self.database_name,
            statements.len()
        );
        state.statements.extend(statements);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tables.clear();
        Ok(())
    }
}
