//! Repository Services
//!
//! This module contains the application-facing layer:
//!
//! - `RepositoryConfig` - pipeline configuration with defaults and validation
//! - `Repository` / `RepositoryBuilder` - decorator chain assembly
//! - `EntitySet` / `EntityQuery` - typed CRUD and queries decoded into entity structs
//!
//! Services translate typed expressions into query descriptors and leave
//! every storage concern to the provider pipeline.

pub mod config;
pub mod repository;

pub use config::RepositoryConfig;
pub use repository::{EntityQuery, EntitySet, Repository, RepositoryBuilder};
