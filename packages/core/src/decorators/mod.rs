//! Provider Decorators
//!
//! Each decorator wraps an `Arc<dyn QueryProvider>` and adds one cross-cutting
//! behavior while forwarding everything else unchanged.
//!
//! - [`SchedulingProvider`] - bounded concurrency, admission timeout, runtime dispatch
//! - [`LiveQueryProvider`] - per-query notifications over a raw change feed
//! - [`MandatoryPropertiesProvider`] - widens projections with required properties
//! - [`UpdateReferencesFirstProvider`] - persists referenced entities before their owners
//!
//! # Ordering
//!
//! The repository builds the chain outermost first:
//!
//! ```text
//! Scheduling -> LiveQuery -> MandatoryProperties -> UpdateReferencesFirst -> backend
//! ```
//!
//! Live query snapshots are issued below the scheduler and are not admitted
//! a second time. The live query layer shapes snapshot and feed values with
//! the same expanded property set.

mod live_query;
mod mandatory_properties;
mod scheduling;
mod update_references_first;

pub use live_query::{LiveQueryProvider, DEFAULT_POLL_INTERVAL};
pub use mandatory_properties::{expand_properties, MandatoryPropertiesProvider};
pub use scheduling::{SchedulingProvider, DEFAULT_STREAM_BUFFER};
pub use update_references_first::UpdateReferencesFirstProvider;
