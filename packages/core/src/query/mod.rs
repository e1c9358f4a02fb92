//! Query Layer
//!
//! - [`QueryInfo`] - immutable query descriptor and its builder
//! - [`QueryProvider`] - object-safe backend contract shared by decorators
//! - [`Aggregator`] - aggregations pushed down to the backend
//! - [`project`] - projection of documents onto a property set

mod aggregator;
mod projection;
mod provider;
mod query_info;

pub use aggregator::Aggregator;
pub use projection::project;
pub use provider::{
    require_key, Decorator, Decorators, EntityStream, NotificationStream, QueryProvider,
    Snapshot,
};
pub use query_info::{CompiledQuery, QueryInfo, QueryInfoBuilder, SortingInfo};
