//! Scheduling Decorator
//!
//! Admission control and execution dispatch for the provider chain.
//!
//! # Architecture
//!
//! - **Admission**: a semaphore bounds in-flight operations. Callers beyond
//!   the bound queue; with an admission timeout configured they fail with
//!   `Timeout` once it elapses instead of waiting forever.
//! - **Dispatch**: admitted work runs on a captured tokio runtime handle, so
//!   backend I/O is decoupled from the caller's task. A caller that drops its
//!   future aborts the dispatched task and releases its permit.
//! - **Streams**: results are pumped through a bounded channel by a task on
//!   the same runtime. The pump stops, dropping the upstream stream, as soon
//!   as the consumer drops its end.
//!
//! One-shot queries keep their permit until the result stream is exhausted
//! or abandoned. Live subscriptions only hold a permit while being opened.

use crate::error::{RepositoryError, Result};
use crate::models::{MetaClass, Notification};
use crate::query::{
    Aggregator, Decorator, EntityStream, NotificationStream, QueryInfo, QueryProvider, Snapshot,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

/// Default channel capacity between a pump task and its consumer
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Dispatched task, aborted once nobody waits for it
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Query provider decorator bounding concurrency and dispatching onto a runtime
pub struct SchedulingProvider {
    inner: Arc<dyn QueryProvider>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    admission_timeout: Option<Duration>,
    stream_buffer: usize,
}

impl SchedulingProvider {
    pub fn new(
        inner: Arc<dyn QueryProvider>,
        runtime: Handle,
        max_concurrent: usize,
        admission_timeout: Option<Duration>,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner,
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            admission_timeout,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }

    pub fn decorator(
        runtime: Handle,
        max_concurrent: usize,
        admission_timeout: Option<Duration>,
        stream_buffer: usize,
    ) -> impl Decorator {
        move |inner: Arc<dyn QueryProvider>| -> Arc<dyn QueryProvider> {
            Arc::new(
                Self::new(inner, runtime.clone(), max_concurrent, admission_timeout)
                    .with_stream_buffer(stream_buffer),
            )
        }
    }

    /// Operations currently admitted
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    async fn admit(&self, operation: &str) -> Result<OwnedSemaphorePermit> {
        let acquire = self.permits.clone().acquire_owned();
        let acquired = match self.admission_timeout {
            Some(after) => tokio::time::timeout(after, acquire)
                .await
                .map_err(|_| RepositoryError::timeout(operation, after))?,
            None => acquire.await,
        };
        acquired.map_err(|_| RepositoryError::backend_unavailable("scheduler is closed"))
    }

    /// Spawn `work` on the runtime and wait for it
    async fn dispatch<T, F>(&self, operation: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut task = AbortOnDrop(self.runtime.spawn(work));
        (&mut task.0).await.map_err(|e| {
            RepositoryError::backend_unavailable(format!("{} task failed: {}", operation, e))
        })?
    }

    /// Run `work` on the runtime while holding a permit
    async fn run<T, F>(&self, operation: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let permit = self.admit(operation).await?;
        trace!("Admitted {} ({} in flight)", operation, self.in_flight());
        self.dispatch(operation, async move {
            let result = work.await;
            drop(permit);
            result
        })
        .await
    }

    /// Forward `upstream` through a bounded channel, holding `permit` until
    /// the upstream ends or the consumer goes away
    fn pump<T>(
        &self,
        operation: &'static str,
        mut upstream: BoxStream<'static, Result<T>>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        self.runtime.spawn(async move {
            let _permit = permit;
            loop {
                tokio::select! {
                    biased;

                    _ = tx.closed() => {
                        debug!("{} consumer dropped, closing upstream", operation);
                        break;
                    }

                    item = upstream.next() => match item {
                        Some(item) => {
                            if tx.send(item).await.is_err() {
                                debug!("{} consumer dropped, closing upstream", operation);
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });
        ReceiverStream::new(rx).boxed()
    }
}

#[async_trait]
impl QueryProvider for SchedulingProvider {
    async fn insert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        let inner = self.inner.clone();
        self.run("insert", async move { inner.insert(meta, entity).await })
            .await
    }

    async fn update(
        &self,
        meta: &'static MetaClass,
        entity: Value,
        expected_version: Option<u64>,
    ) -> Result<Value> {
        let inner = self.inner.clone();
        self.run("update", async move {
            inner.update(meta, entity, expected_version).await
        })
        .await
    }

    async fn upsert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        let inner = self.inner.clone();
        self.run("upsert", async move { inner.upsert(meta, entity).await })
            .await
    }

    async fn delete(&self, meta: &'static MetaClass, key: Value) -> Result<bool> {
        let inner = self.inner.clone();
        self.run("delete", async move { inner.delete(meta, key).await })
            .await
    }

    async fn find(&self, meta: &'static MetaClass, key: Value) -> Result<Option<Value>> {
        let inner = self.inner.clone();
        self.run("find", async move { inner.find(meta, key).await })
            .await
    }

    async fn query(&self, query: QueryInfo) -> Result<EntityStream> {
        let permit = self.admit("query").await?;
        let inner = self.inner.clone();
        let upstream = self
            .dispatch("query", async move { inner.query(query).await })
            .await?;
        Ok(self.pump("query", upstream, Some(permit)))
    }

    async fn snapshot(&self, query: QueryInfo) -> Result<Snapshot> {
        let inner = self.inner.clone();
        self.run("snapshot", async move { inner.snapshot(query).await })
            .await
    }

    async fn live_query(&self, query: QueryInfo) -> Result<NotificationStream> {
        let inner = self.inner.clone();
        let upstream: BoxStream<'static, Result<Notification>> = self
            .run("live_query", async move { inner.live_query(query).await })
            .await?;
        Ok(self.pump("live_query", upstream, None))
    }

    async fn aggregate(&self, query: QueryInfo, aggregator: Aggregator) -> Result<Value> {
        let inner = self.inner.clone();
        self.run("aggregate", async move {
            inner.aggregate(query, aggregator).await
        })
        .await
    }

    async fn drop_all(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.run("drop_all", async move { inner.drop_all().await })
            .await
    }

    fn supports_change_feed(&self) -> bool {
        self.inner.supports_change_feed()
    }
}

#[cfg(test)]
#[path = "scheduling_test.rs"]
mod scheduling_test;
