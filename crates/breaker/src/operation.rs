//! Queued write records and the caller-side completion handle.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pulse_core::Priority;

use crate::error::BreakerError;

/// Descriptive tags attached to a write, used for `errors_by_type` and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMetadata {
    /// Originating UI/data component, e.g. `"venue_checkin"`.
    pub component: String,
    /// Kind of write, e.g. `"upsert_presence"`.
    pub operation_type: String,
    /// Rows carried by a batched write, if any.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl WriteMetadata {
    pub fn new(component: impl Into<String>, operation_type: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation_type: operation_type.into(),
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Key under which failures are counted.
    pub fn error_key(&self) -> String {
        format!("{}:{}", self.component, self.operation_type)
    }
}

impl Default for WriteMetadata {
    fn default() -> Self {
        Self::new("unknown", "write")
    }
}

pub(crate) type Payload = Box<dyn Any + Send>;

/// Type-erased, re-runnable write attempt.
pub(crate) type Attempt = Arc<dyn Fn() -> BoxFuture<'static, Result<Payload, anyhow::Error>> + Send + Sync>;

pub(crate) type Completion = oneshot::Sender<Result<Payload, BreakerError>>;

/// Erase a typed operation so heterogeneous writes share one queue.
pub(crate) fn erase<T, E, F, Fut>(op: F) -> Attempt
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    Arc::new(move || {
        let fut = op();
        Box::pin(async move {
            match fut.await {
                Ok(value) => Ok(Box::new(value) as Payload),
                Err(e) => Err(e.into()),
            }
        })
    })
}

/// A write waiting in (or running from) the breaker queue.
pub(crate) struct WriteOperation {
    pub id: Uuid,
    /// Original submission time.
    pub submitted_at: DateTime<Utc>,
    /// Enqueue timestamp; pushed forward by retry backoff.
    pub ready_at: DateTime<Utc>,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub metadata: WriteMetadata,
    /// Monotonic enqueue sequence, FIFO tie-break within a class.
    pub seq: u64,
    pub cancel: CancellationToken,
    pub attempt: Attempt,
    completion: Completion,
}

impl WriteOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        now: DateTime<Utc>,
        priority: Priority,
        max_retries: u32,
        metadata: WriteMetadata,
        seq: u64,
        cancel: CancellationToken,
        attempt: Attempt,
        completion: Completion,
    ) -> Self {
        Self {
            id,
            submitted_at: now,
            ready_at: now,
            priority,
            retry_count: 0,
            max_retries,
            metadata,
            seq,
            cancel,
            attempt,
            completion,
        }
    }

    pub fn resolve(self, payload: Payload) {
        // The caller may have dropped its handle; nothing left to notify.
        let _ = self.completion.send(Ok(payload));
    }

    pub fn reject(self, err: BreakerError) {
        let _ = self.completion.send(Err(err));
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.ready_at <= now
    }
}

impl fmt::Debug for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOperation")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("ready_at", &self.ready_at)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Caller's handle to a submitted write. Resolves once the write succeeds,
/// is shed, or exhausts its retries.
#[must_use = "a pending write does nothing unless awaited"]
pub struct PendingWrite<T> {
    id: Uuid,
    rx: oneshot::Receiver<Result<Payload, BreakerError>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PendingWrite<T> {
    pub(crate) fn new(id: Uuid, rx: oneshot::Receiver<Result<Payload, BreakerError>>) -> Self {
        Self {
            id,
            rx,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T: 'static> Future for PendingWrite<T> {
    type Output = Result<T, BreakerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            // Sender dropped without settling: the breaker went away.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BreakerError::Destroyed)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(Ok(payload))) => Poll::Ready(
                payload
                    .downcast::<T>()
                    .map(|value| *value)
                    .map_err(|_| BreakerError::Execution(anyhow::anyhow!("write result had an unexpected type"))),
            ),
        }
    }
}

impl<T> fmt::Debug for PendingWrite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWrite").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_key_joins_component_and_type() {
        let meta = WriteMetadata::new("venue_checkin", "upsert_presence").with_batch_size(4);
        assert_eq!(meta.error_key(), "venue_checkin:upsert_presence");
        assert_eq!(meta.batch_size, Some(4));
    }

    #[tokio::test]
    async fn erased_attempt_is_rerunnable() {
        let attempt = erase(|| async { Ok::<_, anyhow::Error>(7u32) });
        for _ in 0..2 {
            let payload = attempt().await.unwrap();
            assert_eq!(*payload.downcast::<u32>().unwrap(), 7);
        }
    }

    #[tokio::test]
    async fn pending_write_resolves_typed_value() {
        let (tx, rx) = oneshot::channel();
        let pending: PendingWrite<String> = PendingWrite::new(Uuid::new_v4(), rx);
        tx.send(Ok(Box::new("saved".to_string()) as Payload)).unwrap();
        assert_eq!(pending.await.unwrap(), "saved");
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_destroyed() {
        let (tx, rx) = oneshot::channel::<Result<Payload, BreakerError>>();
        let pending: PendingWrite<()> = PendingWrite::new(Uuid::new_v4(), rx);
        drop(tx);
        assert!(matches!(pending.await, Err(BreakerError::Destroyed)));
    }
}
