use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_core::Priority;

use super::core::{BreakerState, Inner, WriteCircuitBreaker};
use crate::error::BreakerError;
use crate::operation::{erase, PendingWrite, WriteMetadata, WriteOperation};
use crate::state::CircuitState;

impl Inner {
    /// Decide whether a write of `priority` may enter the queue.
    ///
    /// `Ok(Some(victim))` means the queue was full and `victim` (the oldest
    /// queued low-priority write) has been removed to make room.
    fn admit(
        &self,
        st: &mut BreakerState,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<Option<WriteOperation>, BreakerError> {
        if st.destroyed {
            return Err(BreakerError::Destroyed);
        }
        if st.circuit.state() == CircuitState::Open && priority != Priority::High {
            return Err(BreakerError::CircuitOpen);
        }
        if priority == Priority::Low && st.is_throttling(&self.config, now) {
            return Err(BreakerError::Overloaded {
                active: st.active_writes,
                rate: st.write_rate(now),
                queued: st.queue.len(),
            });
        }
        if st.queue.len() >= self.config.max_queue_size {
            return match st.evict_oldest_low() {
                Some(victim) => Ok(Some(victim)),
                None => Err(BreakerError::QueueFull {
                    capacity: self.config.max_queue_size,
                }),
            };
        }
        Ok(None)
    }
}

impl WriteCircuitBreaker {
    /// Admit `op` and enqueue it, returning a handle that settles with the
    /// write's outcome.
    ///
    /// Admission is decided synchronously: a shed write fails here and is
    /// never queued. `op` is called once per attempt, so it must be able to
    /// build a fresh future for every retry.
    pub fn try_submit<T, E, F, Fut>(
        &self,
        op: F,
        priority: Priority,
        metadata: WriteMetadata,
    ) -> Result<PendingWrite<T>, BreakerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.try_submit_with_token(op, priority, metadata, CancellationToken::new())
    }

    /// Like [`try_submit`](Self::try_submit), with a token the caller can
    /// cancel to withdraw the write while queued or interrupt it mid-attempt.
    pub fn try_submit_with_token<T, E, F, Fut>(
        &self,
        op: F,
        priority: Priority,
        metadata: WriteMetadata,
        cancel: CancellationToken,
    ) -> Result<PendingWrite<T>, BreakerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let inner = &self.inner;
        let now = inner.clock.now();

        let (pending, evicted) = {
            let mut st = inner.lock();
            let evicted = match inner.admit(&mut st, priority, now) {
                Ok(evicted) => evicted,
                Err(err) => {
                    warn!(
                        priority = %priority,
                        component = %metadata.component,
                        operation = %metadata.operation_type,
                        error = %err,
                        "write rejected at admission"
                    );
                    return Err(err);
                }
            };

            let id = Uuid::new_v4();
            let seq = st.next_seq;
            st.next_seq += 1;
            let (tx, rx) = oneshot::channel();
            let max_retries = inner.config.policy(priority).max_retries;
            debug!(
                id = %id,
                priority = %priority,
                component = %metadata.component,
                queued = st.queue.len() + 1,
                "write queued"
            );
            st.queue.push_back(WriteOperation::new(
                id,
                now,
                priority,
                max_retries,
                metadata,
                seq,
                cancel,
                erase(op),
                tx,
            ));
            (PendingWrite::new(id, rx), evicted)
        };

        if let Some(victim) = evicted {
            warn!(id = %victim.id, component = %victim.metadata.component, "queue full, evicted low-priority write");
            victim.reject(BreakerError::QueueFull {
                capacity: inner.config.max_queue_size,
            });
        }
        Ok(pending)
    }

    /// Submit and wait for the outcome.
    ///
    /// Admission happens when this is called, not when the returned future
    /// is first polled.
    pub fn submit<T, E, F, Fut>(
        &self,
        op: F,
        priority: Priority,
        metadata: WriteMetadata,
    ) -> impl Future<Output = Result<T, BreakerError>> + Send + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let admitted = self.try_submit(op, priority, metadata);
        async move { admitted?.await }
    }

    pub fn submit_with_token<T, E, F, Fut>(
        &self,
        op: F,
        priority: Priority,
        metadata: WriteMetadata,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<T, BreakerError>> + Send + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let admitted = self.try_submit_with_token(op, priority, metadata, cancel);
        async move { admitted?.await }
    }
}
