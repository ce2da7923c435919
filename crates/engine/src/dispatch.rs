//! Dispatch — hands selected actions to a sink off the evaluation path.
//!
//! The [`Dispatcher`] owns a bounded queue and one worker task. `submit`
//! never waits: when the queue is full the batch is dropped and the caller
//! gets [`DispatchError::QueueFull`]. Each sink call runs under a timeout;
//! failures are logged and published on the event bus.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nvlp_core::{DispatchBatch, DispatchError, DispatchSink, EngineEvent, EventBus, TriggeredAction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue and timeout settings for a [`Dispatcher`].
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub queue_capacity: usize,
    pub timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Background delivery of [`DispatchBatch`]es to one sink.
pub struct Dispatcher {
    sender: mpsc::Sender<DispatchBatch>,
    worker: JoinHandle<()>,
    capacity: usize,
    sink_name: String,
}

impl Dispatcher {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn spawn(
        sink: Arc<dyn DispatchSink>,
        options: DispatchOptions,
        events: Arc<EventBus>,
    ) -> Self {
        let capacity = options.queue_capacity.max(1);
        let sink_name = sink.name().to_string();
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(sink, receiver, options.timeout, events));
        Self {
            sender,
            worker,
            capacity,
            sink_name,
        }
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    /// Queue a batch without waiting.
    pub fn submit(&self, batch: DispatchBatch) -> Result<(), DispatchError> {
        self.sender.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(batch) => {
                warn!(
                    user_id = %batch.user_id,
                    event_id = %batch.event_id,
                    capacity = self.capacity,
                    "Dispatch queue full; batch dropped"
                );
                DispatchError::QueueFull {
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(batch) => {
                warn!(
                    user_id = %batch.user_id,
                    event_id = %batch.event_id,
                    sink = %self.sink_name,
                    "Dispatch worker stopped; batch dropped"
                );
                DispatchError::Closed
            }
        })
    }

    /// Stop accepting batches and wait for queued ones to be delivered.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Dispatch worker ended abnormally");
        }
    }
}

async fn run_worker(
    sink: Arc<dyn DispatchSink>,
    mut receiver: mpsc::Receiver<DispatchBatch>,
    timeout: Duration,
    events: Arc<EventBus>,
) {
    debug!(sink = sink.name(), "Dispatch worker started");
    while let Some(batch) = receiver.recv().await {
        let result = match tokio::time::timeout(timeout, sink.dispatch(&batch)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                sink: sink.name().to_string(),
                timeout_ms: millis(timeout),
            }),
        };

        if let Err(e) = result {
            warn!(
                sink = sink.name(),
                user_id = %batch.user_id,
                event_id = %batch.event_id,
                error = %e,
                "Dispatch failed"
            );
            events.publish(EngineEvent::DispatchFailed {
                sink: sink.name().to_string(),
                user_id: batch.user_id.clone(),
                event_id: batch.event_id,
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
    debug!(sink = sink.name(), "Dispatch worker stopped");
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Emits one `tracing` record per action.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl DispatchSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn dispatch(&self, batch: &DispatchBatch) -> Result<(), DispatchError> {
        for action in &batch.actions {
            let modifiers = serde_json::to_string(&action.modifiers)
                .map_err(|e| DispatchError::rejected(self.name(), e.to_string()))?;
            info!(
                user_id = %action.user_id,
                event_id = %batch.event_id,
                rule = %action.rule_name,
                action = %action.action,
                modifiers = %modifiers,
                "Adaptation triggered"
            );
        }
        Ok(())
    }
}

/// Keeps the most recent batches in memory.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    batches: Mutex<VecDeque<DispatchBatch>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            batches: Mutex::new(VecDeque::new()),
        }
    }

    pub fn batches(&self) -> Vec<DispatchBatch> {
        self.lock().iter().cloned().collect()
    }

    /// All buffered actions, oldest batch first.
    pub fn actions(&self) -> Vec<TriggeredAction> {
        self.lock()
            .iter()
            .flat_map(|b| b.actions.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DispatchBatch>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl DispatchSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn dispatch(&self, batch: &DispatchBatch) -> Result<(), DispatchError> {
        let mut batches = self.lock();
        if batches.len() >= self.capacity {
            batches.pop_front();
        }
        batches.push_back(batch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn batch(user: &str, actions: &[&str]) -> DispatchBatch {
        DispatchBatch {
            user_id: user.into(),
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            actions: actions
                .iter()
                .map(|a| TriggeredAction {
                    rule_name: format!("R_{a}"),
                    action: a.to_string(),
                    modifiers: Default::default(),
                    matched_at: Utc::now(),
                    user_id: user.into(),
                })
                .collect(),
        }
    }

    struct FailingSink;

    #[async_trait]
    impl DispatchSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn dispatch(&self, _batch: &DispatchBatch) -> Result<(), DispatchError> {
            Err(DispatchError::rejected("failing", "downstream unavailable"))
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl DispatchSink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn dispatch(&self, _batch: &DispatchBatch) -> Result<(), DispatchError> {
            panic!("sink crashed");
        }
    }

    struct SlowSink;

    #[async_trait]
    impl DispatchSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn dispatch(&self, _batch: &DispatchBatch) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn memory_sink_is_bounded() {
        let sink = MemorySink::new(2);
        for user in ["a", "b", "c"] {
            sink.dispatch(&batch(user, &["x"])).await.unwrap();
        }
        let users: Vec<_> = sink.batches().into_iter().map(|b| b.user_id).collect();
        assert_eq!(users, ["b", "c"]);
    }

    #[test]
    fn timeout_millis_saturate() {
        assert_eq!(millis(Duration::from_millis(2000)), 2000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn log_sink_accepts_batch() {
        assert!(LogSink.dispatch(&batch("u1", &["chunk_content"])).await.is_ok());
    }

    #[tokio::test]
    async fn dispatcher_delivers_in_order() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = Dispatcher::spawn(
            sink.clone(),
            DispatchOptions::default(),
            Arc::new(EventBus::default()),
        );

        dispatcher.submit(batch("u1", &["a", "b"])).unwrap();
        dispatcher.submit(batch("u2", &["c"])).unwrap();
        dispatcher.shutdown().await;

        let actions: Vec<_> = sink.actions().into_iter().map(|a| a.action).collect();
        assert_eq!(actions, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn sink_failure_published() {
        let events = Arc::new(EventBus::new(8));
        let mut rx = events.subscribe();
        let dispatcher =
            Dispatcher::spawn(Arc::new(FailingSink), DispatchOptions::default(), events);

        dispatcher.submit(batch("u1", &["a"])).unwrap();
        dispatcher.shutdown().await;

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            EngineEvent::DispatchFailed { sink, error_message, .. } => {
                assert_eq!(sink, "failing");
                assert!(error_message.contains("downstream unavailable"));
            }
            _ => panic!("Expected DispatchFailed event"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_times_out() {
        let events = Arc::new(EventBus::new(8));
        let mut rx = events.subscribe();
        let options = DispatchOptions {
            queue_capacity: 4,
            timeout: Duration::from_millis(50),
        };
        let dispatcher = Dispatcher::spawn(Arc::new(SlowSink), options, events);

        dispatcher.submit(batch("u1", &["a"])).unwrap();
        dispatcher.shutdown().await;

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            EngineEvent::DispatchFailed { error_message, .. } => {
                assert!(error_message.contains("timed out"), "{error_message}");
            }
            _ => panic!("Expected DispatchFailed event"),
        }
    }

    #[tokio::test]
    async fn dead_worker_reports_closed() {
        let dispatcher = Dispatcher::spawn(
            Arc::new(PanickingSink),
            DispatchOptions::default(),
            Arc::new(EventBus::default()),
        );

        let mut result = Ok(());
        for _ in 0..100 {
            result = dispatcher.submit(batch("u1", &["a"]));
            if result.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(result, Err(DispatchError::Closed));
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_without_blocking() {
        let options = DispatchOptions {
            queue_capacity: 1,
            timeout: Duration::from_secs(60),
        };
        let dispatcher =
            Dispatcher::spawn(Arc::new(SlowSink), options, Arc::new(EventBus::default()));

        // The worker may or may not have taken the first batch yet; within a
        // few submits the single slot must be full.
        let results: Vec<_> = (0..3).map(|_| dispatcher.submit(batch("u1", &["a"]))).collect();
        assert!(results.contains(&Err(DispatchError::QueueFull { capacity: 1 })));
    }
}
