//! Delivery Workers
//!
//! One worker per subscription, listener or routing target. The producer only
//! try_sends into the bounded queue; a full queue drops the event. Each handler
//! call runs under a timeout and panic isolation so a bad handler only hurts
//! its own queue.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handler::EventHandler;
use crate::types::BudgetEvent;

/// Counters shared between the bus and its workers
#[derive(Debug, Default)]
pub(crate) struct DeliveryCounters {
    pub dropped_events: AtomicU64,
    pub handler_errors: AtomicU64,
}

impl DeliveryCounters {
    pub fn record_drop(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
        crate::metrics::BUS_EVENTS_DROPPED_TOTAL.inc();
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn handler_errors(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.dropped_events.store(0, Ordering::Relaxed);
        self.handler_errors.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub(crate) struct DeliveryWorker {
    name: String,
    tx: mpsc::Sender<BudgetEvent>,
    task: JoinHandle<()>,
}

impl DeliveryWorker {
    pub fn spawn(
        name: String,
        handler: Arc<dyn EventHandler>,
        capacity: usize,
        timeout: Duration,
        counters: Arc<DeliveryCounters>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<BudgetEvent>(capacity.max(1));
        let worker_name = name.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let call = AssertUnwindSafe(handler.handle(&event)).catch_unwind();
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => {
                        counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(handler = %worker_name, event_id = %event.id, error = %e, "Event handler failed");
                    }
                    Ok(Err(_)) => {
                        counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(handler = %worker_name, event_id = %event.id, "Event handler panicked");
                    }
                    Err(_) => {
                        counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            handler = %worker_name,
                            event_id = %event.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Event handler timed out"
                        );
                    }
                }
            }
            debug!(handler = %worker_name, "Delivery worker stopped");
        });

        Self { name, tx, task }
    }

    /// Queue an event without waiting; false if the queue is full or closed
    pub fn try_deliver(&self, event: BudgetEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(handler = %self.name, "Delivery queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop immediately, discarding queued events
    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler::{channel_handler, handler_fn};
    use crate::types::EventType;

    fn event() -> BudgetEvent {
        BudgetEvent::new(EventType::UsageUpdated, "test", serde_json::Value::Null)
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let counters = Arc::new(DeliveryCounters::default());
        let (handler, mut rx) = channel_handler();
        let worker = DeliveryWorker::spawn("ordered".into(), handler, 8, Duration::from_secs(1), counters);

        let first = event();
        let second = event();
        assert!(worker.try_deliver(first.clone()));
        assert!(worker.try_deliver(second.clone()));

        assert_eq!(rx.recv().await.unwrap().id, first.id);
        assert_eq!(rx.recv().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let counters = Arc::new(DeliveryCounters::default());
        let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);
        let handler = handler_fn(move |_event| {
            let mut gate = gate_rx.clone();
            async move {
                let _ = gate.wait_for(|open| *open).await;
                Ok::<(), anyhow::Error>(())
            }
        });
        let worker = DeliveryWorker::spawn("slow".into(), handler, 1, Duration::from_secs(30), counters);

        // The worker takes one event off the queue and blocks on it
        assert!(worker.try_deliver(event()));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(worker.try_deliver(event()));
        assert!(!worker.try_deliver(event()));

        gate_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_isolated() {
        let counters = Arc::new(DeliveryCounters::default());
        let handler = handler_fn(|event: BudgetEvent| async move {
            if event.source == "panic" {
                panic!("handler bug");
            }
            Err::<(), _>(anyhow::anyhow!("always fails"))
        });
        let worker = DeliveryWorker::spawn("broken".into(), handler, 8, Duration::from_secs(1), counters.clone());

        worker.try_deliver(BudgetEvent::new(EventType::BudgetReset, "panic", serde_json::Value::Null));
        worker.try_deliver(event());

        for _ in 0..100 {
            if counters.handler_errors() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(counters.handler_errors(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let counters = Arc::new(DeliveryCounters::default());
        let handler = handler_fn(|_event| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), anyhow::Error>(())
        });
        let worker = DeliveryWorker::spawn("stuck".into(), handler, 8, Duration::from_millis(100), counters.clone());

        worker.try_deliver(event());
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(counters.handler_errors(), 1);
    }
}
