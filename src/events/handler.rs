//! Event Handlers
//!
//! Handlers run on their own delivery worker, never on the producer's task.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::types::BudgetEvent;

/// Receives events from the bus
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BudgetEvent) -> anyhow::Result<()>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(BudgetEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: &BudgetEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Adapt an async closure into a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(BudgetEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Handler that forwards every event into an unbounded channel
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<BudgetEvent>,
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn handle(&self, event: &BudgetEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

/// Create a forwarding handler and the receiving end of its channel
pub fn channel_handler() -> (Arc<dyn EventHandler>, mpsc::UnboundedReceiver<BudgetEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelHandler { tx }), rx)
}
