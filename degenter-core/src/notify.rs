//! Intra-process topic bus.
//!
//! Each subscription gets its own unbounded channel and worker task, so a
//! slow handler never blocks publishers. Delivery is at-least-once within
//! the process; ordering across concurrent publishers is not guaranteed.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Topic name for pool creations.
pub const TOPIC_PAIR_CREATED: &str = "pair_created";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub topic: String,
    pub data: Value,
}

#[derive(Default)]
pub struct NotifyBus {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<NotifyPayload>>>>,
}

impl NotifyBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes to all live subscribers of `topic`, returning how many
    /// received it. Dead subscriptions are pruned on the way.
    pub fn publish(&self, topic: &str, data: Value) -> usize {
        let payload = NotifyPayload {
            topic: topic.to_string(),
            data,
        };

        let mut topics = self.topics.lock().expect("notify bus lock poisoned");
        let Some(senders) = topics.get_mut(topic) else {
            return 0;
        };
        senders.retain(|tx| tx.send(payload.clone()).is_ok());
        senders.len()
    }

    /// Registers a subscription and returns its receiving end.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<NotifyPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .expect("notify bus lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Subscribes and spawns a dedicated worker that feeds each payload to
    /// `handler` in order.
    pub fn listen<F, Fut>(&self, topic: &str, handler: F)
    where
        F: Fn(NotifyPayload) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe(topic);
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                handler(payload).await;
            }
        });
    }
}
