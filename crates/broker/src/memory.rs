use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::EventEnvelope;
use tokio::sync::{Mutex, watch};

use crate::client::{BrokerClient, BrokerConsumer, Delivery};
use crate::error::{BrokerError, Result};

struct State {
    log: Vec<EventEnvelope>,
    /// Next uncommitted offset per consumer group.
    committed: HashMap<String, i64>,
}

struct Shared {
    state: Mutex<State>,
    fail_on_publish: AtomicBool,
    len_tx: watch::Sender<usize>,
}

/// In-memory broker implementation for testing.
///
/// Single-partition, totally ordered log. Consumers track a committed
/// offset per group; a delivery that is never committed is handed out
/// again on the next `recv`, mimicking broker redelivery.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Creates a new empty in-memory broker.
    pub fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    log: Vec::new(),
                    committed: HashMap::new(),
                }),
                fail_on_publish: AtomicBool::new(false),
                len_tx,
            }),
        }
    }

    /// Subscribes a consumer group to the log.
    pub fn subscribe(&self, group_id: impl Into<String>) -> InMemoryConsumer {
        InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            group_id: group_id.into(),
            len_rx: self.shared.len_tx.subscribe(),
        }
    }

    /// Makes subsequent publishes fail (simulates an unreachable broker).
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.shared.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of published envelopes.
    pub async fn published_count(&self) -> usize {
        self.shared.state.lock().await.log.len()
    }

    /// Returns a copy of everything published so far, in order.
    pub async fn published(&self) -> Vec<EventEnvelope> {
        self.shared.state.lock().await.log.clone()
    }

    /// Returns the committed offset for a group, if it ever committed.
    pub async fn committed_offset(&self, group_id: &str) -> Option<i64> {
        let state = self.shared.state.lock().await;
        state.committed.get(group_id).map(|next| next - 1)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        if self.shared.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::PublishFailed(
                "broker unreachable".to_string(),
            ));
        }

        let mut state = self.shared.state.lock().await;
        state.log.push(envelope.clone());
        let len = state.log.len();
        drop(state);

        // Wake consumers blocked in recv.
        let _ = self.shared.len_tx.send(len);
        Ok(())
    }
}

/// Consumer handle for one group on an [`InMemoryBroker`].
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    len_rx: watch::Receiver<usize>,
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        loop {
            {
                let state = self.shared.state.lock().await;
                let next = state.committed.get(&self.group_id).copied().unwrap_or(0);
                if let Some(envelope) = state.log.get(next as usize) {
                    return Ok(Some(Delivery {
                        envelope: envelope.clone(),
                        partition: 0,
                        offset: next,
                    }));
                }
            }

            if self.len_rx.changed().await.is_err() {
                // All broker handles dropped: subscription closed.
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, _partition: i32, offset: i64) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        let entry = state.committed.entry(self.group_id.clone()).or_insert(0);
        if offset + 1 > *entry {
            *entry = offset + 1;
        }
        Ok(())
    }
}
