//! In-memory message broker.

use neighborly_core::broker::{BrokerFuture, MessageBroker, MessageStream};
use neighborly_core::error::BrokerError;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Queue {
    messages: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl Queue {
    fn pop(&self) -> Option<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn push(&self, payload: String) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(payload);
        self.notify.notify_waiters();
    }

    fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// In-memory broker with durable FIFO queues and competing consumers.
///
/// A payload is removed from its queue when a subscriber's stream yields it,
/// which models acknowledge-on-receipt. A pending `next()` that is dropped
/// before it completes leaves the queue untouched.
///
/// # Example
///
/// ```
/// use neighborly_testing::InMemoryBroker;
/// use neighborly_core::broker::MessageBroker;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// broker.publish("reservations", "1,2").await?;
///
/// let mut stream = broker.subscribe("reservations").await?;
/// assert_eq!(stream.next().await.transpose()?, Some("1,2".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    queues: Arc<Mutex<HashMap<String, Arc<Queue>>>>,
    published: Arc<Mutex<Vec<(String, String)>>>,
    fail_publish: Arc<AtomicBool>,
    subscriptions: Arc<AtomicUsize>,
}

impl InMemoryBroker {
    /// Create a broker with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| BrokerError::TransportError("Mutex lock failed".to_string()))?;
        Ok(Arc::clone(queues.entry(name.to_string()).or_default()))
    }

    /// Makes every publish fail while `fail` is true.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Payloads waiting in a queue.
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.queue(queue).map(|q| q.len()).unwrap_or(0)
    }

    /// Every payload accepted for a queue, in publish order.
    #[must_use]
    pub fn published(&self, queue: &str) -> Vec<String> {
        self.published
            .lock()
            .map(|log| {
                log.iter()
                    .filter(|(name, _)| name == queue)
                    .map(|(_, payload)| payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of subscriptions opened so far.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl MessageBroker for InMemoryBroker {
    fn declare_queue(&self, queue: &str) -> BrokerFuture<'_, ()> {
        let result = self.queue(queue).map(|_| ());
        Box::pin(async move { result })
    }

    fn publish(&self, queue: &str, payload: &str) -> BrokerFuture<'_, ()> {
        let queue = queue.to_string();
        let payload = payload.to_string();

        Box::pin(async move {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(BrokerError::PublishFailed {
                    queue,
                    reason: "injected: broker rejected publish".to_string(),
                });
            }

            self.queue(&queue)?.push(payload.clone());
            if let Ok(mut log) = self.published.lock() {
                log.push((queue, payload));
            }
            Ok(())
        })
    }

    fn subscribe(&self, queue: &str) -> BrokerFuture<'_, MessageStream> {
        let queue = self.queue(queue);

        Box::pin(async move {
            let weak = Arc::downgrade(&queue?);
            self.subscriptions.fetch_add(1, Ordering::SeqCst);

            // Ends once every clone of the broker is dropped
            let stream = async_stream::stream! {
                while let Some(queue) = weak.upgrade() {
                    let notified = queue.notify.notified();
                    tokio::pin!(notified);
                    // Register before checking so a concurrent publish is not missed
                    notified.as_mut().enable();

                    if let Some(payload) = queue.pop() {
                        yield Ok::<String, BrokerError>(payload);
                    } else {
                        notified.await;
                    }
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
