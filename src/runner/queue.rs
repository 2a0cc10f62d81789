//! # Queues
//!
//! The durable queue is an external primitive: emit a message, receive messages through a
//! consumer callback with at-least-once delivery. [`InMemoryQueue`] implements it for a
//! single process, with competing consumers and a log of everything emitted.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue closed: {0}")]
    Closed(String),

    #[error("Queue serialization error: {queue_name}: {message}")]
    Serialization { queue_name: String, message: String },
}

/// Callback invoked once per received message
pub type Consumer<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait QueueInterface<T: Send + 'static>: Send + Sync {
    async fn emit(&self, message: T) -> Result<(), QueueError>;

    /// Starts consuming; each call registers one more competing consumer
    fn receive(&self, consumer: Consumer<T>) -> CancelHandle;
}

/// Stops a consumer loop started by [`QueueInterface::receive`]
#[derive(Debug)]
pub struct CancelHandle {
    handle: JoinHandle<()>,
}

impl CancelHandle {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub struct InMemoryQueue<T> {
    name: String,
    sender: mpsc::UnboundedSender<T>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>>,
    emitted: Arc<Mutex<Vec<T>>>,
    closed: AtomicBool,
}

impl<T: Clone + Send + 'static> InMemoryQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            emitted: Arc::new(Mutex::new(Vec::new())),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every message emitted so far, in emission order
    pub fn emitted(&self) -> Vec<T> {
        self.emitted.lock().clone()
    }

    pub fn clear_emitted(&self) {
        self.emitted.lock().clear();
    }

    /// Rejects further emits; messages already queued are still delivered
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> QueueInterface<T> for InMemoryQueue<T> {
    async fn emit(&self, message: T) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(self.name.clone()));
        }
        self.emitted.lock().push(message.clone());
        self.sender
            .send(message)
            .map_err(|_| QueueError::Closed(self.name.clone()))
    }

    fn receive(&self, consumer: Consumer<T>) -> CancelHandle {
        let receiver = Arc::clone(&self.receiver);
        let name = self.name.clone();

        CancelHandle::new(tokio::spawn(async move {
            loop {
                let message = { receiver.lock().await.recv().await };
                match message {
                    Some(message) => consumer(message).await,
                    None => {
                        debug!(queue = %name, "Queue channel closed, stopping consumer");
                        break;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let queue = InMemoryQueue::<String>::new("executions");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let handle = queue.receive(Arc::new(move |message: String| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().push(message) }.boxed()
        }));

        queue.emit("a".to_string()).await.unwrap();
        queue.emit("b".to_string()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while received.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*received.lock(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(queue.emitted().len(), 2);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_competing_consumers_receive_each_message_once() {
        let queue = InMemoryQueue::<u32>::new("worker-task");
        let count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let count = Arc::clone(&count);
                queue.receive(Arc::new(move |_message: u32| {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                    .boxed()
                }))
            })
            .collect();

        for i in 0..20 {
            queue.emit(i).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 20);

        for handle in handles {
            handle.cancel();
        }
    }

    #[tokio::test]
    async fn test_emit_after_close_fails() {
        let queue = InMemoryQueue::<u32>::new("worker-task-result");
        queue.close();
        assert_eq!(
            queue.emit(1).await.unwrap_err(),
            QueueError::Closed("worker-task-result".to_string())
        );
    }
}
