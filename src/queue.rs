//! 有界队列：显式区分“满载丢弃”与“满载阻塞”两种策略。

use thiserror::Error;
use tokio::sync::mpsc;

/// Full-queue behavior, named so call sites document their choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Producer liveness wins: a push into a full queue discards the pushed
    /// item and reports it. Used for broadcaster fan-out.
    DropNewest,
    /// Content integrity wins: a push into a full queue waits for capacity.
    /// Used for the interactor's talking buffers.
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Dropped,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue closed by receiver")]
pub struct QueueClosed;

/// Creates a bounded queue with the given full-queue policy. The receiver is
/// a plain mpsc receiver: closure is observed as end-of-data, never an error.
pub fn bounded<T: Send>(
    capacity: usize,
    policy: QueuePolicy,
) -> (QueueSender<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx, policy }, rx)
}

#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    policy: QueuePolicy,
}

impl<T: Send> QueueSender<T> {
    pub async fn push(&self, item: T) -> Result<PushOutcome, QueueClosed> {
        match self.policy {
            QueuePolicy::DropNewest => match self.tx.try_send(item) {
                Ok(()) => Ok(PushOutcome::Delivered),
                Err(mpsc::error::TrySendError::Full(_)) => Ok(PushOutcome::Dropped),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueClosed),
            },
            QueuePolicy::Blocking => self
                .tx
                .send(item)
                .await
                .map(|_| PushOutcome::Delivered)
                .map_err(|_| QueueClosed),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            policy: self.policy,
        }
    }
}
