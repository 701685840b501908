//! 工作进程连接的单上游接入与包扇出。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::queue::{self, PushOutcome, QueuePolicy, QueueSender};
use crate::telemetry::events::record_subscriber_overflow;
use crate::transport::{
    read_packet, write_packet, Packet, PacketEvent, PacketType, SocketServer, TransportError,
};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("no active worker connection")]
    NoActiveWorker,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 100,
        }
    }
}

struct SubscriberSlot {
    sender: QueueSender<Packet>,
    dropped: Arc<AtomicU64>,
}

/// Read handle over one fan-out queue. Dropping it closes the queue; the
/// broadcaster prunes the registration on the next fan-out pass.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Packet>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocks until a packet arrives; `None` means the queue was closed,
    /// which readers treat as end-of-data rather than an error.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Packet> {
        self.receiver.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
pub(crate) fn test_subscription(capacity: usize) -> (QueueSender<Packet>, Subscription) {
    let (sender, receiver) = queue::bounded(capacity, QueuePolicy::Blocking);
    (sender, Subscription { id: 0, receiver })
}

/// Accepts exactly one upstream worker connection at a time and fans every
/// inbound packet out to all registered subscriber queues. Fan-out never
/// waits on a slow subscriber; the reverse path writes directly on the
/// active connection's write half.
pub struct PacketBroadcaster {
    server: SocketServer,
    config: BroadcastConfig,
    subscribers: RwLock<HashMap<u64, SubscriberSlot>>,
    next_subscriber_id: AtomicU64,
    writer: Mutex<Option<OwnedWriteHalf>>,
    stop_tx: watch::Sender<bool>,
}

impl PacketBroadcaster {
    pub fn new(server: SocketServer, config: BroadcastConfig) -> Self {
        let (stop_tx, _stop_rx) = watch::channel(false);
        Self {
            server,
            config,
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            writer: Mutex::new(None),
            stop_tx,
        }
    }

    pub fn spawn(this: &Arc<Self>) -> JoinHandle<()> {
        let broadcaster = Arc::clone(this);
        tokio::spawn(async move {
            broadcaster.run().await;
        })
    }

    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = queue::bounded(
            self.config.subscriber_queue_capacity,
            QueuePolicy::DropNewest,
        );
        self.subscribers.write().await.insert(
            id,
            SubscriberSlot {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
        );
        debug!(target: "broadcast", subscriber_id = id, "subscriber registered");
        Subscription { id, receiver }
    }

    pub async fn unsubscribe(&self, id: u64) {
        if self.subscribers.write().await.remove(&id).is_some() {
            debug!(target: "broadcast", subscriber_id = id, "subscriber deregistered");
        }
    }

    /// Pushes a typed packet back to the active worker over the same
    /// connection the fan-out loop is reading from.
    pub async fn send_to_worker(
        &self,
        packet_type: PacketType,
        payload: &[u8],
    ) -> Result<(), BroadcastError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(BroadcastError::NoActiveWorker)?;
        write_packet(writer, packet_type, payload).await?;
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();

        'accept: loop {
            info!(target: "broadcast", path = %self.server.path().display(), "waiting for worker");

            let stream = tokio::select! {
                biased;
                _ = stop_rx.changed() => break 'accept,
                accepted = self.server.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(target: "broadcast", %err, "accept failed");
                        sleep(ACCEPT_RETRY_DELAY).await;
                        continue 'accept;
                    }
                },
            };

            info!(target: "broadcast", "worker connected");
            let (mut read_half, write_half) = stream.into_split();
            // A new connection supersedes any previous write half.
            *self.writer.lock().await = Some(write_half);

            loop {
                let event = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break 'accept,
                    event = read_packet(&mut read_half) => event,
                };

                match event {
                    Ok(PacketEvent::Frame(packet)) => self.fan_out(packet).await,
                    Ok(PacketEvent::EndOfStream(packet_type)) => {
                        // Clip boundary on the live path; subscribers keep
                        // consuming the continuous stream.
                        debug!(
                            target: "broadcast",
                            packet_type = packet_type.as_str(),
                            "end-of-stream sentinel from worker"
                        );
                    }
                    Err(TransportError::Disconnected) => {
                        debug!(target: "broadcast", "worker disconnected");
                        break;
                    }
                    Err(err) => {
                        warn!(target: "broadcast", %err, "aborting worker connection");
                        break;
                    }
                }
            }

            *self.writer.lock().await = None;
        }

        *self.writer.lock().await = None;
        debug!(target: "broadcast", "broadcast loop stopped");
    }

    async fn fan_out(&self, packet: Packet) {
        let targets: Vec<(u64, QueueSender<Packet>, Arc<AtomicU64>)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .map(|(id, slot)| (*id, slot.sender.clone(), Arc::clone(&slot.dropped)))
                .collect()
        };

        let mut closed = Vec::new();
        for (id, sender, dropped) in targets {
            match sender.push(packet.clone()).await {
                Ok(PushOutcome::Delivered) => {}
                Ok(PushOutcome::Dropped) => {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    record_subscriber_overflow(id, total);
                }
                Err(_closed) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in closed {
                if subscribers.remove(&id).is_some() {
                    debug!(target: "broadcast", subscriber_id = id, "pruned closed subscriber");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
