//! Per-user message queues.
//!
//! Each active user gets an unbounded FIFO and a worker task that feeds the
//! engine one message at a time, so one user's messages are answered in
//! arrival order while different users proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channels::{Channel, InboundMessage, MessageStream};
use crate::intake::{IntakeEngine, render};

/// How long a worker waits for another message before retiring.
const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(60);

type QueueMap = HashMap<String, mpsc::UnboundedSender<InboundMessage>>;
type Queues = Arc<Mutex<QueueMap>>;

/// Lock the queue map, recovering it if a previous holder panicked.
///
/// The map only ever sees single inserts and removes, so a poisoned map is
/// still consistent.
fn lock_queues(queues: &Mutex<QueueMap>) -> MutexGuard<'_, QueueMap> {
    match queues.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Dispatcher queue map poisoned; recovering");
            queues.clear_poison();
            poisoned.into_inner()
        }
    }
}

pub struct Dispatcher {
    engine: Arc<IntakeEngine>,
    channel: Arc<dyn Channel>,
    queues: Queues,
    idle_grace: Duration,
}

impl Dispatcher {
    pub fn new(engine: Arc<IntakeEngine>, channel: Arc<dyn Channel>) -> Self {
        Self {
            engine,
            channel,
            queues: Arc::new(Mutex::new(HashMap::new())),
            idle_grace: DEFAULT_IDLE_GRACE,
        }
    }

    pub fn with_idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    /// Number of users with a live worker.
    pub fn active_workers(&self) -> usize {
        lock_queues(&self.queues).len()
    }

    /// Consume a channel's message stream until it ends.
    pub async fn run(&self, mut stream: MessageStream) {
        while let Some(msg) = stream.next().await {
            self.dispatch(msg);
        }
        debug!(channel = self.channel.name(), "Message stream ended");
    }

    /// Queue a message behind any earlier ones from the same user.
    pub fn dispatch(&self, msg: InboundMessage) {
        let mut queues = lock_queues(&self.queues);

        let msg = match queues.get(&msg.user_id) {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return,
                // Worker gone without deregistering; start a fresh one.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let user_id = msg.user_id.clone();
        // A freshly created receiver is alive, so this cannot fail.
        let _ = tx.send(msg);
        queues.insert(user_id.clone(), tx);

        tokio::spawn(worker(
            user_id,
            rx,
            Arc::clone(&self.engine),
            Arc::clone(&self.channel),
            Arc::clone(&self.queues),
            self.idle_grace,
        ));
    }
}

async fn worker(
    user_id: String,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    engine: Arc<IntakeEngine>,
    channel: Arc<dyn Channel>,
    queues: Queues,
    idle_grace: Duration,
) {
    debug!(user_id = %user_id, "Worker started");
    loop {
        match tokio::time::timeout(idle_grace, rx.recv()).await {
            Ok(Some(msg)) => {
                let reply = engine.handle(&msg).await;
                if let Err(e) = channel.send_text(&msg.user_id, &render(&reply)).await {
                    warn!(user_id = %msg.user_id, error = %e, "Failed to send reply");
                }
            }
            Ok(None) => break,
            Err(_) => {
                // Retire only if nothing slipped in; senders hold the same lock.
                let mut map = lock_queues(&queues);
                if rx.is_empty() {
                    map.remove(&user_id);
                    break;
                }
            }
        }
    }
    debug!(user_id = %user_id, "Worker retired");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::channels::{FileRef, PairingStatus};
    use crate::error::ChannelError;
    use crate::intake::{SessionStore, StaticCatalog};
    use crate::storage::LocalBlobStore;
    use crate::store::LibSqlBackend;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Forwards every outbound reply into a channel the test reads from.
    struct ForwardingChannel {
        sent: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl Channel for ForwardingChannel {
        fn name(&self) -> &str {
            "forwarding"
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send_text(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
            self.sent
                .send((user_id.to_string(), text.to_string()))
                .map_err(|e| ChannelError::SendFailed {
                    name: "forwarding".into(),
                    reason: e.to_string(),
                })
        }

        async fn download(&self, _file: &FileRef) -> Result<Vec<u8>, ChannelError> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn pairing_status(&self) -> PairingStatus {
            PairingStatus {
                paired: true,
                detail: "forwarding".into(),
            }
        }
    }

    async fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel: Arc<dyn Channel> = Arc::new(ForwardingChannel { sent: tx });
        let engine = IntakeEngine::new(
            Arc::new(StaticCatalog::new(Vec::new())),
            Arc::new(LibSqlBackend::new_memory().await.unwrap()),
            Arc::new(LocalBlobStore::new(std::env::temp_dir(), "http://localhost/files")),
            Arc::clone(&channel),
            Arc::new(SessionStore::new()),
        );
        (Dispatcher::new(Arc::new(engine), channel), rx)
    }

    fn poison(queues: &Queues) {
        let queues = Arc::clone(queues);
        let _ = std::thread::spawn(move || {
            let _guard = queues.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
    }

    #[tokio::test]
    async fn dispatch_recovers_poisoned_queue_map() {
        let (dispatcher, mut sent) = dispatcher().await;
        poison(&dispatcher.queues);
        assert!(dispatcher.queues.is_poisoned());

        dispatcher.dispatch(InboundMessage::text("u1", "menu"));
        let (user, _) = tokio::time::timeout(TIMEOUT, sent.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user, "u1");
        assert!(!dispatcher.queues.is_poisoned());
    }

    #[tokio::test]
    async fn idle_worker_retires_from_poisoned_map() {
        let (dispatcher, mut sent) = dispatcher().await;
        let dispatcher = dispatcher.with_idle_grace(Duration::from_millis(50));

        dispatcher.dispatch(InboundMessage::text("u1", "menu"));
        tokio::time::timeout(TIMEOUT, sent.recv())
            .await
            .unwrap()
            .unwrap();
        poison(&dispatcher.queues);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(dispatcher.active_workers(), 0);

        dispatcher.dispatch(InboundMessage::text("u1", "menu"));
        let (user, _) = tokio::time::timeout(TIMEOUT, sent.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user, "u1");
    }
}
