// src/client/sync.rs
//! Decides when to drain the vote queue: online transitions, platform
//! background-sync callbacks, and wake-ups relayed by the cache worker.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use super::api::PollClient;
use super::cache::{CacheWorker, TabMessage};
use super::queue::VoteQueue;

/// Tag under which queued submissions register for background sync.
pub const SYNC_TAG: &str = "queued-votes";

/// Best-effort hook into a platform background-sync facility.
pub trait SyncRegistration: Send + Sync {
    /// Ask the platform to wake us later. Implementations swallow their own
    /// failures; a platform without the facility simply never wakes us.
    fn register(&self, tag: &str);
}

/// Platform without background sync. Flushing then relies on online
/// transitions and manual retries alone.
pub struct NoBackgroundSync;

impl SyncRegistration for NoBackgroundSync {
    fn register(&self, _tag: &str) {}
}

/// Advisory, non-blocking user notices. They never gate or reorder the
/// queue operations they describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    OfflineQueueing,
    FlushSent(usize),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::OfflineQueueing => {
                write!(f, "you are offline — submissions will be queued")
            }
            Notice::FlushSent(1) => write!(f, "sent 1 queued vote"),
            Notice::FlushSent(n) => write!(f, "sent {n} queued votes"),
        }
    }
}

/// Shared online/offline state, written by the platform layer.
#[derive(Clone)]
pub struct Connectivity {
    state: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { state: Arc::new(tx) }
    }

    pub fn set_online(&self, online: bool) {
        self.state.send_replace(online);
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

pub struct SyncTrigger {
    queue: Arc<VoteQueue>,
    api: Arc<dyn PollClient>,
    online: watch::Receiver<bool>,
    wake: broadcast::Receiver<TabMessage>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl SyncTrigger {
    pub fn new(
        queue: Arc<VoteQueue>,
        api: Arc<dyn PollClient>,
        connectivity: &Connectivity,
        worker: &CacheWorker,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let trigger = Self {
            queue,
            api,
            online: connectivity.watch(),
            wake: worker.subscribe(),
            notices,
        };
        (trigger, notices_rx)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *self.online.borrow_and_update();
                    if online {
                        debug!("back online, draining queue");
                        self.flush().await;
                    } else {
                        info!("went offline, submissions will be queued");
                        let _ = self.notices.send(Notice::OfflineQueueing);
                    }
                }
                message = self.wake.recv() => {
                    match message {
                        Ok(TabMessage::FlushWanted) => {
                            debug!("woken for background flush");
                            self.flush().await;
                        }
                        Ok(TabMessage::Claimed) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "missed wake messages, flushing anyway");
                            self.flush().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn flush(&self) {
        let sent = self.queue.flush(self.api.as_ref()).await;
        if sent > 0 {
            let _ = self.notices.send(Notice::FlushSent(sent));
        }
    }
}
