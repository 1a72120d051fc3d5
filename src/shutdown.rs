//! Graceful shutdown signalling.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::info;

use crate::hub::PartitionHub;

/// Idempotent shutdown flag.
///
/// The first trigger offers the end signal to the partition hub and wakes the
/// runloop; later triggers are no-ops. The runloop re-reads the flag before
/// every command and inside the poll critical section.
pub(crate) struct ShutdownGate {
    flag: AtomicBool,
    wake: Notify,
    hub: PartitionHub,
}

impl ShutdownGate {
    pub fn new(hub: PartitionHub) -> Self {
        Self {
            flag: AtomicBool::new(false),
            wake: Notify::new(),
            hub,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown. Safe to call from any task, any number of times.
    pub fn shut_down(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("graceful shutdown requested");
            self.hub.end();
            self.wake.notify_one();
        }
    }

    /// Resolves when shutdown is requested after the runloop started waiting.
    pub async fn woken(&self) {
        self.wake.notified().await;
    }
}
