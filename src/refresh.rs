//! Background expiry sweeper
//!
//! Periodically deletes expired cache rows on a tokio task and reports each
//! run over a channel.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::CacheStore;

/// Messages sent from the background sweeper
#[derive(Debug, Clone, PartialEq)]
pub enum SweepMessage {
    /// A sweep completed and removed this many rows
    Swept(u64),
    /// A sweep failed
    SweepFailed(String),
}

/// Configuration for the sweep interval
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Whether the sweeper runs at all
    pub enabled: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300), // 5 minutes
            enabled: true,
        }
    }
}

/// Handle for controlling the background sweeper
pub struct SweepHandle {
    /// Channel for receiving sweep reports
    pub receiver: mpsc::Receiver<SweepMessage>,
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Spawns the sweeper task
    ///
    /// The first sweep runs one interval after spawning.
    pub fn spawn(store: CacheStore, config: SweepConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = config.enabled.then(|| {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                // Skip the first tick (immediate)
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let message = match store.sweep().await {
                                Ok(removed) => {
                                    if removed > 0 {
                                        tracing::info!(removed, "removed expired cache entries");
                                    }
                                    SweepMessage::Swept(removed)
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "cache sweep failed");
                                    SweepMessage::SweepFailed(e.to_string())
                                }
                            };
                            // Reports are dropped when nobody drains the channel
                            let _ = msg_tx.try_send(message);
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
            })
        });

        Self {
            receiver: msg_rx,
            shutdown_tx,
            task,
        }
    }

    /// Stops the sweeper and waits for the task to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Checks for a pending sweep report without blocking
pub fn try_recv(handle: &mut SweepHandle) -> Option<SweepMessage> {
    handle.receiver.try_recv().ok()
}
