//! Serial, fire-and-forget persistence of partial progress.
//!
//! Saves are applied strictly in enqueue order by a single worker. A failed
//! save is logged and never stops the job; the next save supersedes it.

use std::sync::Arc;

use chunkline_protocol::{JobSnapshot, JobStore, SessionKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Write data and register the session in the store index.
    Full,
    /// Write data only.
    Partial,
}

struct SaveRequest {
    mode: SaveMode,
    snapshot: JobSnapshot,
}

pub struct SaveLane {
    session_key: SessionKey,
    sender: mpsc::UnboundedSender<SaveRequest>,
    worker: JoinHandle<()>,
    index_registered: bool,
}

impl SaveLane {
    /// `index_registered` is true when the session is already known to the
    /// store index, so every progress save can stay partial.
    pub fn spawn(
        store: Arc<dyn JobStore>,
        session_key: SessionKey,
        index_registered: bool,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<SaveRequest>();
        let worker_key = session_key.clone();

        let worker = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let count = request.snapshot.completed_chunk_count;
                let result = match request.mode {
                    SaveMode::Full => store.save_full(&worker_key, &request.snapshot).await,
                    SaveMode::Partial => store.save_partial(&worker_key, &request.snapshot).await,
                };
                match result {
                    Ok(()) => debug!(session = %worker_key, completed = count, mode = ?request.mode, "progress saved"),
                    Err(error) => warn!(session = %worker_key, completed = count, %error, "progress save failed"),
                }
            }
        });

        Self {
            session_key,
            sender,
            worker,
            index_registered,
        }
    }

    /// Queue a progress snapshot. The first one goes in as a full save unless
    /// the session was already indexed.
    pub fn enqueue(&mut self, snapshot: JobSnapshot) -> SaveMode {
        let mode = if self.index_registered {
            SaveMode::Partial
        } else {
            self.index_registered = true;
            SaveMode::Full
        };
        if self.sender.send(SaveRequest { mode, snapshot }).is_err() {
            warn!(session = %self.session_key, "save lane worker is gone");
        }
        mode
    }

    /// Wait until every queued save has been attempted.
    pub async fn drain(self) {
        let Self {
            session_key,
            sender,
            worker,
            ..
        } = self;
        drop(sender);
        if let Err(error) = worker.await {
            warn!(session = %session_key, %error, "save lane worker panicked");
        }
    }
}
