use chunkline_protocol::{JobEvent, SessionKey};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Fan-out of job events to any number of observers.
///
/// Publishing never blocks and never fails; events sent with no subscriber
/// are dropped. Slow subscribers skip what they lagged behind on.
#[derive(Clone, Debug)]
pub struct JobEventHub {
    sender: broadcast::Sender<JobEvent>,
}

impl Default for JobEventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl JobEventHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        trace!(session = %event.session_key, task_id = %event.task_id, "publishing job event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Every event, skipping over lag gaps.
    pub fn subscribe_stream(&self) -> impl Stream<Item = JobEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "job event subscriber lagged");
                    None
                }
            }
        })
    }

    /// Events for one session only.
    pub fn subscribe_session(
        &self,
        session_key: SessionKey,
    ) -> impl Stream<Item = JobEvent> + Send + 'static {
        self.subscribe_stream().filter(move |event| {
            let matches = event.session_key == session_key;
            async move { matches }
        })
    }
}
