//! At most one active task per session.
//!
//! Registering a task for a session that already has one cancels the old
//! task first. A task only clears its own entry when it finishes.

use std::collections::HashMap;
use std::sync::Arc;

use chunkline_protocol::{CancellationToken, SessionKey, TaskId, TaskKind};
use parking_lot::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<SessionKey, ActiveTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh task for `session_key`, cancelling any predecessor.
    pub fn register(&self, session_key: &SessionKey, kind: TaskKind) -> ActiveTask {
        let task = ActiveTask {
            task_id: TaskId::generate(kind),
            kind,
            cancel: CancellationToken::new(),
        };

        let previous = self.tasks.lock().insert(session_key.clone(), task.clone());
        if let Some(previous) = previous {
            previous.cancel.cancel();
            info!(
                session = %session_key,
                preempted = %previous.task_id,
                task_id = %task.task_id,
                "preempted active task"
            );
        }
        task
    }

    pub fn is_active(&self, session_key: &SessionKey, task_id: &TaskId) -> bool {
        self.tasks
            .lock()
            .get(session_key)
            .is_some_and(|task| &task.task_id == task_id)
    }

    pub fn active(&self, session_key: &SessionKey) -> Option<ActiveTask> {
        self.tasks.lock().get(session_key).cloned()
    }

    /// Remove the entry only if `task_id` still owns it.
    pub fn finish(&self, session_key: &SessionKey, task_id: &TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks
            .get(session_key)
            .is_some_and(|task| &task.task_id == task_id)
        {
            tasks.remove(session_key);
            true
        } else {
            false
        }
    }

    /// Cancel and drop whatever task the session has.
    pub fn cancel(&self, session_key: &SessionKey, reason: &str) -> Option<TaskId> {
        let removed = self.tasks.lock().remove(session_key)?;
        removed.cancel.cancel();
        info!(session = %session_key, task_id = %removed.task_id, reason, "cancelled active task");
        Some(removed.task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
