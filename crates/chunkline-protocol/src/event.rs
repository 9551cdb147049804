//! Events emitted by running jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::ids::{SessionKey, TaskId};
use crate::segment::Segment;
use crate::usage::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Translate,
    Refine,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Refine => "refine",
        }
    }
}

/// Which call a retry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPhase {
    Translate,
    Refine,
}

/// One event on the job stream, stamped with the session and task it
/// belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub session_key: SessionKey,
    pub task_id: TaskId,
    pub emitted_at: DateTime<Utc>,
    pub kind: JobEventKind,
}

impl JobEvent {
    pub fn new(session_key: SessionKey, task_id: TaskId, kind: JobEventKind) -> Self {
        Self {
            session_key,
            task_id,
            emitted_at: Utc::now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            JobEventKind::Completed { .. } | JobEventKind::Aborted | JobEventKind::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Started {
        task_kind: TaskKind,
        start_chunk_index: usize,
        total_chunks: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_reason: Option<String>,
    },
    ChunkCompleted {
        chunk_index: usize,
        total_chunks: usize,
        segments: Vec<Segment>,
    },
    Retrying {
        attempt: u32,
        phase: RetryPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<usize>,
    },
    Completed {
        segments: Vec<Segment>,
        usage: TokenUsage,
    },
    Aborted,
    Failed {
        error: String,
        error_kind: ErrorKind,
    },
}
