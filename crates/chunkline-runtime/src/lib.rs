//! Job execution for chunked translation: retry, task registry, serial
//! progress persistence and the orchestrator that ties them together.

pub mod config;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod save_lane;

pub use config::{OrchestratorConfig, RetryPolicy, TranslateConfig};
pub use orchestrator::{JobHandle, JobOutcome, RefineJob, ResumeMode, TaskOrchestrator, TranslateJob};
pub use registry::{ActiveTask, TaskRegistry};
pub use retry::{RetryAttempt, RetryClassifier, RetryExecutor, TransientErrorClassifier, sleep_or_cancel};
pub use save_lane::{SaveLane, SaveMode};
