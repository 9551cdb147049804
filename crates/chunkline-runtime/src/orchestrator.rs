//! Job lifecycle: start, resume, preempt, persist, finish.

use std::sync::Arc;

use chrono::Utc;
use chunkline_events::JobEventHub;
use chunkline_plan::{
    Chunk, ResumeResolver, build_checkpoints, build_fingerprint, continuation_context, plan_chunks,
};
use chunkline_protocol::{
    Checkpoint, JobError, JobEvent, JobEventKind, JobResult, JobSnapshot, JobStore, RefineRequest,
    RetryPhase, Segment, SessionKey, TaskId, TaskKind, TokenUsage, TranslateChunkRequest,
    TranslationProvider, UsageSink, join_texts, parse_timecode,
};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::config::{OrchestratorConfig, TranslateConfig};
use crate::registry::{ActiveTask, TaskRegistry};
use crate::retry::{RetryExecutor, sleep_or_cancel};
use crate::save_lane::SaveLane;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResumeMode {
    /// Reuse a complete snapshot, or resume a partial one.
    #[default]
    Auto,
    /// Ignore any stored snapshot and translate from the first chunk.
    Restart,
}

#[derive(Debug, Clone)]
pub struct TranslateJob {
    pub session_key: SessionKey,
    pub segments: Vec<Segment>,
    pub source_lang: String,
    pub config: TranslateConfig,
    pub resume: ResumeMode,
}

impl TranslateJob {
    pub fn new(session_key: SessionKey, segments: Vec<Segment>) -> Self {
        Self {
            session_key,
            segments,
            source_lang: "Auto".to_owned(),
            config: TranslateConfig::default(),
            resume: ResumeMode::Auto,
        }
    }

    pub fn with_source_lang(mut self, source_lang: impl Into<String>) -> Self {
        self.source_lang = source_lang.into();
        self
    }

    pub fn with_config(mut self, config: TranslateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resume(mut self, resume: ResumeMode) -> Self {
        self.resume = resume;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RefineJob {
    pub session_key: SessionKey,
    /// Raw source lines the refined output is aligned to.
    pub original: Vec<Segment>,
    /// Draft translation to re-segment.
    pub draft: Vec<Segment>,
    pub config: TranslateConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        segments: Vec<Segment>,
        usage: TokenUsage,
    },
    Aborted,
    Failed(JobError),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug)]
pub struct JobHandle {
    pub task_id: TaskId,
    pub session_key: SessionKey,
    join: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub async fn wait(self) -> JobOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(error) => JobOutcome::Failed(JobError::Generic(format!("job task failed: {error}"))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Where a translate run begins.
struct StartPoint {
    start_chunk_index: usize,
    translations: Vec<Segment>,
    resume_reason: Option<String>,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    provider: Arc<dyn TranslationProvider>,
    usage: Arc<dyn UsageSink>,
    events: JobEventHub,
    registry: TaskRegistry,
    retry: RetryExecutor,
    resolver: ResumeResolver,
}

impl TaskOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        provider: Arc<dyn TranslationProvider>,
        usage: Arc<dyn UsageSink>,
        events: JobEventHub,
    ) -> Self {
        let retry = RetryExecutor::new(config.retry);
        Self {
            config,
            store,
            provider,
            usage,
            events,
            registry: TaskRegistry::new(),
            retry,
            resolver: ResumeResolver::default(),
        }
    }

    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_resolver(mut self, resolver: ResumeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn events(&self) -> &JobEventHub {
        &self.events
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Begin or resume a translation. Returns as soon as the task is
    /// registered; the outcome arrives through events and the handle.
    #[instrument(skip(self, job), fields(session = %job.session_key, segments = job.segments.len()))]
    pub fn start_translate(&self, job: TranslateJob) -> JobResult<JobHandle> {
        if job.segments.is_empty() {
            return Err(JobError::InvalidInput("transcript has no segments".into()));
        }

        let task = self.registry.register(&job.session_key, TaskKind::Translate);
        let span = info_span!("translate_job", session = %job.session_key, task_id = %task.task_id);
        let task_id = task.task_id.clone();
        let session_key = job.session_key.clone();
        let this = self.clone();
        let join = tokio::spawn(async move { this.run_translate(task, job).await }.instrument(span));

        Ok(JobHandle {
            task_id,
            session_key,
            join,
        })
    }

    #[instrument(skip(self, job), fields(session = %job.session_key, original = job.original.len()))]
    pub fn start_refine(&self, job: RefineJob) -> JobResult<JobHandle> {
        if job.original.is_empty() || job.draft.is_empty() {
            return Err(JobError::InvalidInput(
                "refine needs both original and draft segments".into(),
            ));
        }

        let task = self.registry.register(&job.session_key, TaskKind::Refine);
        let span = info_span!("refine_job", session = %job.session_key, task_id = %task.task_id);
        let task_id = task.task_id.clone();
        let session_key = job.session_key.clone();
        let this = self.clone();
        let join = tokio::spawn(async move { this.run_refine(task, job).await }.instrument(span));

        Ok(JobHandle {
            task_id,
            session_key,
            join,
        })
    }

    /// Abort whatever task the session is running.
    pub fn cancel(&self, session_key: &SessionKey, reason: &str) -> Option<TaskId> {
        self.registry.cancel(session_key, reason)
    }

    pub fn is_running(&self, session_key: &SessionKey) -> bool {
        self.registry.active(session_key).is_some()
    }

    fn emit(&self, session_key: &SessionKey, task_id: &TaskId, kind: JobEventKind) {
        self.events
            .publish(JobEvent::new(session_key.clone(), task_id.clone(), kind));
    }

    fn still_active(&self, session_key: &SessionKey, task: &ActiveTask) -> bool {
        !task.cancel.is_cancelled() && self.registry.is_active(session_key, &task.task_id)
    }

    async fn load_snapshot(&self, session_key: &SessionKey) -> Option<JobSnapshot> {
        match self.store.load(session_key).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, "failed to load stored snapshot, starting fresh");
                None
            }
        }
    }

    async fn record_usage(&self, usage: TokenUsage) {
        if let Err(error) = self.usage.record(usage).await {
            warn!(%error, "failed to record token usage");
        }
    }

    fn resolve_start(
        &self,
        cached: Option<&JobSnapshot>,
        chunks: &[Chunk],
        transcript_fingerprint: &str,
    ) -> StartPoint {
        let Some(cached) = cached else {
            return StartPoint {
                start_chunk_index: 0,
                translations: Vec::new(),
                resume_reason: None,
            };
        };

        let plan = self
            .resolver
            .resolve(cached, chunks, transcript_fingerprint);
        info!(
            reason = %plan.reason,
            start_chunk_index = plan.start_chunk_index,
            kept = plan.initial_translations.len(),
            "resuming from stored snapshot"
        );
        StartPoint {
            start_chunk_index: plan.start_chunk_index,
            translations: plan.initial_translations,
            resume_reason: Some(plan.reason.to_string()),
        }
    }

    async fn run_translate(self, task: ActiveTask, job: TranslateJob) -> JobOutcome {
        let session_key = job.session_key.clone();
        let outcome = self.drive_translate(&task, &job).await;
        self.registry.finish(&session_key, &task.task_id);
        outcome
    }

    async fn drive_translate(&self, task: &ActiveTask, job: &TranslateJob) -> JobOutcome {
        let session_key = &job.session_key;
        let task_id = &task.task_id;

        let cached = match job.resume {
            ResumeMode::Auto => self.load_snapshot(session_key).await,
            ResumeMode::Restart => None,
        };

        if let Some(snapshot) = cached.as_ref().filter(|snapshot| !snapshot.is_partial) {
            info!("complete snapshot found, replaying without upstream calls");
            let segments = snapshot.translations.clone();
            self.emit(
                session_key,
                task_id,
                JobEventKind::Completed {
                    segments: segments.clone(),
                    usage: TokenUsage::default(),
                },
            );
            return JobOutcome::Completed {
                segments,
                usage: TokenUsage::default(),
            };
        }

        let chunks = plan_chunks(&job.segments, self.config.limits);
        let transcript_fingerprint = build_fingerprint(&job.segments);
        let total = chunks.len();

        let start = self.resolve_start(cached.as_ref(), &chunks, &transcript_fingerprint);
        let checkpoints = build_checkpoints(&chunks);
        let mut translations = start.translations;
        let mut context = continuation_context(&translations, self.config.context_tail);
        let mut usage = TokenUsage::default();

        let index_registered = start.start_chunk_index > 0 || !translations.is_empty();
        let mut lane = SaveLane::spawn(self.store.clone(), session_key.clone(), index_registered);

        info!(start_chunk_index = start.start_chunk_index, total, "translation started");
        self.emit(
            session_key,
            task_id,
            JobEventKind::Started {
                task_kind: TaskKind::Translate,
                start_chunk_index: start.start_chunk_index,
                total_chunks: total,
                resume_reason: start.resume_reason,
            },
        );

        for (index, chunk) in chunks.iter().enumerate().skip(start.start_chunk_index) {
            if !self.still_active(session_key, task) {
                return self.abort(lane, session_key, task_id).await;
            }

            let request = TranslateChunkRequest {
                session_key: session_key.clone(),
                task_id: task_id.clone(),
                chunk_index: index,
                total_chunks: total,
                segments: chunk.segments.clone(),
                context: context.clone(),
                source_lang: job.source_lang.clone(),
                target_lang: session_key.target_lang.clone(),
                thinking_level: job.config.thinking_level.clone(),
            };

            let result = self
                .retry
                .run(
                    &task.cancel,
                    || self.provider.translate_chunk(request.clone(), &task.cancel),
                    |attempt| {
                        if self.still_active(session_key, task) {
                            self.emit(
                                session_key,
                                task_id,
                                JobEventKind::Retrying {
                                    attempt: attempt.attempt,
                                    phase: RetryPhase::Translate,
                                    chunk_index: Some(index),
                                },
                            );
                        }
                    },
                )
                .await;

            let output = match result {
                Ok(output) => output,
                Err(JobError::Cancelled) => return self.abort(lane, session_key, task_id).await,
                Err(error) => return self.fail(lane, session_key, task_id, error).await,
            };

            self.record_usage(output.usage).await;
            usage += output.usage;

            if !self.still_active(session_key, task) {
                debug!(chunk_index = index, "dropping chunk result of inactive task");
                return self.abort(lane, session_key, task_id).await;
            }

            if !output.segments.is_empty() {
                let tail = output.segments.len().saturating_sub(self.config.context_tail);
                context = join_texts(&output.segments[tail..]);
            }

            let appended = append_after_last(&mut translations, output.segments);
            debug!(chunk_index = index, appended = appended.len(), "chunk translated");

            self.emit(
                session_key,
                task_id,
                JobEventKind::ChunkCompleted {
                    chunk_index: index,
                    total_chunks: total,
                    segments: appended,
                },
            );

            lane.enqueue(self.snapshot(
                job,
                &translations,
                true,
                index + 1,
                &transcript_fingerprint,
                &checkpoints[..=index],
            ));

            if index + 1 < total
                && sleep_or_cancel(self.config.inter_chunk_delay, &task.cancel)
                    .await
                    .is_err()
            {
                return self.abort(lane, session_key, task_id).await;
            }
        }

        lane.drain().await;

        let final_snapshot = self.snapshot(
            job,
            &translations,
            false,
            total,
            &transcript_fingerprint,
            &checkpoints,
        );
        if let Err(error) = self.store.save_full(session_key, &final_snapshot).await {
            warn!(%error, "final snapshot save failed");
            self.emit_failed(session_key, task_id, &error);
            return JobOutcome::Failed(error);
        }

        info!(
            segments = translations.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.billed_output(),
            "translation completed"
        );
        self.emit(
            session_key,
            task_id,
            JobEventKind::Completed {
                segments: translations.clone(),
                usage,
            },
        );
        JobOutcome::Completed {
            segments: translations,
            usage,
        }
    }

    async fn run_refine(self, task: ActiveTask, job: RefineJob) -> JobOutcome {
        let session_key = job.session_key.clone();
        let outcome = self.drive_refine(&task, &job).await;
        self.registry.finish(&session_key, &task.task_id);
        outcome
    }

    async fn drive_refine(&self, task: &ActiveTask, job: &RefineJob) -> JobOutcome {
        let session_key = &job.session_key;
        let task_id = &task.task_id;

        self.emit(
            session_key,
            task_id,
            JobEventKind::Started {
                task_kind: TaskKind::Refine,
                start_chunk_index: 0,
                total_chunks: 1,
                resume_reason: None,
            },
        );

        let request = RefineRequest {
            session_key: session_key.clone(),
            task_id: task_id.clone(),
            original: job.original.clone(),
            draft_text: join_texts(&job.draft),
            thinking_level: job.config.thinking_level.clone(),
        };

        let result = self
            .retry
            .run(
                &task.cancel,
                || self.provider.refine(request.clone(), &task.cancel),
                |attempt| {
                    if self.still_active(session_key, task) {
                        self.emit(
                            session_key,
                            task_id,
                            JobEventKind::Retrying {
                                attempt: attempt.attempt,
                                phase: RetryPhase::Refine,
                                chunk_index: None,
                            },
                        );
                    }
                },
            )
            .await;

        let output = match result {
            Ok(output) => output,
            Err(JobError::Cancelled) => {
                info!("refine aborted");
                self.emit(session_key, task_id, JobEventKind::Aborted);
                return JobOutcome::Aborted;
            }
            Err(error) => {
                warn!(%error, "refine failed");
                self.emit_failed(session_key, task_id, &error);
                return JobOutcome::Failed(error);
            }
        };

        self.record_usage(output.usage).await;

        if !self.still_active(session_key, task) {
            info!("refine result dropped after cancel");
            self.emit(session_key, task_id, JobEventKind::Aborted);
            return JobOutcome::Aborted;
        }

        let previous = self.load_snapshot(session_key).await;
        let snapshot = JobSnapshot {
            session_key: session_key.clone(),
            translations: output.segments.clone(),
            is_partial: false,
            completed_chunk_count: previous
                .as_ref()
                .map_or(0, |snapshot| snapshot.completed_chunk_count),
            transcript_fingerprint: previous
                .as_ref()
                .map(|snapshot| snapshot.transcript_fingerprint.clone())
                .unwrap_or_default(),
            source_chunk_checkpoints: previous
                .map(|snapshot| snapshot.source_chunk_checkpoints)
                .unwrap_or_default(),
            is_refined: true,
            title: job.config.title.clone(),
            source_lang: "Auto".to_owned(),
            target_lang: session_key.target_lang.clone(),
            timestamp: Utc::now(),
        };
        if let Err(error) = self.store.save_full(session_key, &snapshot).await {
            warn!(%error, "refined snapshot save failed");
            self.emit_failed(session_key, task_id, &error);
            return JobOutcome::Failed(error);
        }

        info!(segments = output.segments.len(), "refine completed");
        self.emit(
            session_key,
            task_id,
            JobEventKind::Completed {
                segments: output.segments.clone(),
                usage: output.usage,
            },
        );
        JobOutcome::Completed {
            segments: output.segments,
            usage: output.usage,
        }
    }

    async fn abort(&self, lane: SaveLane, session_key: &SessionKey, task_id: &TaskId) -> JobOutcome {
        lane.drain().await;
        info!("translation aborted");
        self.emit(session_key, task_id, JobEventKind::Aborted);
        JobOutcome::Aborted
    }

    async fn fail(
        &self,
        lane: SaveLane,
        session_key: &SessionKey,
        task_id: &TaskId,
        error: JobError,
    ) -> JobOutcome {
        lane.drain().await;
        warn!(%error, "translation failed");
        self.emit_failed(session_key, task_id, &error);
        JobOutcome::Failed(error)
    }

    fn emit_failed(&self, session_key: &SessionKey, task_id: &TaskId, error: &JobError) {
        self.emit(
            session_key,
            task_id,
            JobEventKind::Failed {
                error: error.user_message(),
                error_kind: error.kind(),
            },
        );
    }

    fn snapshot(
        &self,
        job: &TranslateJob,
        translations: &[Segment],
        is_partial: bool,
        completed_chunk_count: usize,
        transcript_fingerprint: &str,
        checkpoints: &[Checkpoint],
    ) -> JobSnapshot {
        JobSnapshot {
            session_key: job.session_key.clone(),
            translations: translations.to_vec(),
            is_partial,
            completed_chunk_count,
            transcript_fingerprint: transcript_fingerprint.to_owned(),
            source_chunk_checkpoints: checkpoints.to_vec(),
            is_refined: false,
            title: job.config.title.clone(),
            source_lang: job.source_lang.clone(),
            target_lang: job.session_key.target_lang.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Append only segments that start strictly after the last accumulated one.
/// Returns what was appended.
fn append_after_last(translations: &mut Vec<Segment>, incoming: Vec<Segment>) -> Vec<Segment> {
    let appended: Vec<Segment> = match translations.last() {
        None => incoming,
        Some(last) => {
            let last_start = parse_timecode(last.start.as_str());
            incoming
                .into_iter()
                .filter(|segment| parse_timecode(segment.start.as_str()) > last_start)
                .collect()
        }
    };
    translations.extend(appended.iter().cloned());
    appended
}
