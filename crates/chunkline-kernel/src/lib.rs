//! # chunkline-kernel - assembled translation service
//!
//! [`ChunklineBuilder`] wires a snapshot store, a translation provider, the
//! daily usage ledger and the event hub into a [`TaskOrchestrator`], and
//! [`Chunkline`] exposes the operations a host needs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Duration;
use chunkline_events::{DEFAULT_EVENT_BUFFER, JobEventHub};
use chunkline_gemini::GeminiProvider;
use chunkline_protocol::{
    CancellationToken, JobError, JobEvent, JobResult, JobSnapshot, JobStore, ProviderOutput,
    RefineRequest, Segment, SessionKey, SnapshotMetadata, TaskId, TranslateChunkRequest,
    TranslationProvider,
};
use chunkline_runtime::RefineJob;
use chunkline_store::{
    DEFAULT_MAX_ENTRIES, DEFAULT_TTL_DAYS, FileJobStore, FileUsageLedger, MemoryJobStore,
    StoreConfig,
};
use futures_util::Stream;
use tracing::{debug, info, instrument};

pub use chunkline_gemini::GeminiConfig;
pub use chunkline_plan::PlannerLimits;
pub use chunkline_runtime::{
    JobHandle, JobOutcome, OrchestratorConfig, ResumeMode, RetryPolicy, TaskOrchestrator,
    TranslateConfig, TranslateJob,
};
pub use chunkline_store::{DailyUsage, UsageSummary};

/// Clean a raw caption list before translation: blank lines are dropped,
/// and lines are merged into sentences when `group_by_sentence` is set.
pub fn prepare_transcript(raw: &[Segment], group_by_sentence: bool) -> Vec<Segment> {
    if group_by_sentence {
        chunkline_plan::group_segments_by_sentence(raw)
    } else {
        raw.iter()
            .filter(|segment| !segment.text.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Stand-in used when no provider is configured. Snapshot and usage
/// operations still work; any upstream call fails.
struct UnconfiguredProvider;

#[async_trait]
impl TranslationProvider for UnconfiguredProvider {
    async fn translate_chunk(
        &self,
        _request: TranslateChunkRequest,
        _cancel: &CancellationToken,
    ) -> JobResult<ProviderOutput> {
        Err(JobError::InvalidInput("no translation provider configured".to_owned()))
    }

    async fn refine(
        &self,
        _request: RefineRequest,
        _cancel: &CancellationToken,
    ) -> JobResult<ProviderOutput> {
        Err(JobError::InvalidInput("no translation provider configured".to_owned()))
    }
}

#[derive(Clone)]
enum SnapshotStore {
    File(Arc<FileJobStore>),
    Memory(Arc<MemoryJobStore>),
}

impl SnapshotStore {
    fn port(&self) -> Arc<dyn JobStore> {
        match self {
            Self::File(store) => store.clone(),
            Self::Memory(store) => store.clone(),
        }
    }
}

pub struct ChunklineBuilder {
    root: PathBuf,
    config: OrchestratorConfig,
    max_entries: usize,
    ttl: Duration,
    in_memory: bool,
    provider: Option<Arc<dyn TranslationProvider>>,
}

impl ChunklineBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: OrchestratorConfig::default(),
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: Duration::days(DEFAULT_TTL_DAYS),
            in_memory: false,
            provider: None,
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Keep snapshots in process memory instead of under `root/store`.
    /// The usage ledger still lives under `root`.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn TranslationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn gemini(self, config: GeminiConfig) -> Result<Self> {
        let provider = GeminiProvider::new(config).context("failed to set up gemini provider")?;
        Ok(self.provider(Arc::new(provider)))
    }

    pub fn build(self) -> Result<Chunkline> {
        let provider = self.provider.unwrap_or_else(|| {
            debug!("no translation provider configured; upstream calls will fail");
            Arc::new(UnconfiguredProvider)
        });

        let store = if self.in_memory {
            SnapshotStore::Memory(Arc::new(MemoryJobStore::new(self.max_entries, self.ttl)))
        } else {
            let store_config = StoreConfig::new(self.root.join("store"))
                .with_max_entries(self.max_entries)
                .with_ttl(self.ttl);
            SnapshotStore::File(Arc::new(FileJobStore::new(store_config)))
        };

        let ledger = Arc::new(FileUsageLedger::new(&self.root));
        let events = JobEventHub::new(DEFAULT_EVENT_BUFFER);
        let orchestrator =
            TaskOrchestrator::new(self.config, store.port(), provider, ledger.clone(), events);

        info!(root = ?self.root, in_memory = self.in_memory, "chunkline assembled");
        Ok(Chunkline {
            store,
            ledger,
            orchestrator,
        })
    }
}

#[derive(Clone)]
pub struct Chunkline {
    store: SnapshotStore,
    ledger: Arc<FileUsageLedger>,
    orchestrator: TaskOrchestrator,
}

impl Chunkline {
    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    pub fn translate(&self, job: TranslateJob) -> Result<JobHandle> {
        Ok(self.orchestrator.start_translate(job)?)
    }

    /// Re-slice a finished translation onto the raw source lines.
    ///
    /// The stored translation is used as the draft and its title is kept.
    #[instrument(skip(self, original), fields(session = %session_key, original = original.len()))]
    pub async fn refine(
        &self,
        session_key: &SessionKey,
        original: Vec<Segment>,
        config: TranslateConfig,
    ) -> Result<JobHandle> {
        let Some(snapshot) = self.snapshot(session_key).await? else {
            bail!("no stored translation for {session_key}");
        };
        if snapshot.is_partial {
            bail!("translation for {session_key} is not finished");
        }

        let job = RefineJob {
            session_key: session_key.clone(),
            original,
            draft: snapshot.translations,
            config: TranslateConfig {
                title: snapshot.title,
                ..config
            },
        };
        Ok(self.orchestrator.start_refine(job)?)
    }

    pub fn cancel(&self, session_key: &SessionKey, reason: &str) -> Option<TaskId> {
        self.orchestrator.cancel(session_key, reason)
    }

    pub fn is_running(&self, session_key: &SessionKey) -> bool {
        self.orchestrator.is_running(session_key)
    }

    pub fn subscribe_events(&self) -> impl Stream<Item = JobEvent> + Send + 'static {
        self.orchestrator.events().subscribe_stream()
    }

    pub fn subscribe_session(
        &self,
        session_key: SessionKey,
    ) -> impl Stream<Item = JobEvent> + Send + 'static {
        self.orchestrator.events().subscribe_session(session_key)
    }

    pub async fn snapshot(&self, session_key: &SessionKey) -> Result<Option<JobSnapshot>> {
        self.store
            .port()
            .load(session_key)
            .await
            .with_context(|| format!("failed loading snapshot for {session_key}"))
    }

    pub async fn list(&self) -> Result<Vec<SnapshotMetadata>> {
        self.store
            .port()
            .list_all()
            .await
            .context("failed listing snapshots")
    }

    pub async fn delete(&self, session_key: &SessionKey) -> Result<()> {
        self.orchestrator.cancel(session_key, "snapshot deleted");
        self.store
            .port()
            .delete(session_key)
            .await
            .with_context(|| format!("failed deleting snapshot for {session_key}"))
    }

    /// Drop every stored snapshot. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        match &self.store {
            SnapshotStore::File(store) => store.clear().await,
            SnapshotStore::Memory(store) => {
                let count = store.list_all().await.context("failed listing snapshots")?.len();
                store.clear();
                Ok(count)
            }
        }
    }

    /// Bytes on disk used by snapshots. Zero for the in-memory store.
    pub async fn storage_bytes(&self) -> Result<u64> {
        match &self.store {
            SnapshotStore::File(store) => store.storage_bytes().await,
            SnapshotStore::Memory(_) => Ok(0),
        }
    }

    pub async fn usage(&self) -> Result<UsageSummary> {
        self.ledger.summary().await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use chunkline_protocol::{
        CancellationToken, ErrorKind, JobEventKind, JobResult, ProviderOutput, RefineRequest, Segment,
        SessionKey, TokenUsage, TranslateChunkRequest, TranslationProvider,
    };
    use chunkline_runtime::{JobOutcome, OrchestratorConfig, TranslateConfig, TranslateJob};
    use futures_util::StreamExt;
    use parking_lot::Mutex;

    use crate::ChunklineBuilder;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    /// Upper-cases every segment and reports fixed usage.
    #[derive(Default)]
    struct UpperProvider {
        chunk_calls: Mutex<usize>,
        refine_drafts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TranslationProvider for UpperProvider {
        async fn translate_chunk(
            &self,
            request: TranslateChunkRequest,
            _cancel: &CancellationToken,
        ) -> JobResult<ProviderOutput> {
            *self.chunk_calls.lock() += 1;
            Ok(ProviderOutput {
                segments: request
                    .segments
                    .iter()
                    .map(|s| Segment::new(s.start.clone(), s.text.to_uppercase()))
                    .collect(),
                usage: TokenUsage::new(100, 20, 5),
            })
        }

        async fn refine(
            &self,
            request: RefineRequest,
            _cancel: &CancellationToken,
        ) -> JobResult<ProviderOutput> {
            self.refine_drafts.lock().push(request.draft_text.clone());
            Ok(ProviderOutput {
                segments: request
                    .original
                    .iter()
                    .map(|s| Segment::new(s.start.clone(), format!("[{}]", s.text)))
                    .collect(),
                usage: TokenUsage::new(10, 10, 0),
            })
        }
    }

    fn transcript() -> Vec<Segment> {
        vec![
            Segment::new("0:01", "hello there."),
            Segment::new("0:04", "how are you?"),
            Segment::new("0:09", "fine."),
        ]
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::default().with_inter_chunk_delay(std::time::Duration::ZERO)
    }

    #[tokio::test]
    async fn translate_persists_and_replays_from_cache() -> Result<()> {
        let root = unique_test_root("chunkline-kernel-cache");
        let provider = Arc::new(UpperProvider::default());
        let chunkline = ChunklineBuilder::new(&root)
            .config(fast_config())
            .provider(provider.clone())
            .build()?;
        let key = SessionKey::new("video-1", "ko");

        let outcome = chunkline
            .translate(TranslateJob::new(key.clone(), transcript()))?
            .wait()
            .await;
        let JobOutcome::Completed { segments, usage } = outcome else {
            bail!("first run did not complete");
        };
        assert_eq!(segments[0].text, "HELLO THERE.");
        assert_eq!(usage, TokenUsage::new(100, 20, 5));

        let listed = chunkline.list().await?;
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_partial);
        assert!(chunkline.storage_bytes().await? > 0);

        let replay = chunkline
            .translate(TranslateJob::new(key.clone(), transcript()))?
            .wait()
            .await;
        let JobOutcome::Completed { usage, .. } = replay else {
            bail!("replay did not complete");
        };
        assert!(usage.is_zero());
        assert_eq!(*provider.chunk_calls.lock(), 1);

        let summary = chunkline.usage().await?;
        assert_eq!(summary.today.input, 100);
        assert_eq!(summary.today.output, 25);

        let _ = tokio::fs::remove_dir_all(&root).await;
        Ok(())
    }

    #[tokio::test]
    async fn refine_uses_stored_translation_as_draft() -> Result<()> {
        let root = unique_test_root("chunkline-kernel-refine");
        let provider = Arc::new(UpperProvider::default());
        let chunkline = ChunklineBuilder::new(&root)
            .config(fast_config())
            .in_memory()
            .provider(provider.clone())
            .build()?;
        let key = SessionKey::new("video-2", "ko");

        let raw = vec![Segment::new("0:01", "a"), Segment::new("0:02", "b")];
        assert!(
            chunkline
                .refine(&key, raw.clone(), TranslateConfig::default())
                .await
                .is_err()
        );

        let mut events = Box::pin(chunkline.subscribe_session(key.clone()));
        chunkline
            .translate(TranslateJob::new(key.clone(), transcript()))?
            .wait()
            .await;
        let outcome = chunkline
            .refine(&key, raw, TranslateConfig::default())
            .await?
            .wait()
            .await;
        assert!(outcome.is_completed());
        assert_eq!(
            provider.refine_drafts.lock().as_slice(),
            ["HELLO THERE. HOW ARE YOU? FINE.".to_owned()]
        );

        let Some(snapshot) = chunkline.snapshot(&key).await? else {
            bail!("refined snapshot missing");
        };
        assert!(snapshot.is_refined);
        assert_eq!(snapshot.translations[1].text, "[b]");

        let mut completions = 0;
        while let Some(event) = events.next().await {
            if matches!(event.kind, JobEventKind::Completed { .. }) {
                completions += 1;
                if completions == 2 {
                    break;
                }
            }
        }
        assert_eq!(completions, 2);

        let _ = tokio::fs::remove_dir_all(&root).await;
        Ok(())
    }

    #[tokio::test]
    async fn delete_and_clear_remove_snapshots() -> Result<()> {
        let root = unique_test_root("chunkline-kernel-clear");
        let chunkline = ChunklineBuilder::new(&root)
            .config(fast_config())
            .provider(Arc::new(UpperProvider::default()))
            .build()?;

        for id in ["a", "b", "c"] {
            chunkline
                .translate(TranslateJob::new(SessionKey::new(id, "ko"), transcript()))?
                .wait()
                .await;
        }
        assert_eq!(chunkline.list().await?.len(), 3);

        chunkline.delete(&SessionKey::new("b", "ko")).await?;
        assert!(chunkline.snapshot(&SessionKey::new("b", "ko")).await?.is_none());
        assert_eq!(chunkline.clear().await?, 2);
        assert!(chunkline.list().await?.is_empty());

        let _ = tokio::fs::remove_dir_all(&root).await;
        Ok(())
    }

    #[tokio::test]
    async fn without_provider_jobs_fail_but_storage_works() -> Result<()> {
        let root = unique_test_root("chunkline-kernel-offline");
        let chunkline = ChunklineBuilder::new(&root)
            .config(fast_config())
            .build()?;
        let key = SessionKey::new("offline", "ko");

        let outcome = chunkline
            .translate(TranslateJob::new(key.clone(), transcript()))?
            .wait()
            .await;
        let JobOutcome::Failed(error) = outcome else {
            bail!("job without provider should fail");
        };
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
        assert!(chunkline.list().await?.is_empty());
        assert!(chunkline.usage().await?.today.input == 0);

        let _ = tokio::fs::remove_dir_all(&root).await;
        Ok(())
    }

    #[test]
    fn prepare_transcript_drops_blank_lines() {
        let raw = vec![
            Segment::new("0:01", "one"),
            Segment::new("0:02", "  "),
            Segment::new("0:03", "two."),
        ];
        assert_eq!(crate::prepare_transcript(&raw, false).len(), 2);
        assert_eq!(
            crate::prepare_transcript(&raw, true),
            vec![Segment::new("0:01", "one two.")]
        );
    }

    #[test]
    fn gemini_rejects_blank_key() {
        let builder = ChunklineBuilder::new(unique_test_root("chunkline-kernel-gemini"))
            .gemini(chunkline_gemini::GeminiConfig::new(""));
        assert!(builder.is_err());
    }
}
