use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chunkline_kernel::{
    Chunkline, ChunklineBuilder, GeminiConfig, JobHandle, JobOutcome, OrchestratorConfig,
    PlannerLimits, ResumeMode, RetryPolicy, TranslateConfig, TranslateJob, prepare_transcript,
};
use chunkline_protocol::{JobEvent, JobEventKind, Segment, SessionKey};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunklined")]
#[command(about = "Resumable chunked subtitle translation")]
struct Cli {
    /// State directory for snapshots and the usage ledger.
    #[arg(long, global = true, default_value = ".chunkline")]
    root: PathBuf,
    #[arg(long, global = true, env = "GEMINI_MODEL_URL")]
    model_url: Option<String>,
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, global = true, default_value_t = 2800)]
    soft_limit: usize,
    #[arg(long, global = true, default_value_t = 3800)]
    hard_limit: usize,
    #[arg(long, global = true, default_value_t = 3)]
    max_retries: u32,
    #[arg(long, global = true, default_value_t = 1000)]
    base_delay_ms: u64,
    #[arg(long, global = true, default_value_t = 300)]
    chunk_delay_ms: u64,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    content_id: String,
    #[arg(long)]
    target_lang: String,
}

impl SessionArgs {
    fn key(&self) -> SessionKey {
        SessionKey::new(self.content_id.as_str(), self.target_lang.as_str())
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Translate a transcript file, resuming any unfinished run.
    Translate {
        #[command(flatten)]
        session: SessionArgs,
        /// JSON array of `{ "start": "0:01", "text": "..." }`.
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "Auto")]
        source_lang: String,
        #[arg(long, default_value = "Unknown")]
        title: String,
        #[arg(long, default_value = "minimal")]
        thinking_level: String,
        /// Merge caption lines into sentences before chunking.
        #[arg(long)]
        group_by_sentence: bool,
        /// Ignore any stored progress and start from the first chunk.
        #[arg(long)]
        restart: bool,
    },
    /// Re-slice a finished translation onto the raw caption lines.
    Refine {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "minimal")]
        thinking_level: String,
    },
    List,
    Show {
        #[command(flatten)]
        session: SessionArgs,
    },
    Delete {
        #[command(flatten)]
        session: SessionArgs,
    },
    Clear,
    Usage,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn orchestrator_config(cli: &Cli) -> Result<OrchestratorConfig> {
    if cli.soft_limit == 0 || cli.hard_limit < cli.soft_limit {
        bail!(
            "invalid chunk limits: soft {} / hard {}",
            cli.soft_limit,
            cli.hard_limit
        );
    }
    Ok(OrchestratorConfig::default()
        .with_limits(PlannerLimits {
            soft_limit: cli.soft_limit,
            hard_limit: cli.hard_limit,
        })
        .with_retry(RetryPolicy::new(
            cli.max_retries,
            Duration::from_millis(cli.base_delay_ms),
        ))
        .with_inter_chunk_delay(Duration::from_millis(cli.chunk_delay_ms)))
}

fn build(cli: &Cli, needs_provider: bool) -> Result<Chunkline> {
    let mut builder = ChunklineBuilder::new(&cli.root).config(orchestrator_config(cli)?);

    match cli.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
        Some(key) => {
            let mut gemini = GeminiConfig::new(key);
            if let Some(url) = &cli.model_url {
                gemini = gemini.with_endpoint(url.as_str());
            }
            builder = builder.gemini(gemini)?;
        }
        None if needs_provider => bail!("an API key is required (--api-key or GEMINI_API_KEY)"),
        None => {}
    }

    builder.build()
}

async fn read_transcript(path: &Path) -> Result<Vec<Segment>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed reading transcript {path:?}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed parsing transcript {path:?}"))
}

async fn write_json(output: Option<&Path>, value: &impl serde::Serialize) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed writing {path:?}")),
        None => {
            println!("{payload}");
            Ok(())
        }
    }
}

fn report(event: &JobEvent) {
    match &event.kind {
        JobEventKind::Started {
            task_kind,
            start_chunk_index,
            total_chunks,
            resume_reason,
        } => info!(
            task = task_kind.as_str(),
            start = start_chunk_index,
            total = total_chunks,
            resume = resume_reason.as_deref().unwrap_or("-"),
            "job started"
        ),
        JobEventKind::ChunkCompleted {
            chunk_index,
            total_chunks,
            segments,
        } => info!(
            chunk = chunk_index + 1,
            total = total_chunks,
            segments = segments.len(),
            "chunk translated"
        ),
        JobEventKind::Retrying {
            attempt,
            phase,
            chunk_index,
        } => warn!(attempt, ?phase, ?chunk_index, "retrying"),
        JobEventKind::Completed { segments, usage } => info!(
            segments = segments.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.billed_output(),
            "job completed"
        ),
        JobEventKind::Aborted => warn!("job aborted"),
        JobEventKind::Failed { error, error_kind } => error!(?error_kind, %error, "job failed"),
    }
}

/// Wait for the job, cancelling it on Ctrl-C. Progress is logged as it arrives.
async fn run_job(chunkline: &Chunkline, handle: JobHandle) -> JobOutcome {
    let key = handle.session_key.clone();
    let mut events = Box::pin(chunkline.subscribe_session(key.clone()));
    let task_id = handle.task_id.clone();
    let progress = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event.task_id != task_id {
                continue;
            }
            report(&event);
            if event.is_terminal() {
                break;
            }
        }
    });

    let wait = handle.wait();
    tokio::pin!(wait);
    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!(session = %key, "interrupt received, cancelling");
            chunkline.cancel(&key, "interrupted");
            wait.await
        }
    };

    if tokio::time::timeout(Duration::from_secs(1), progress).await.is_err() {
        warn!("progress reporter did not finish");
    }
    outcome
}

async fn finish(outcome: JobOutcome, output: Option<&Path>) -> Result<()> {
    match outcome {
        JobOutcome::Completed { segments, .. } => write_json(output, &segments).await,
        JobOutcome::Aborted => bail!("job aborted; progress is saved and will resume next run"),
        JobOutcome::Failed(error) => bail!("{}", error.user_message()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match &cli.command {
        Command::Translate {
            session,
            input,
            output,
            source_lang,
            title,
            thinking_level,
            group_by_sentence,
            restart,
        } => {
            let chunkline = build(&cli, true)?;
            let raw = read_transcript(input).await?;
            let segments = prepare_transcript(&raw, *group_by_sentence);
            info!(raw = raw.len(), prepared = segments.len(), "transcript loaded");

            let job = TranslateJob::new(session.key(), segments)
                .with_source_lang(source_lang.as_str())
                .with_config(TranslateConfig {
                    thinking_level: thinking_level.clone(),
                    title: title.clone(),
                })
                .with_resume(if *restart {
                    ResumeMode::Restart
                } else {
                    ResumeMode::Auto
                });
            let handle = chunkline.translate(job)?;
            let outcome = run_job(&chunkline, handle).await;
            finish(outcome, output.as_deref()).await
        }
        Command::Refine {
            session,
            input,
            output,
            thinking_level,
        } => {
            let chunkline = build(&cli, true)?;
            let original = prepare_transcript(&read_transcript(input).await?, false);
            let config = TranslateConfig {
                thinking_level: thinking_level.clone(),
                ..TranslateConfig::default()
            };
            let handle = chunkline.refine(&session.key(), original, config).await?;
            let outcome = run_job(&chunkline, handle).await;
            finish(outcome, output.as_deref()).await
        }
        Command::List => {
            let chunkline = build(&cli, false)?;
            for entry in chunkline.list().await? {
                println!(
                    "{}\t{}\t{}\t{}{}",
                    entry.session_key,
                    entry.timestamp.to_rfc3339(),
                    entry.title,
                    if entry.is_partial { "partial" } else { "complete" },
                    if entry.is_refined { ",refined" } else { "" },
                );
            }
            Ok(())
        }
        Command::Show { session } => {
            let chunkline = build(&cli, false)?;
            let key = session.key();
            let Some(snapshot) = chunkline.snapshot(&key).await? else {
                bail!("no snapshot for {key}");
            };
            write_json(None, &snapshot).await
        }
        Command::Delete { session } => {
            let chunkline = build(&cli, false)?;
            let key = session.key();
            chunkline.delete(&key).await?;
            info!(session = %key, "snapshot deleted");
            Ok(())
        }
        Command::Clear => {
            let chunkline = build(&cli, false)?;
            let removed = chunkline.clear().await?;
            info!(removed, "store cleared");
            Ok(())
        }
        Command::Usage => {
            let chunkline = build(&cli, false)?;
            let summary = chunkline.usage().await?;
            let bytes = chunkline.storage_bytes().await?;
            write_json(
                None,
                &serde_json::json!({
                    "today": summary.today,
                    "last_30_days": summary.monthly,
                    "estimated_cost_usd": summary.estimated_cost_usd,
                    "storage_bytes": bytes,
                }),
            )
            .await
        }
    }
}
