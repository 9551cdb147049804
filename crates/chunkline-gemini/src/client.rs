use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chunkline_protocol::{
    CancellationToken, JobError, JobResult, ProviderOutput, RefineRequest, TokenUsage,
    TranslateChunkRequest, TranslationProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::parse::parse_segments;
use crate::prompt::{
    REFINE_SYSTEM_PROMPT, TRANSLATE_SYSTEM_PROMPT, refine_prompt, segment_array_schema,
    translate_prompt,
};

pub const DEFAULT_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-flash-preview:generateContent";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_json_schema: Value,
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_level: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl GenerateRequest {
    fn new(system_prompt: &str, user_prompt: String, thinking_level: &str) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![TextPart { text: user_prompt }],
            }],
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: system_prompt.to_owned(),
                }],
            },
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_json_schema: segment_array_schema(),
                thinking_config: ThinkingConfig {
                    thinking_level: thinking_level.to_owned(),
                },
            },
        }
    }
}

impl GenerateResponse {
    /// Answer text with thought parts left out.
    fn answer_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn usage(&self) -> TokenUsage {
        self.usage_metadata
            .as_ref()
            .map(|meta| {
                TokenUsage::new(
                    meta.prompt_token_count,
                    meta.candidates_token_count,
                    meta.thoughts_token_count,
                )
            })
            .unwrap_or_default()
    }

    fn into_output(self) -> JobResult<ProviderOutput> {
        let usage = self.usage();
        let segments = parse_segments(&self.answer_text())?;
        Ok(ProviderOutput { segments, usage })
    }
}

/// Map a non-success HTTP reply to the job error taxonomy.
pub fn classify_http_failure(status: u16, message: &str) -> JobError {
    let message = if message.trim().is_empty() {
        format!("request failed: {status}")
    } else {
        message.to_owned()
    };

    if status == 429 || status == 503 || message.to_lowercase().contains("overloaded") {
        JobError::Overloaded(message)
    } else if status == 403 {
        JobError::QuotaExceeded(message)
    } else {
        JobError::Generic(message)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_owned())
}

/// [`TranslationProvider`] backed by the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> JobResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(JobError::InvalidInput("API key is empty".to_owned()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| JobError::Generic(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn post(&self, body: &GenerateRequest) -> JobResult<ProviderOutput> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "gemini transport failure");
                JobError::Overloaded(format!("transport failure: {e}"))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| JobError::Overloaded(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let message = error_message(&text);
            debug!(status = status.as_u16(), %message, "gemini request rejected");
            return Err(classify_http_failure(status.as_u16(), &message));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| JobError::MalformedResponse(format!("invalid response envelope: {e}")))?;
        parsed.into_output()
    }

    async fn post_cancellable(
        &self,
        body: GenerateRequest,
        cancel: &CancellationToken,
    ) -> JobResult<ProviderOutput> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            result = self.post(&body) => result,
        }
    }
}

#[async_trait]
impl TranslationProvider for GeminiProvider {
    #[instrument(
        skip(self, request, cancel),
        fields(session = %request.session_key, chunk = request.chunk_index)
    )]
    async fn translate_chunk(
        &self,
        request: TranslateChunkRequest,
        cancel: &CancellationToken,
    ) -> JobResult<ProviderOutput> {
        let prompt = translate_prompt(
            request.chunk_index,
            request.total_chunks,
            &request.segments,
            &request.context,
            &request.target_lang,
        );
        let body = GenerateRequest::new(TRANSLATE_SYSTEM_PROMPT, prompt, &request.thinking_level);
        self.post_cancellable(body, cancel).await
    }

    #[instrument(skip(self, request, cancel), fields(session = %request.session_key))]
    async fn refine(
        &self,
        request: RefineRequest,
        cancel: &CancellationToken,
    ) -> JobResult<ProviderOutput> {
        let prompt = refine_prompt(&request.original, &request.draft_text);
        let body = GenerateRequest::new(REFINE_SYSTEM_PROMPT, prompt, &request.thinking_level);
        self.post_cancellable(body, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkline_protocol::{Segment, SessionKey, TaskId, TaskKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP reply on a local port and return its URL.
    async fn one_shot_server(status_line: &'static str, body: String) -> anyhow::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0_u8; 64 * 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Ok(format!("http://{addr}/generate"))
    }

    fn request() -> TranslateChunkRequest {
        TranslateChunkRequest {
            session_key: SessionKey::new("vid", "ko"),
            task_id: TaskId::generate(TaskKind::Translate),
            chunk_index: 0,
            total_chunks: 1,
            segments: vec![Segment::new("0:01", "hello")],
            context: String::new(),
            source_lang: "Auto".to_owned(),
            target_lang: "ko".to_owned(),
            thinking_level: "minimal".to_owned(),
        }
    }

    fn provider(url: String) -> anyhow::Result<GeminiProvider> {
        Ok(GeminiProvider::new(
            GeminiConfig::new("test-key")
                .with_endpoint(url)
                .with_request_timeout(Duration::from_secs(5)),
        )?)
    }

    #[test]
    fn classifies_http_failures() {
        assert!(matches!(classify_http_failure(429, "slow down"), JobError::Overloaded(_)));
        assert!(matches!(classify_http_failure(503, ""), JobError::Overloaded(_)));
        assert!(matches!(
            classify_http_failure(500, "The model is overloaded."),
            JobError::Overloaded(_)
        ));
        assert!(matches!(classify_http_failure(403, "quota"), JobError::QuotaExceeded(_)));
        assert_eq!(
            classify_http_failure(400, ""),
            JobError::Generic("request failed: 400".to_owned())
        );
    }

    #[test]
    fn extracts_error_message_from_envelope() {
        assert_eq!(
            error_message(r#"{"error":{"code":400,"message":"bad schema","status":"INVALID_ARGUMENT"}}"#),
            "bad schema"
        );
        assert_eq!(error_message("plain text\n"), "plain text");
    }

    #[test]
    fn request_body_uses_camel_case_fields() -> anyhow::Result<()> {
        let body = GenerateRequest::new("sys", "user".to_owned(), "low");
        let json = serde_json::to_value(&body)?;
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingLevel"], "low");
        assert_eq!(json["generationConfig"]["responseJsonSchema"]["type"], "array");
        Ok(())
    }

    #[test]
    fn thought_parts_are_skipped_and_usage_mapped() -> anyhow::Result<()> {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "thinking...", "thought": true },
                { "text": "[{\"id\":\"0_0\",\"start\":\"0:01\",\"text\":\"안녕\"}]" }
            ]}}],
            "usageMetadata": {
                "promptTokenCount": 10,
                "candidatesTokenCount": 4,
                "thoughtsTokenCount": 2
            }
        }))?;
        let output = response.into_output()?;
        assert_eq!(output.segments, vec![Segment::new("0:01", "안녕")]);
        assert_eq!(output.usage, TokenUsage::new(10, 4, 2));
        assert_eq!(output.usage.billed_output(), 6);
        Ok(())
    }

    #[test]
    fn empty_candidate_is_malformed() {
        let err = GenerateResponse::default().into_output().unwrap_err();
        assert!(matches!(err, JobError::MalformedResponse(_)));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = GeminiProvider::new(GeminiConfig::new(" ")).unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn translates_over_http() -> anyhow::Result<()> {
        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "```json\n[{\"id\":\"0_0\",\"start\":\"0:01\",\"text\":\"안녕\"}]\n```" }
            ]}}],
            "usageMetadata": { "promptTokenCount": 7, "candidatesTokenCount": 3 }
        })
        .to_string();
        let url = one_shot_server("200 OK", body).await?;

        let output = provider(url)?
            .translate_chunk(request(), &CancellationToken::new())
            .await?;
        assert_eq!(output.segments, vec![Segment::new("0:01", "안녕")]);
        assert_eq!(output.usage, TokenUsage::new(7, 3, 0));
        Ok(())
    }

    #[tokio::test]
    async fn http_429_maps_to_overloaded() -> anyhow::Result<()> {
        let body = r#"{"error":{"code":429,"message":"Resource exhausted"}}"#.to_owned();
        let url = one_shot_server("429 Too Many Requests", body).await?;

        let err = provider(url)?
            .translate_chunk(request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, JobError::Overloaded("Resource exhausted".to_owned()));
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}/generate", listener.local_addr()?);
        // accept but never answer
        let _hold = tokio::spawn(async move {
            let _conn = listener.accept().await;
            std::future::pending::<()>().await;
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider(url)?
            .translate_chunk(request(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_overloaded() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}/generate", listener.local_addr()?);
        drop(listener);

        let err = provider(url)?
            .translate_chunk(request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Overloaded(_)));
        Ok(())
    }

    #[test]
    fn debug_output_hides_api_key() {
        let rendered = format!("{:?}", GeminiConfig::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }
}
