use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use gemgate_pool::{
    Clock, FailureKind, KeyInput, KeyLease, KeyPool, PoolConfig, PoolSnapshot, RecoverySweep,
    SystemClock,
};
use gemgate_protocol::gemini::{
    Content, ContentRole, GenerateContentRequestBody, GenerateContentResponse, GenerationConfig,
    Part,
};
use gemgate_protocol::openai::{
    CreateChatCompletionRequestBody, CreateChatCompletionResponse, ListModelsResponse,
};
use gemgate_transform::{
    CompletionMeta, GeminiStreamTranslator, GenerationDefaults, ModelMap, error_frame,
    transform_request, transform_response,
};

use crate::error::{GatewayError, UpstreamFailure};
use crate::proxy::ProxySetting;
use crate::stats::{GatewayStats, StatsSnapshot};
use crate::transport::{UpstreamBody, UpstreamHttpRequest, UpstreamTransport};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const PROBE_PROMPT: &str = "Hi";
const PROBE_MAX_OUTPUT_TOKENS: i64 = 8;

/// Free-tier numbers, reported on the status endpoint for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageLimits {
    pub rpm_limit: u32,
    pub daily_limit: u32,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            rpm_limit: 15,
            daily_limit: 1500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Attempts per inbound request, each on a freshly selected key.
    pub max_retries: u32,
    pub default_model: String,
    pub generation: GenerationDefaults,
    pub pool: PoolConfig,
    pub limits: UsageLimits,
    pub proxy: ProxySetting,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: 3,
            default_model: gemgate_transform::DEFAULT_UPSTREAM_MODEL.to_string(),
            generation: GenerationDefaults::default(),
            pool: PoolConfig::default(),
            limits: UsageLimits::default(),
            proxy: ProxySetting::default(),
        }
    }
}

pub enum ChatOutcome {
    Json(CreateChatCompletionResponse),
    /// Translated SSE frames, ending with `data: [DONE]`.
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyProbe {
    pub index: usize,
    pub key_preview: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub pool: PoolSnapshot,
    pub stats: StatsSnapshot,
    pub default_model: String,
    pub max_retries: u32,
    pub limits: UsageLimits,
}

struct ActivePool {
    pool: Arc<KeyPool>,
    _sweep: RecoverySweep,
}

pub struct Gateway {
    config: GatewayConfig,
    models: ModelMap,
    pool: ArcSwap<ActivePool>,
    transport: Arc<dyn UpstreamTransport>,
    clock: Arc<dyn Clock>,
    stats: GatewayStats,
}

impl Gateway {
    /// Starts with an empty pool; call [`Gateway::reload`] to install keys.
    /// Must run inside a tokio runtime (the pool's recovery sweep is spawned).
    pub fn new(config: GatewayConfig, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: GatewayConfig,
        transport: Arc<dyn UpstreamTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let active = build_pool(Vec::new(), &config.pool, &clock);
        Self {
            models: ModelMap::new(config.default_model.clone()),
            config,
            pool: ArcSwap::from_pointee(active),
            transport,
            clock,
            stats: GatewayStats::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn proxy(&self) -> &ProxySetting {
        &self.config.proxy
    }

    pub fn pool(&self) -> Arc<KeyPool> {
        self.pool.load().pool.clone()
    }

    pub fn models(&self) -> ListModelsResponse {
        self.models.list()
    }

    /// Replaces the pool wholesale. The old pool's sweep stops here; requests
    /// already holding it finish against it.
    pub fn reload(&self, inputs: Vec<KeyInput>) -> usize {
        let active = build_pool(inputs, &self.config.pool, &self.clock);
        let count = active.pool.len();
        self.pool.store(Arc::new(active));
        info!(keys = count, "key pool loaded");
        count
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            pool: self.pool().snapshot(),
            stats: self.stats.snapshot(),
            default_model: self.models.default_model().to_string(),
            max_retries: self.config.max_retries,
            limits: self.config.limits,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn chat_completion(
        &self,
        body: CreateChatCompletionRequestBody,
    ) -> Result<ChatOutcome, GatewayError> {
        if body.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }
        let stream = body.is_stream();
        let upstream_model = self.models.resolve(&body.model);
        let payload = transform_request(&body, &self.config.generation);
        if payload.contents.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "no message carries usable content".to_string(),
            ));
        }
        let payload = serde_json::to_vec(&payload)
            .map(Bytes::from)
            .map_err(|err| GatewayError::InvalidRequest(err.to_string()))?;
        let url = self.endpoint(&upstream_model, stream);
        let meta = CompletionMeta::new(body.model.clone());

        self.stats.record_request(stream);
        let pool = self.pool();
        let attempts = self.config.max_retries.max(1);
        let mut last: Option<UpstreamFailure> = None;

        for attempt in 1..=attempts {
            let Some(lease) = pool.next_key() else {
                self.stats.record_failure();
                warn!(attempt, model = %upstream_model, "no key available");
                return Err(GatewayError::NoKeyAvailable {
                    last_error: last.map(|failure| failure.to_string()),
                });
            };
            if attempt > 1 {
                self.stats.record_retry();
            }

            let started = Instant::now();
            let request = UpstreamHttpRequest {
                url: url.clone(),
                headers: upstream_headers(&lease),
                body: payload.clone(),
                is_stream: stream,
            };
            match self.attempt(request, stream, &meta).await {
                Ok(outcome) => {
                    pool.report_success(lease.index, started.elapsed());
                    self.stats.record_success();
                    info!(
                        attempt,
                        key = %lease.preview(),
                        model = %upstream_model,
                        stream,
                        elapsed_ms = duration_ms(started.elapsed()),
                        "upstream call succeeded"
                    );
                    return Ok(outcome);
                }
                Err(failure) => {
                    let kind = pool.report_failure(lease.index, &failure.to_string());
                    warn!(
                        attempt,
                        key = %lease.preview(),
                        model = %upstream_model,
                        kind = ?kind,
                        error = %failure,
                        "upstream attempt failed"
                    );
                    last = Some(failure);
                }
            }
        }

        self.stats.record_failure();
        Err(match last {
            Some(last) => GatewayError::AllRetriesExhausted { attempts, last },
            None => GatewayError::NoKeyAvailable { last_error: None },
        })
    }

    /// One upstream exchange. For streams, success means a 2xx with headers;
    /// what follows is translated in a background task and errors go in-band.
    async fn attempt(
        &self,
        request: UpstreamHttpRequest,
        stream: bool,
        meta: &CompletionMeta,
    ) -> Result<ChatOutcome, UpstreamFailure> {
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            let body = response.body.into_bytes().await.unwrap_or_default();
            return Err(UpstreamFailure::http(response.status, &body));
        }
        if stream {
            return Ok(ChatOutcome::Stream(spawn_stream_translation(
                response.body,
                meta.clone(),
            )));
        }
        let bytes = response.body.into_bytes().await?;
        let parsed: GenerateContentResponse = serde_json::from_slice(&bytes)
            .map_err(|err| UpstreamFailure::malformed(&err))?;
        Ok(ChatOutcome::Json(transform_response(parsed, meta)))
    }

    /// Minimal `generateContent` with one specific key, whatever its status.
    /// The outcome is reported to the pool like any other call.
    pub async fn probe_key(&self, index: usize) -> Result<KeyProbe, GatewayError> {
        let pool = self.pool();
        let lease = pool.key(index).ok_or(GatewayError::KeyNotFound(index))?;
        let body = GenerateContentRequestBody {
            contents: vec![Content {
                role: Some(ContentRole::User),
                parts: vec![Part::text(PROBE_PROMPT)],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(PROBE_MAX_OUTPUT_TOKENS),
                ..GenerationConfig::default()
            }),
        };
        let body = serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|err| GatewayError::InvalidRequest(err.to_string()))?;
        let request = UpstreamHttpRequest {
            url: self.endpoint(self.models.default_model(), false),
            headers: upstream_headers(&lease),
            body,
            is_stream: false,
        };

        let started = Instant::now();
        let result = self.probe(request).await;
        let elapsed = started.elapsed();
        let (ok, status, error, failure_kind) = match result {
            Ok(status) => {
                pool.report_success(index, elapsed);
                (true, Some(status), None, None)
            }
            Err(failure) => {
                let message = failure.to_string();
                let kind = pool.report_failure(index, &message);
                (false, failure.status(), Some(message), kind)
            }
        };
        info!(index, key = %lease.preview(), ok, elapsed_ms = duration_ms(elapsed), "key probed");
        Ok(KeyProbe {
            index,
            key_preview: lease.preview(),
            ok,
            status,
            latency_ms: duration_ms(elapsed),
            error,
            failure_kind,
        })
    }

    async fn probe(&self, request: UpstreamHttpRequest) -> Result<u16, UpstreamFailure> {
        let response = self.transport.send(request).await?;
        let status = response.status;
        let success = response.is_success();
        let bytes = response.body.into_bytes().await?;
        if !success {
            return Err(UpstreamFailure::http(status, &bytes));
        }
        serde_json::from_slice::<GenerateContentResponse>(&bytes)
            .map_err(|err| UpstreamFailure::malformed(&err))?;
        Ok(status)
    }

    pub fn reset_key(&self, index: usize) -> Result<(), GatewayError> {
        if self.pool().reset_key(index) {
            Ok(())
        } else {
            Err(GatewayError::KeyNotFound(index))
        }
    }

    pub fn reset_all(&self) -> usize {
        self.pool().reset_all()
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if stream {
            format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/v1beta/models/{model}:generateContent")
        }
    }
}

fn build_pool(inputs: Vec<KeyInput>, config: &PoolConfig, clock: &Arc<dyn Clock>) -> ActivePool {
    let pool = Arc::new(KeyPool::new(inputs, config.clone()).with_clock(clock.clone()));
    let sweep = pool.spawn_recovery_sweep();
    ActivePool {
        pool,
        _sweep: sweep,
    }
}

fn upstream_headers(lease: &KeyLease) -> Vec<(String, String)> {
    vec![
        ("x-goog-api-key".to_string(), lease.credential.clone()),
        ("content-type".to_string(), "application/json".to_string()),
    ]
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Translates upstream chunks until the upstream ends or fails. A client that
/// goes away ends the task at once, even while the upstream is idle, and the
/// upstream receiver is dropped with it.
fn spawn_stream_translation(body: UpstreamBody, meta: CompletionMeta) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut translator = GeminiStreamTranslator::new(meta);
        let mut upstream = match body {
            UpstreamBody::Stream(upstream) => upstream,
            UpstreamBody::Bytes(bytes) => {
                let (single_tx, single_rx) = mpsc::channel(1);
                let _ = single_tx.send(Ok(bytes)).await;
                single_rx
            }
        };
        loop {
            let item = tokio::select! {
                item = upstream.recv() => item,
                _ = tx.closed() => return,
            };
            let Some(item) = item else { break };
            let (frames, stop) = match item {
                Ok(chunk) => {
                    let frames = translator.push(&chunk);
                    (frames, translator.failed())
                }
                Err(failure) => {
                    warn!(id = %translator.meta().id, error = %failure, "upstream stream failed");
                    (vec![error_frame(&failure.to_string(), None)], true)
                }
            };
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            if stop {
                break;
            }
        }
        for frame in translator.finish() {
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    });
    rx
}
