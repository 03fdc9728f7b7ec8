use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use wreq::{Client, Proxy};

use crate::error::{TransportErrorKind, UpstreamFailure};

pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
    pub is_stream: bool,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    /// Chunks as they arrive; an `Err` item is the last one.
    Stream(mpsc::Receiver<Result<Bytes, UpstreamFailure>>),
}

impl UpstreamBody {
    pub async fn into_bytes(self) -> Result<Bytes, UpstreamFailure> {
        match self {
            UpstreamBody::Bytes(bytes) => Ok(bytes),
            UpstreamBody::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

pub struct UpstreamHttpResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait UpstreamTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Whole exchange for buffered calls; time to response headers for streams.
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub stream_total_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Duration::from_secs(120),
            stream_total_timeout: Duration::from_secs(600),
        }
    }
}

type ProxyResolver = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// `wreq`-backed transport. The proxy is resolved on every call, with one
/// cached client per distinct proxy.
#[derive(Clone)]
pub struct WreqTransport {
    config: TransportConfig,
    proxy_resolver: ProxyResolver,
    clients: Arc<Mutex<HashMap<Option<String>, Client>>>,
}

impl WreqTransport {
    pub fn new_with_proxy_resolver<F>(
        config: TransportConfig,
        proxy_resolver: F,
    ) -> Result<Self, wreq::Error>
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        let resolver: ProxyResolver = Arc::new(proxy_resolver);
        let initial_proxy = normalize_proxy(resolver());
        let initial_client = build_client(&config, initial_proxy.as_deref())?;
        let mut clients = HashMap::new();
        clients.insert(initial_proxy, initial_client);
        Ok(Self {
            config,
            proxy_resolver: resolver,
            clients: Arc::new(Mutex::new(clients)),
        })
    }

    fn current_proxy(&self) -> Option<String> {
        normalize_proxy((self.proxy_resolver)())
    }

    fn client_for_proxy(&self, proxy: Option<String>) -> Result<Client, UpstreamFailure> {
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| UpstreamFailure::Transport {
                kind: TransportErrorKind::Other,
                message: "upstream client cache lock failed".to_string(),
            })?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy.as_deref()).map_err(map_wreq_error)?;
        tracing::info!(proxy = proxy.as_deref().unwrap_or("none"), "upstream client built");
        guard.insert(proxy, client.clone());
        Ok(client)
    }

    async fn exchange(
        &self,
        req: UpstreamHttpRequest,
    ) -> Result<UpstreamHttpResponse, UpstreamFailure> {
        let client = self.client_for_proxy(self.current_proxy())?;
        let mut builder = client.post(&req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        let resp = builder.body(req.body).send().await.map_err(map_wreq_error)?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) || !req.is_stream {
            let body = resp.bytes().await.map_err(map_wreq_error)?;
            return Ok(UpstreamHttpResponse {
                status,
                body: UpstreamBody::Bytes(body),
            });
        }

        let rx = pump_stream(
            resp,
            self.config.stream_idle_timeout,
            self.config.stream_total_timeout,
        );
        Ok(UpstreamHttpResponse {
            status,
            body: UpstreamBody::Stream(rx),
        })
    }
}

impl UpstreamTransport for WreqTransport {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let limit = self.config.request_timeout;
            match tokio::time::timeout(limit, self.exchange(req)).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamFailure::Transport {
                    kind: TransportErrorKind::Timeout,
                    message: format!("no upstream response within {}s", limit.as_secs()),
                }),
            }
        })
    }
}

/// Forwards the body into a bounded channel. Stops as soon as the receiver
/// goes away, which drops the upstream response and releases the connection.
fn pump_stream(
    resp: wreq::Response,
    idle_timeout: Duration,
    total_timeout: Duration,
) -> mpsc::Receiver<Result<Bytes, UpstreamFailure>> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, UpstreamFailure>>(16);
    tokio::spawn(async move {
        let deadline = Instant::now() + total_timeout;
        let mut stream = resp.bytes_stream();
        loop {
            let wait_until = deadline.min(Instant::now() + idle_timeout);
            let next = tokio::select! {
                next = tokio::time::timeout_at(wait_until, stream.next()) => next,
                _ = tx.closed() => break,
            };
            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    let failure = if Instant::now() >= deadline {
                        UpstreamFailure::Transport {
                            kind: TransportErrorKind::Timeout,
                            message: format!("stream exceeded {}s total", total_timeout.as_secs()),
                        }
                    } else {
                        UpstreamFailure::Transport {
                            kind: TransportErrorKind::ReadTimeout,
                            message: format!("stream idle for {}s", idle_timeout.as_secs()),
                        }
                    };
                    let _ = tx.send(Err(failure)).await;
                    break;
                }
            };
            let Some(item) = item else {
                break;
            };
            let item = item.map_err(map_wreq_error);
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn build_client(config: &TransportConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.stream_idle_timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let kind = classify_wreq_error(&err);
    UpstreamFailure::Transport {
        kind,
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> TransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return TransportErrorKind::ReadTimeout;
        }
        return TransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return TransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return TransportErrorKind::Tls;
    }
    TransportErrorKind::Other
}
