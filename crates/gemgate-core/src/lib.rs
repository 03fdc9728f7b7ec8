//! Gateway engine: pool-aware retry loop over an upstream transport.

pub mod engine;
pub mod error;
pub mod proxy;
pub mod stats;
pub mod transport;

pub use engine::{
    ChatOutcome, DEFAULT_BASE_URL, Gateway, GatewayConfig, GatewayStatus, KeyProbe, UsageLimits,
};
pub use error::{GatewayError, TransportErrorKind, UpstreamFailure};
pub use proxy::ProxySetting;
pub use stats::{GatewayStats, StatsSnapshot};
pub use transport::{
    Headers, TransportConfig, UpstreamBody, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamTransport, WreqTransport,
};
