use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gemgate", version, about)]
pub(crate) struct Cli {
    #[arg(long, env = "GEMGATE_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, env = "GEMGATE_PORT", default_value_t = 3001)]
    pub(crate) port: u16,
    /// JSON array of keys: plain strings or `{"key", "source", "label", "enabled"}` objects.
    #[arg(long, env = "GEMGATE_KEYS_FILE")]
    pub(crate) keys_file: Option<PathBuf>,
    /// Repeatable; the env form is comma-separated.
    #[arg(long = "key", env = "GEMGATE_KEYS", value_delimiter = ',')]
    pub(crate) keys: Vec<String>,
    /// Outbound proxy for upstream calls, e.g. `http://127.0.0.1:7890`.
    #[arg(long, env = "GEMGATE_PROXY")]
    pub(crate) proxy: Option<String>,
    /// Protects `/admin` when set.
    #[arg(long, env = "GEMGATE_ADMIN_KEY")]
    pub(crate) admin_key: Option<String>,
    #[arg(long, env = "GEMGATE_BASE_URL", default_value = gemgate_core::DEFAULT_BASE_URL)]
    pub(crate) base_url: String,
    /// Upstream model for names missing from the built-in table.
    #[arg(long, env = "GEMGATE_DEFAULT_MODEL", default_value = "gemini-2.5-flash")]
    pub(crate) default_model: String,
    #[arg(long, env = "GEMGATE_MAX_RETRIES", default_value_t = 3)]
    pub(crate) max_retries: u32,
}
