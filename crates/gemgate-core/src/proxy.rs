use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Outbound proxy URL shared between the transport (reads it per call) and
/// the admin surface (replaces it at runtime).
#[derive(Debug, Clone, Default)]
pub struct ProxySetting {
    current: Arc<ArcSwapOption<String>>,
}

impl ProxySetting {
    pub fn new(initial: Option<String>) -> Self {
        let setting = Self::default();
        setting.set(initial);
        setting
    }

    pub fn get(&self) -> Option<String> {
        self.current.load_full().map(|value| value.as_ref().clone())
    }

    /// Blank values clear the proxy.
    pub fn set(&self, value: Option<String>) {
        let value = value
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty());
        self.current.store(value.map(Arc::new));
    }
}
