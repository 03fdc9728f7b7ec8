use gemgate_protocol::openai::{ListModelsResponse, Model};

pub const DEFAULT_UPSTREAM_MODEL: &str = "gemini-2.5-flash";

const MODEL_CREATED: i64 = 1_677_610_602;
const MODEL_OWNER: &str = "google-gemini";

/// Advertised id -> upstream model id.
const MODEL_TABLE: &[(&str, &str)] = &[
    ("gpt-3.5-turbo", "gemini-2.5-flash-lite"),
    ("gpt-4", "gemini-2.5-pro"),
    ("gpt-4-turbo", "gemini-2.5-pro"),
    ("gpt-4o", "gemini-2.5-flash"),
    ("gpt-4o-mini", "gemini-2.5-flash-lite"),
    ("gemini-2.5-pro", "gemini-2.5-pro"),
    ("gemini-2.5-flash", "gemini-2.5-flash"),
    ("gemini-2.5-flash-lite", "gemini-2.5-flash-lite"),
    ("gemini-2.0-flash", "gemini-2.0-flash"),
];

#[derive(Debug, Clone)]
pub struct ModelMap {
    default_model: String,
}

impl Default for ModelMap {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_MODEL)
    }
}

impl ModelMap {
    pub fn new(default_model: impl Into<String>) -> Self {
        let default_model = default_model.into();
        let default_model = if default_model.trim().is_empty() {
            DEFAULT_UPSTREAM_MODEL.to_string()
        } else {
            default_model.trim().to_string()
        };
        Self { default_model }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Upstream model for a requested id. Table entries win; any other
    /// `gemini-*` id is passed through; everything else gets the default.
    pub fn resolve(&self, requested: &str) -> String {
        let requested = requested.trim();
        let requested = requested.strip_prefix("models/").unwrap_or(requested);
        if let Some((_, upstream)) = MODEL_TABLE.iter().find(|(id, _)| *id == requested) {
            return (*upstream).to_string();
        }
        if requested.starts_with("gemini-") {
            return requested.to_string();
        }
        self.default_model.clone()
    }

    pub fn list(&self) -> ListModelsResponse {
        ListModelsResponse::new(
            MODEL_TABLE
                .iter()
                .map(|(id, _)| Model {
                    id: (*id).to_string(),
                    object: "model".to_string(),
                    created: MODEL_CREATED,
                    owned_by: MODEL_OWNER.to_string(),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_native_names_and_default() {
        let map = ModelMap::new("gemini-2.0-flash");
        assert_eq!(map.resolve("gpt-4o"), "gemini-2.5-flash");
        assert_eq!(map.resolve("models/gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(map.resolve("gemini-exp-1206"), "gemini-exp-1206");
        assert_eq!(map.resolve("claude-3-opus"), "gemini-2.0-flash");
    }

    #[test]
    fn blank_default_falls_back() {
        assert_eq!(ModelMap::new("  ").default_model(), DEFAULT_UPSTREAM_MODEL);
    }

    #[test]
    fn list_advertises_every_table_entry() {
        let list = ModelMap::default().list();
        assert_eq!(list.object, "list");
        assert_eq!(list.data.len(), MODEL_TABLE.len());
        assert!(list.data.iter().all(|model| model.owned_by == MODEL_OWNER));
        assert!(list.data.iter().any(|model| model.id == "gpt-4o"));
    }
}
