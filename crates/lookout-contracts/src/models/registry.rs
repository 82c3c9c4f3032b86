use indexmap::IndexMap;

pub const VISION: &str = "vision";
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

// Insertion order matters: the first vision model is the fallback default.
fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], context_window: u64| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window: Some(context_window),
            },
        );
    };

    insert(DEFAULT_VISION_MODEL, "gemini", &["text", VISION], 1_048_576);
    insert("gemini-2.5-flash", "gemini", &["text", VISION], 1_048_576);
    insert("gemini-2.5-pro", "gemini", &["text", VISION], 1_048_576);
    insert("gemini-1.5-flash", "gemini", &["text", VISION], 1_048_576);
    insert("gemini-1.5-pro", "gemini", &["text", VISION], 2_097_152);
    insert("text-embedding-004", "gemini", &["embedding"], 2_048);
    insert("dryrun-vision-1", "dryrun", &["text", VISION], 8_192);

    map
}
