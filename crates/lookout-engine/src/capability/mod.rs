mod dryrun;
mod gemini;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use lookout_contracts::image::CanonicalImage;
use serde_json::{Map, Value};

pub use dryrun::DryrunCapability;
pub use gemini::GeminiCapability;

use crate::config::EngineConfig;

/// One call to a hosted vision model.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub operation: &'static str,
    pub model: String,
    pub instruction: String,
    /// Wire-level request object, e.g. `{ "image": "data:..." }`.
    pub input: Map<String, Value>,
    pub input_fields: &'static [&'static str],
    pub output_field: &'static str,
    pub output_schema: Value,
}

impl CapabilityRequest {
    /// The request's images in field order.
    pub fn images(&self) -> Result<Vec<(&'static str, CanonicalImage)>> {
        self.input_fields
            .iter()
            .map(|field| {
                let raw = self
                    .input
                    .get(*field)
                    .and_then(Value::as_str)
                    .with_context(|| format!("{} request is missing '{field}'", self.operation))?;
                let image = CanonicalImage::parse(raw)
                    .with_context(|| format!("{} request field '{field}'", self.operation))?;
                Ok((*field, image))
            })
            .collect()
    }
}

/// A hosted multimodal model behind a fixed request/response contract.
///
/// `Ok(None)` means the capability answered with an empty envelope. Any
/// `Err` is an invocation failure; its chain text is what gets classified.
pub trait VisionCapability: Send + Sync {
    fn name(&self) -> &str;
    fn invoke(&self, request: &CapabilityRequest) -> Result<Option<Value>>;
}

/// Marks an error raised while reading a response that did arrive.
#[derive(Debug, thiserror::Error)]
#[error("malformed capability envelope: {0}")]
pub struct MalformedEnvelope(pub String);

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn VisionCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(DryrunCapability);
        registry.register(GeminiCapability::new(config));
        registry
    }

    pub fn register<C: VisionCapability + 'static>(&mut self, capability: C) {
        self.capabilities
            .insert(capability.name().to_string(), Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VisionCapability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }
}
