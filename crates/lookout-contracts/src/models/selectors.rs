use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            format!("Requested model '{requested_value}' unavailable for capability '{capability}'.")
        } else {
            "No model specified; using default.".to_string()
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::models::{ModelRegistry, ModelSelector, ModelSpec, VISION};

    fn vision_model(name: &str, provider: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: vec![VISION.to_string()],
            context_window: None,
        }
    }

    #[test]
    fn requested_model_is_used_when_available() {
        let selection = ModelSelector::new(None)
            .select(Some("dryrun-vision-1"), VISION)
            .unwrap();
        assert_eq!(selection.model.provider, "dryrun");
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn falls_back_when_requested_model_unavailable() {
        let mut models = IndexMap::new();
        models.insert(
            "vision-fallback".to_string(),
            vision_model("vision-fallback", "gemini"),
        );
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("missing"), VISION)
            .unwrap();
        assert_eq!(selection.model.name, "vision-fallback");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'vision'.")
        );
    }

    #[test]
    fn blank_request_uses_default_with_explanation() {
        let selection = ModelSelector::new(None).select(Some("  "), VISION).unwrap();
        assert_eq!(selection.model.name, "gemini-2.0-flash");
        assert!(selection.requested.is_none());
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn errors_when_no_models_for_capability() {
        let mut models = IndexMap::new();
        models.insert(
            "text-only".to_string(),
            ModelSpec {
                name: "text-only".to_string(),
                provider: "dryrun".to_string(),
                capabilities: vec!["text".to_string()],
                context_window: None,
            },
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("gemini-2.0-flash"), VISION)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'vision'.");
    }
}
