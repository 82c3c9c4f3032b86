pub mod capability;
pub mod config;
pub mod invoker;
pub mod normalizer;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use lookout_contracts::analysis::{AnalysisError, AnalysisResult};
use lookout_contracts::errors::{ClassifiedError, ErrorCategory};
use lookout_contracts::events::{EventPayload, EventWriter, ANALYSIS_FAILED};
use lookout_contracts::image::CanonicalImage;
use lookout_contracts::models::{ModelSelection, ModelSelector, ModelSpec, VISION};
use lookout_contracts::presentation::{AnalysisMode, Slot, Submission};
use lookout_contracts::schema::{AnalysisSchema, DifferentialSchema, SingleImageSchema};
use serde_json::json;
use uuid::Uuid;

pub use capability::{CapabilityRegistry, CapabilityRequest, VisionCapability};
pub use config::EngineConfig;
pub use invoker::AnalysisInvoker;
pub use normalizer::{
    EphemeralImage, EphemeralStore, ImageHandle, ImageNormalizer, NormalizeError,
};

/// Wires configuration, model selection, capabilities, and the ephemeral
/// image store together for one process.
pub struct LookoutEngine {
    run_id: String,
    events: Option<EventWriter>,
    model_selector: ModelSelector,
    capabilities: CapabilityRegistry,
    store: EphemeralStore,
    selection: ModelSelection,
}

impl LookoutEngine {
    pub fn new(config: EngineConfig, events_path: Option<PathBuf>) -> Result<Self> {
        let capabilities = CapabilityRegistry::with_defaults(&config);
        Self::with_capabilities(config, events_path, capabilities)
    }

    pub fn with_capabilities(
        config: EngineConfig,
        events_path: Option<PathBuf>,
        capabilities: CapabilityRegistry,
    ) -> Result<Self> {
        let run_id = format!("run-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let events = events_path.map(|path| EventWriter::new(path, run_id.clone()));
        let model_selector = ModelSelector::new(None);
        let selection = select_model(&model_selector, &config.model)?;
        Ok(Self {
            run_id,
            events,
            model_selector,
            capabilities,
            store: EphemeralStore::new(),
            selection,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn model(&self) -> &ModelSpec {
        &self.selection.model
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        self.selection.fallback_reason.as_deref()
    }

    /// Switches the vision model. Unknown names fall back to the default
    /// vision model; the reason is kept in [`Self::fallback_reason`].
    pub fn set_model(&mut self, requested: &str) -> Result<&ModelSpec> {
        self.selection = select_model(&self.model_selector, requested)?;
        if let Some(reason) = self.selection.fallback_reason.as_deref() {
            info!("{reason} Using {}.", self.selection.model.name);
        }
        Ok(&self.selection.model)
    }

    pub fn vision_models(&self) -> Vec<ModelSpec> {
        self.model_selector.registry.by_capability(VISION)
    }

    pub fn store(&self) -> &EphemeralStore {
        &self.store
    }

    /// Writes to the run log when one is configured.
    pub fn emit_event(&self, event_type: &str, payload: EventPayload) -> Result<()> {
        if let Some(events) = self.events.as_ref() {
            events.emit(event_type, payload)?;
        }
        Ok(())
    }

    pub fn normalizer(&self) -> ImageNormalizer {
        ImageNormalizer::new(self.events.clone())
    }

    pub fn invoker(&self) -> Result<AnalysisInvoker> {
        let provider = &self.selection.model.provider;
        let capability = self
            .capabilities
            .get(provider)
            .ok_or_else(|| anyhow!("no vision capability registered for provider '{provider}'"))?;
        Ok(AnalysisInvoker::new(capability, self.selection.model.name.clone())
            .with_events(self.events.clone()))
    }

    /// Captures an image source as a handle: `data:` URLs and `blob:lookout/`
    /// references go through [`EphemeralStore::resolve`] (which refuses to
    /// alias a live blob), anything else is read as a file into the ephemeral
    /// store.
    pub fn load_image(&self, source: &str) -> Result<ImageHandle, NormalizeError> {
        let trimmed = source.trim();
        if CanonicalImage::looks_canonical(trimmed) || trimmed.starts_with("blob:") {
            return self.store.resolve(trimmed);
        }
        if trimmed.contains("://") {
            return Err(NormalizeError::UnsupportedFormat(trimmed.to_string()));
        }
        self.store
            .register_file(Path::new(trimmed))
            .map(ImageHandle::Ephemeral)
    }

    /// Detaches one submission from the engine so it can run on a worker
    /// thread.
    pub fn prepare(&self, submission: Submission<ImageHandle>) -> Result<AnalysisJob> {
        let invoker = self
            .invoker()
            .context("vision capability unavailable for this model")?;
        Ok(AnalysisJob {
            invoker,
            normalizer: self.normalizer(),
            events: self.events.clone(),
            submission,
        })
    }
}

fn select_model(selector: &ModelSelector, requested: &str) -> Result<ModelSelection> {
    selector
        .select(Some(requested), VISION)
        .map_err(anyhow::Error::msg)
}

/// One analysis ready to run: normalization then exactly one capability
/// call. Owns its image handles, so every ephemeral handle is released by the
/// time `run` returns.
pub struct AnalysisJob {
    invoker: AnalysisInvoker,
    normalizer: ImageNormalizer,
    events: Option<EventWriter>,
    submission: Submission<ImageHandle>,
}

impl AnalysisJob {
    pub fn run(mut self) -> Result<AnalysisResult, AnalysisError> {
        match self.submission.mode {
            AnalysisMode::Single => {
                let image = self.canonical::<SingleImageSchema>(Slot::Image)?;
                self.invoker.analyze_single_image(&image)
            }
            AnalysisMode::Differential => {
                let reference = self.canonical::<DifferentialSchema>(Slot::Reference);
                let comparison = self.canonical::<DifferentialSchema>(Slot::Comparison);
                self.invoker.compare_images(&reference?, &comparison?)
            }
        }
    }

    fn canonical<S: AnalysisSchema>(&mut self, slot: Slot) -> Result<CanonicalImage, AnalysisError> {
        let outcome = match self.submission.take(slot) {
            Some(handle) => self.normalizer.normalize(&handle).map_err(|err| err.to_string()),
            None => Err(format!("no {slot} image was submitted")),
        };
        outcome.map_err(|detail| {
            debug!("{} normalization failed for {slot}: {detail}", S::OPERATION);
            let what = match slot {
                Slot::Image => "image".to_string(),
                other => format!("{other} image"),
            };
            let error = AnalysisError::new(
                S::OPERATION,
                ClassifiedError::new(
                    ErrorCategory::Unknown,
                    &format!("Could not read the {what} ({detail})"),
                ),
            );
            if let Some(events) = self.events.as_ref() {
                let payload = json!({
                    "operation": S::OPERATION,
                    "category": error.error.category,
                    "message": error.error.message,
                });
                if let Err(err) =
                    events.emit(ANALYSIS_FAILED, payload.as_object().cloned().unwrap_or_default())
                {
                    log::warn!("event log write failed: {err:#}");
                }
            }
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use lookout_contracts::errors::ErrorCategory;
    use lookout_contracts::presentation::{
        AnalysisMode, Completion, Phase, PresentationState, Slot,
    };

    use super::{EngineConfig, ImageHandle, LookoutEngine, NormalizeError};
    use crate::normalizer::tests::png_bytes;

    fn dryrun_engine(events: Option<PathBuf>) -> Result<LookoutEngine> {
        let config = EngineConfig::default().with_model(Some("dryrun-vision-1"));
        LookoutEngine::new(config, events)
    }

    fn write_png(dir: &std::path::Path, name: &str, shade: u8) -> Result<String> {
        let path = dir.join(name);
        std::fs::write(&path, png_bytes(shade))?;
        Ok(path.to_string_lossy().to_string())
    }

    #[test]
    fn single_image_pipeline_end_to_end() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = dryrun_engine(None)?;
        assert_eq!(engine.model().provider, "dryrun");

        let mut state = PresentationState::new(AnalysisMode::Single);
        let handle = engine.load_image(&write_png(temp.path(), "desk.png", 40)?)?;
        state.fill_slot(Slot::Image, handle)?;
        assert_eq!(engine.store().live_count(), 1);

        let submission = state.submit()?;
        let token = submission.token;
        let outcome = engine.prepare(submission)?.run();
        assert_eq!(engine.store().live_count(), 0);
        assert_eq!(state.complete(token, outcome), Completion::Applied(Phase::Result));
        assert_eq!(state.results().map(|result| result.len()), Some(3));
        assert_eq!(state.reveal_cursor(), Some(0));
        Ok(())
    }

    #[test]
    fn identical_images_compare_to_nothing_missing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = dryrun_engine(None)?;
        let path = write_png(temp.path(), "shelf.png", 90)?;

        let mut state = PresentationState::new(AnalysisMode::Differential);
        state.fill_slot(Slot::Reference, engine.load_image(&path)?)?;
        state.fill_slot(Slot::Comparison, engine.load_image(&path)?)?;
        let submission = state.submit()?;
        let token = submission.token;
        let outcome = engine.prepare(submission)?.run();
        state.complete(token, outcome);
        assert_eq!(state.phase(), Phase::Result);
        assert_eq!(state.results().map(|result| result.is_empty()), Some(true));
        assert_eq!(engine.store().live_count(), 0);
        Ok(())
    }

    #[test]
    fn unreadable_image_surfaces_as_unknown_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let engine = dryrun_engine(Some(events_path.clone()))?;
        let text_path = temp.path().join("notes.png");
        std::fs::write(&text_path, "not an image")?;

        let mut state = PresentationState::new(AnalysisMode::Single);
        state.fill_slot(Slot::Image, engine.load_image(&text_path.to_string_lossy())?)?;
        let submission = state.submit()?;
        let token = submission.token;
        let outcome = engine.prepare(submission)?.run();
        state.complete(token, outcome);

        assert_eq!(state.phase(), Phase::Error);
        let failure = state.error().cloned().ok_or_else(|| anyhow::anyhow!("no error"))?;
        assert_eq!(failure.operation, "analyze_single_image");
        let error = failure.classified();
        assert_eq!(error.category, ErrorCategory::Unknown);
        assert!(error.message.contains("Could not read the image"));
        assert!(error.message.contains("re-select"));
        assert_eq!(engine.store().live_count(), 0);

        let raw = std::fs::read_to_string(&events_path)?;
        assert!(raw.contains("\"type\":\"analysis_failed\""));
        Ok(())
    }

    #[test]
    fn load_image_rejects_remote_urls_and_missing_files() -> Result<()> {
        let engine = dryrun_engine(None)?;
        assert!(matches!(
            engine.load_image("https://example.test/cat.png"),
            Err(NormalizeError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            engine.load_image("/definitely/not/here.png"),
            Err(NormalizeError::UnreadableSource(_))
        ));
        let canonical = engine.load_image("data:image/png;base64,iVBORw0KGgo=")?;
        assert!(matches!(canonical, ImageHandle::Canonical(_)));
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_with_reason() -> Result<()> {
        let mut engine = dryrun_engine(None)?;
        assert!(engine.fallback_reason().is_none());
        let model = engine.set_model("gemini-9-ultra")?.name.clone();
        assert_eq!(model, "gemini-2.0-flash");
        assert_eq!(
            engine.fallback_reason(),
            Some("Requested model 'gemini-9-ultra' unavailable for capability 'vision'.")
        );
        assert_eq!(engine.invoker()?.capability_name(), "gemini");
        assert!(engine
            .vision_models()
            .iter()
            .any(|model| model.name == "dryrun-vision-1"));
        Ok(())
    }
}
