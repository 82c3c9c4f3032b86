use std::sync::Arc;

use log::{debug, warn};
use lookout_contracts::analysis::{AnalysisError, AnalysisResult};
use lookout_contracts::errors::{classify, RawFailure};
use lookout_contracts::events::{
    EventPayload, EventWriter, ANALYSIS_COMPLETED, ANALYSIS_FAILED, ANALYSIS_STARTED,
};
use lookout_contracts::image::CanonicalImage;
use lookout_contracts::schema::{
    input_payload, validate, AnalysisSchema, DifferentialInput, DifferentialSchema,
    SingleImageInput, SingleImageSchema,
};
use serde_json::{json, Value};

use crate::capability::{CapabilityRequest, MalformedEnvelope, VisionCapability};

const SINGLE_IMAGE_INSTRUCTION: &str = "List every distinct object that is clearly visible in \
the image. Use short, concrete, specific names (for example \"Coffee Mug\", not \"object\" or \
\"thing\"). Name each distinct object once. Respond with JSON of the form \
{\"objects\": [\"...\"]}.";

const DIFFERENTIAL_INSTRUCTION: &str = "You are given a reference image and a comparison image. \
List the objects that are visibly present in the reference image but absent, or materially \
altered, in the comparison image. Ignore differences caused only by pose, lighting, camera \
angle, or texture. If nothing is missing, return an empty list. Respond with JSON of the form \
{\"missingObjects\": [\"...\"]}.";

const FAILURE_TEXT_MAX_CHARS: usize = 600;

/// Runs the two analysis operations against one capability.
///
/// Each call makes exactly one capability attempt. Empty or malformed output
/// degrades to a placeholder result; a failed call becomes an
/// [`AnalysisError`] carrying the classified failure.
#[derive(Clone)]
pub struct AnalysisInvoker {
    capability: Arc<dyn VisionCapability>,
    model: String,
    events: Option<EventWriter>,
}

impl AnalysisInvoker {
    pub fn new(capability: Arc<dyn VisionCapability>, model: impl Into<String>) -> Self {
        Self {
            capability,
            model: model.into(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn capability_name(&self) -> &str {
        self.capability.name()
    }

    pub fn analyze_single_image(
        &self,
        image: &CanonicalImage,
    ) -> Result<AnalysisResult, AnalysisError> {
        let input = SingleImageInput {
            image: image.clone(),
        };
        self.run::<SingleImageSchema>(&input, SINGLE_IMAGE_INSTRUCTION)
    }

    pub fn compare_images(
        &self,
        reference: &CanonicalImage,
        comparison: &CanonicalImage,
    ) -> Result<AnalysisResult, AnalysisError> {
        let input = DifferentialInput {
            reference_image: reference.clone(),
            comparison_image: comparison.clone(),
        };
        self.run::<DifferentialSchema>(&input, DIFFERENTIAL_INSTRUCTION)
    }

    fn run<S: AnalysisSchema>(
        &self,
        input: &S::Input,
        instruction: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        let request = CapabilityRequest {
            operation: S::OPERATION,
            model: self.model.clone(),
            instruction: instruction.to_string(),
            input: input_payload::<S>(input),
            input_fields: S::INPUT_FIELDS,
            output_field: S::OUTPUT_FIELD,
            output_schema: S::output_json_schema(),
        };
        self.emit(
            ANALYSIS_STARTED,
            json!({
                "operation": S::OPERATION,
                "model": self.model,
                "provider": self.capability.name(),
            }),
        );

        match self.capability.invoke(&request) {
            Ok(output) => {
                let result = degrade_or_validate::<S>(output);
                self.emit(
                    ANALYSIS_COMPLETED,
                    json!({
                        "operation": S::OPERATION,
                        "items": result.len(),
                        "degraded": result.degraded,
                    }),
                );
                Ok(result)
            }
            Err(err) => {
                let failure = raw_failure(&err);
                debug!("{} failed ({:?}): {}", S::OPERATION, failure.origin, failure.text);
                let error = AnalysisError::new(S::OPERATION, classify(&failure));
                self.emit(
                    ANALYSIS_FAILED,
                    json!({
                        "operation": S::OPERATION,
                        "category": error.error.category,
                        "message": error.error.message,
                    }),
                );
                Err(error)
            }
        }
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = events.emit(event_type, payload) {
            warn!("event log write failed: {err:#}");
        }
    }
}

fn degrade_or_validate<S: AnalysisSchema>(output: Option<Value>) -> AnalysisResult {
    let Some(output) = output.filter(|value| !value.is_null()) else {
        warn!("{} returned no output", S::OPERATION);
        return AnalysisResult::no_output::<S>();
    };
    match validate::<S>(&output) {
        Ok(valid) => AnalysisResult::new(S::output_items(&valid).to_vec()),
        Err(violation) => {
            warn!("{violation}");
            AnalysisResult::format_error::<S>()
        }
    }
}

/// Failure text is the whole error chain; the origin is response-shape when
/// any cause came from decoding a response that did arrive.
pub(crate) fn raw_failure(err: &anyhow::Error) -> RawFailure {
    let text = error_chain_text(err, FAILURE_TEXT_MAX_CHARS);
    let response_shape = err.chain().any(|cause| {
        cause.downcast_ref::<serde_json::Error>().is_some()
            || cause.downcast_ref::<MalformedEnvelope>().is_some()
    });
    if response_shape {
        RawFailure::response_shape(text)
    } else {
        RawFailure::transport(text)
    }
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
