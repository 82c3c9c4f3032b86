use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::debug;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use super::{CapabilityRequest, MalformedEnvelope, VisionCapability};
use crate::config::EngineConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";
const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Gemini `generateContent` with inline image parts and a JSON response
/// schema. One request per invocation.
pub struct GeminiCapability {
    api_key: Option<String>,
    api_base: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiCapability {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            api_base: config.api_base.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        endpoint_for_model(&self.api_base, model)
    }
}

impl VisionCapability for GeminiCapability {
    fn name(&self) -> &str {
        "gemini"
    }

    fn invoke(&self, request: &CapabilityRequest) -> Result<Option<Value>> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("Gemini API key missing (set GEMINI_API_KEY or GOOGLE_API_KEY)");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = build_payload(request)?;
        debug!(
            "gemini {} via {} ({} image parts)",
            request.operation,
            request.model,
            request.input_fields.len()
        );

        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let body = response_json_or_error("gemini", response)?;
        extract_output(&body)
    }
}

pub(crate) fn endpoint_for_model(api_base: &str, model: &str) -> String {
    let trimmed = model.trim();
    let model_path = if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    };
    format!("{api_base}/{model_path}:generateContent")
}

/// Instruction first, then one labelled inline image per input field.
pub(crate) fn build_payload(request: &CapabilityRequest) -> Result<Value> {
    let mut parts = vec![json!({ "text": request.instruction })];
    for (field, image) in request.images()? {
        parts.push(json!({ "text": format!("{field}:") }));
        parts.push(json!({
            "inlineData": {
                "mimeType": image.media_type(),
                "data": image.payload(),
            }
        }));
    }

    let mut generation_config = Map::new();
    generation_config.insert(
        "responseMimeType".to_string(),
        Value::String("application/json".to_string()),
    );
    generation_config.insert("responseSchema".to_string(), request.output_schema.clone());

    Ok(json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "generationConfig": Value::Object(generation_config),
    }))
}

/// Pulls the structured output out of a `generateContent` response.
///
/// - no candidate text → `Ok(None)`
/// - text that is not JSON → `Ok(Some(Value::String(..)))`, left for schema
///   validation to reject
/// - safety blocks → `Err`, worded so the classifier sees a safety signature
/// - envelope fields of the wrong type → `Err(MalformedEnvelope)`
pub(crate) fn extract_output(response: &Value) -> Result<Option<Value>> {
    let Some(envelope) = response.as_object() else {
        return Err(MalformedEnvelope("response is not a JSON object".to_string()).into());
    };

    if let Some(reason) = envelope
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        bail!("Gemini response blocked by safety filters (blockReason: {reason})");
    }

    let candidates = match envelope.get("candidates") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(rows)) => rows,
        Some(_) => {
            return Err(MalformedEnvelope("'candidates' is not an array".to_string()).into())
        }
    };
    let Some(candidate) = candidates.first() else {
        return Ok(None);
    };

    let mut text = String::new();
    if let Some(parts) = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
    {
        let Some(parts) = parts.as_array() else {
            return Err(MalformedEnvelope("'content.parts' is not an array".to_string()).into());
        };
        for part in parts {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(chunk) = part.get("text").and_then(Value::as_str) {
                text.push_str(chunk);
            }
        }
    }

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if text.trim().is_empty() {
        if BLOCKING_FINISH_REASONS.contains(&finish_reason) {
            bail!("Gemini response blocked by safety filters (finishReason: {finish_reason})");
        }
        return Ok(None);
    }

    let cleaned = strip_json_fence(&text);
    Ok(Some(
        serde_json::from_str::<Value>(cleaned)
            .unwrap_or_else(|_| Value::String(cleaned.to_string())),
    ))
}

fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    let inner = inner
        .strip_prefix("json")
        .or_else(|| inner.strip_prefix("JSON"))
        .unwrap_or(inner);
    inner.trim()
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
