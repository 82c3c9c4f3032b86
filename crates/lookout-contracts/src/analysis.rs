use serde::{Deserialize, Serialize};

use crate::errors::ClassifiedError;
use crate::schema::AnalysisSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// The capability answered with an empty envelope.
    NoOutput,
    /// The capability answered, but the output failed schema validation.
    FormatError,
}

/// Ordered model output, as returned. An empty list is a real answer
/// ("nothing found" / "nothing missing"), not a failure.
///
/// Degraded results still carry a single displayable placeholder line in
/// `items`; `degraded` says why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradedReason>,
}

impl AnalysisResult {
    pub fn new(items: Vec<String>) -> Self {
        Self {
            items,
            degraded: None,
        }
    }

    pub fn no_output<S: AnalysisSchema>() -> Self {
        Self {
            items: vec![format!("AI returned no output for {}.", S::SUBJECT)],
            degraded: Some(DegradedReason::NoOutput),
        }
    }

    pub fn format_error<S: AnalysisSchema>() -> Self {
        Self {
            items: vec![format!("AI output format error for {}.", S::SUBJECT)],
            degraded: Some(DegradedReason::FormatError),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// A failed invocation, already classified, tagged with the operation that
/// raised it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {error}")]
pub struct AnalysisError {
    pub operation: String,
    pub error: ClassifiedError,
}

impl AnalysisError {
    pub fn new(operation: &str, error: ClassifiedError) -> Self {
        Self {
            operation: operation.to_string(),
            error,
        }
    }

    pub fn classified(&self) -> &ClassifiedError {
        &self.error
    }
}
