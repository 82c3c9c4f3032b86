use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    ModelUnavailable,
    ContentSafety,
    InvalidCredential,
    InvalidResponse,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 6] = [
        ErrorCategory::Network,
        ErrorCategory::ModelUnavailable,
        ErrorCategory::ContentSafety,
        ErrorCategory::InvalidCredential,
        ErrorCategory::InvalidResponse,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ModelUnavailable => "model-unavailable",
            Self::ContentSafety => "content-safety",
            Self::InvalidCredential => "invalid-credential",
            Self::InvalidResponse => "invalid-response",
            Self::Unknown => "unknown",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            Self::Network => "Check your network connection and try again.",
            Self::ModelUnavailable => {
                "The configured model is unavailable; verify the model name and API access."
            }
            Self::ContentSafety => {
                "The request was blocked by the provider's safety filters; try a different image."
            }
            Self::InvalidCredential => {
                "Verify that GEMINI_API_KEY (or GOOGLE_API_KEY) is set and valid."
            }
            Self::InvalidResponse => "The AI service returned an unreadable response; try again.",
            Self::Unknown => "An unexpected error occurred; try again or re-select the image.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure surfaced: the call itself, or handling of a response that
/// did arrive but could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    Transport,
    ResponseShape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFailure {
    pub origin: FailureOrigin,
    pub text: String,
}

impl RawFailure {
    pub fn transport(text: impl Into<String>) -> Self {
        Self {
            origin: FailureOrigin::Transport,
            text: text.into(),
        }
    }

    pub fn response_shape(text: impl Into<String>) -> Self {
        Self {
            origin: FailureOrigin::ResponseShape,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(category: ErrorCategory, detail: &str) -> Self {
        Self {
            category,
            message: augment(detail, category.hint()),
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

/// First match wins; order is part of the contract. Matching is
/// case-sensitive substring search over the failure text.
pub const SIGNATURES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Network,
        &[
            "fetch failed",
            "error sending request",
            "ECONNREFUSED",
            "ECONNRESET",
            "ENOTFOUND",
            "ETIMEDOUT",
            "dns error",
            "Connection refused",
            "operation timed out",
        ],
    ),
    (
        ErrorCategory::ModelUnavailable,
        &[
            "NOT_FOUND",
            "Model not found",
            "model not found",
            "is not found for API version",
            "is not supported for generateContent",
        ],
    ),
    (
        ErrorCategory::ContentSafety,
        &["SAFETY", "PROHIBITED_CONTENT", "blocked by safety"],
    ),
    (
        ErrorCategory::InvalidCredential,
        &[
            "API key not valid",
            "API_KEY_INVALID",
            "API key missing",
            "PERMISSION_DENIED",
            "UNAUTHENTICATED",
        ],
    ),
];

pub fn classify(failure: &RawFailure) -> ClassifiedError {
    let detail = failure.text.trim();
    let detail = if detail.is_empty() {
        "Unknown error"
    } else {
        detail
    };

    let matched = SIGNATURES.iter().find_map(|(category, needles)| {
        needles
            .iter()
            .any(|needle| detail.contains(needle))
            .then_some(*category)
    });
    let category = matched.unwrap_or(match failure.origin {
        FailureOrigin::Transport => ErrorCategory::Unknown,
        FailureOrigin::ResponseShape => ErrorCategory::InvalidResponse,
    });
    ClassifiedError::new(category, detail)
}

fn augment(detail: &str, hint: &str) -> String {
    let detail = detail.trim().trim_end_matches('.');
    if detail.is_empty() {
        return hint.to_string();
    }
    format!("{detail}. {hint}")
}
