use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const CANONICAL_SCHEME: &str = "data";
pub const CANONICAL_ENCODING: &str = "base64";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonicalImageError {
    #[error("canonical image must use the 'data:' scheme")]
    WrongScheme,
    #[error("canonical image is missing the ',' payload separator")]
    MissingPayloadSeparator,
    #[error("canonical image media type is empty or malformed: '{0}'")]
    BadMediaType(String),
    #[error("canonical image must be base64 encoded")]
    NotBase64Encoded,
    #[error("canonical image payload is empty")]
    EmptyPayload,
    #[error("canonical image payload is not valid base64")]
    InvalidPayload,
}

/// Self-describing, transport-safe image: `data:<mediatype>;base64,<payload>`.
///
/// Construction always validates, so a value of this type is never empty and
/// always decodes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalImage {
    media_type: String,
    payload: String,
}

impl CanonicalImage {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Result<Self, CanonicalImageError> {
        validate_media_type(media_type)?;
        if bytes.is_empty() {
            return Err(CanonicalImageError::EmptyPayload);
        }
        Ok(Self {
            media_type: media_type.trim().to_ascii_lowercase(),
            payload: BASE64.encode(bytes),
        })
    }

    pub fn parse(raw: &str) -> Result<Self, CanonicalImageError> {
        let value = raw.trim();
        let Some((scheme, rest)) = value.split_once(':') else {
            return Err(CanonicalImageError::WrongScheme);
        };
        if !scheme.eq_ignore_ascii_case(CANONICAL_SCHEME) {
            return Err(CanonicalImageError::WrongScheme);
        }
        let Some((header, payload)) = rest.split_once(',') else {
            return Err(CanonicalImageError::MissingPayloadSeparator);
        };
        let Some((media_type, encoding)) = header.rsplit_once(';') else {
            return Err(CanonicalImageError::NotBase64Encoded);
        };
        if !encoding.eq_ignore_ascii_case(CANONICAL_ENCODING) {
            return Err(CanonicalImageError::NotBase64Encoded);
        }
        validate_media_type(media_type)?;
        if payload.is_empty() {
            return Err(CanonicalImageError::EmptyPayload);
        }
        let decoded = BASE64
            .decode(payload.as_bytes())
            .map_err(|_| CanonicalImageError::InvalidPayload)?;
        if decoded.is_empty() {
            return Err(CanonicalImageError::EmptyPayload);
        }
        Ok(Self {
            media_type: media_type.trim().to_ascii_lowercase(),
            payload: payload.to_string(),
        })
    }

    /// Cheap check used when sorting raw references before a full parse.
    pub fn looks_canonical(raw: &str) -> bool {
        raw.trim()
            .get(..CANONICAL_SCHEME.len() + 1)
            .map(|head| head.eq_ignore_ascii_case("data:"))
            .unwrap_or(false)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn decode(&self) -> Vec<u8> {
        BASE64.decode(self.payload.as_bytes()).unwrap_or_default()
    }

    pub fn encoded_len(&self) -> usize {
        self.payload.len()
    }
}

fn validate_media_type(media_type: &str) -> Result<(), CanonicalImageError> {
    let trimmed = media_type.trim();
    let valid = trimmed
        .split_once('/')
        .map(|(kind, sub)| !kind.is_empty() && !sub.is_empty() && !sub.contains('/'))
        .unwrap_or(false);
    if !valid || trimmed.contains(',') || trimmed.contains(';') {
        return Err(CanonicalImageError::BadMediaType(trimmed.to_string()));
    }
    Ok(())
}

impl fmt::Display for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{CANONICAL_SCHEME}:{};{CANONICAL_ENCODING},{}",
            self.media_type, self.payload
        )
    }
}

// Payloads run to megabytes; keep debug output readable.
impl fmt::Debug for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalImage")
            .field("media_type", &self.media_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl FromStr for CanonicalImage {
    type Err = CanonicalImageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for CanonicalImage {
    type Error = CanonicalImageError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<CanonicalImage> for String {
    fn from(image: CanonicalImage) -> Self {
        image.to_string()
    }
}
