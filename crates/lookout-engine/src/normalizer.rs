use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use lookout_contracts::events::{EventWriter, IMAGE_NORMALIZED};
use lookout_contracts::image::CanonicalImage;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const EPHEMERAL_PREFIX: &str = "blob:lookout/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("image source could not be read: {0}")]
    UnreadableSource(String),
    #[error("unsupported image handle: {0}")]
    UnsupportedFormat(String),
    #[error("ephemeral image {0} was already released")]
    AlreadyReleased(String),
    #[error("ephemeral image {0} is already held by another handle")]
    AlreadyOwned(String),
}

#[derive(Debug)]
enum Entry {
    Live(Vec<u8>),
    /// Kept after release so a second release is reported, not ignored.
    /// Tombstones are never removed, so the table holds one entry per image
    /// registered during the process.
    Released,
}

/// Process-local table of revocable image buffers.
///
/// Clones share the same table. Buffers registered here never leave the
/// process; they must be normalized into a `CanonicalImage` first.
#[derive(Debug, Clone, Default)]
pub struct EphemeralStore {
    entries: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bytes: Vec<u8>) -> EphemeralImage {
        let id = Uuid::new_v4();
        self.lock().insert(id, Entry::Live(bytes));
        EphemeralImage {
            id,
            store: self.clone(),
        }
    }

    pub fn register_file(&self, path: &Path) -> Result<EphemeralImage, NormalizeError> {
        let bytes = fs::read(path).map_err(|err| {
            NormalizeError::UnreadableSource(format!("{}: {err}", path.display()))
        })?;
        Ok(self.register(bytes))
    }

    /// Maps a transport string to a handle. `data:` URLs become canonical
    /// handles. A `blob:lookout/<id>` reference never yields a handle: a live
    /// entry already has its one owner (the `EphemeralImage` returned by
    /// `register`), and a released one is gone.
    pub fn resolve(&self, reference: &str) -> Result<ImageHandle, NormalizeError> {
        let trimmed = reference.trim();
        if CanonicalImage::looks_canonical(trimmed) {
            let image = CanonicalImage::parse(trimmed)
                .map_err(|err| NormalizeError::UnreadableSource(err.to_string()))?;
            return Ok(ImageHandle::Canonical(image));
        }
        let Some(raw_id) = trimmed.strip_prefix(EPHEMERAL_PREFIX) else {
            return Err(NormalizeError::UnsupportedFormat(truncate(trimmed, 64)));
        };
        let id = Uuid::parse_str(raw_id)
            .map_err(|_| NormalizeError::UnreadableSource(format!("broken reference {trimmed}")))?;
        match self.lock().get(&id) {
            Some(Entry::Live(_)) => Err(NormalizeError::AlreadyOwned(trimmed.to_string())),
            Some(Entry::Released) => Err(NormalizeError::AlreadyReleased(trimmed.to_string())),
            None => Err(NormalizeError::UnreadableSource(format!(
                "unknown reference {trimmed}"
            ))),
        }
    }

    pub fn live_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| matches!(entry, Entry::Live(_)))
            .count()
    }

    pub fn is_live(&self, reference: &str) -> bool {
        let Some(id) = reference
            .strip_prefix(EPHEMERAL_PREFIX)
            .and_then(|raw| Uuid::parse_str(raw).ok())
        else {
            return false;
        };
        matches!(self.lock().get(&id), Some(Entry::Live(_)))
    }

    /// Moves the bytes out and tombstones the entry in one step.
    fn take(&self, id: Uuid) -> Result<Vec<u8>, NormalizeError> {
        let mut entries = self.lock();
        match entries.insert(id, Entry::Released) {
            Some(Entry::Live(bytes)) => Ok(bytes),
            Some(Entry::Released) => Err(NormalizeError::AlreadyReleased(reference_for(id))),
            None => {
                entries.remove(&id);
                Err(NormalizeError::UnreadableSource(format!(
                    "unknown reference {}",
                    reference_for(id)
                )))
            }
        }
    }

    fn release(&self, id: Uuid) -> Result<(), NormalizeError> {
        self.take(id).map(|_| ())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owned reference to one live buffer in an `EphemeralStore`.
///
/// Released exactly once: by normalization, by an explicit `release`, or on
/// drop if neither happened.
#[derive(Debug)]
pub struct EphemeralImage {
    id: Uuid,
    store: EphemeralStore,
}

impl EphemeralImage {
    pub fn reference(&self) -> String {
        reference_for(self.id)
    }

    pub fn release(&self) -> Result<(), NormalizeError> {
        self.store.release(self.id)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.store.lock().get(&self.id), Some(Entry::Live(_)))
    }
}

impl Drop for EphemeralImage {
    fn drop(&mut self) {
        let mut entries = self.store.lock();
        if let Some(entry) = entries.get_mut(&self.id) {
            if matches!(entry, Entry::Live(_)) {
                *entry = Entry::Released;
                debug!("released ephemeral image {} on drop", reference_for(self.id));
            }
        }
    }
}

#[derive(Debug)]
pub enum ImageHandle {
    Ephemeral(EphemeralImage),
    Canonical(CanonicalImage),
}

impl ImageHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ephemeral(_) => "ephemeral",
            Self::Canonical(_) => "canonical",
        }
    }

    /// Short, payload-free label for status lines and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Ephemeral(image) => image.reference(),
            Self::Canonical(image) => format!(
                "{} ({} base64 chars)",
                image.media_type(),
                image.encoded_len()
            ),
        }
    }

    /// Releases an ephemeral handle; canonical handles hold nothing to release.
    pub fn release(self) -> Result<(), NormalizeError> {
        match self {
            Self::Ephemeral(image) => image.release(),
            Self::Canonical(_) => Ok(()),
        }
    }
}

impl From<CanonicalImage> for ImageHandle {
    fn from(image: CanonicalImage) -> Self {
        Self::Canonical(image)
    }
}

impl From<EphemeralImage> for ImageHandle {
    fn from(image: EphemeralImage) -> Self {
        Self::Ephemeral(image)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    events: Option<EventWriter>,
}

impl ImageNormalizer {
    pub fn new(events: Option<EventWriter>) -> Self {
        Self { events }
    }

    /// Canonical handles pass through unchanged. Ephemeral handles are read,
    /// encoded, and released; the release happens before any read error is
    /// reported.
    pub fn normalize(&self, handle: &ImageHandle) -> Result<CanonicalImage, NormalizeError> {
        let image = match handle {
            ImageHandle::Canonical(image) => image.clone(),
            ImageHandle::Ephemeral(ephemeral) => {
                let bytes = ephemeral.store.take(ephemeral.id)?;
                let image = encode_bytes(&bytes)?;
                self.emit_normalized(handle.kind(), &image, &bytes);
                image
            }
        };
        Ok(image)
    }

    fn emit_normalized(&self, source: &str, image: &CanonicalImage, bytes: &[u8]) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let digest = hex::encode(Sha256::digest(bytes));
        let mut payload = Map::new();
        payload.insert("source".to_string(), json!(source));
        payload.insert("mime_type".to_string(), json!(image.media_type()));
        payload.insert("bytes".to_string(), json!(bytes.len()));
        payload.insert(
            "sha256".to_string(),
            Value::String(digest.chars().take(16).collect()),
        );
        if let Err(err) = events.emit(IMAGE_NORMALIZED, payload) {
            log::warn!("event log write failed: {err:#}");
        }
    }
}

pub fn normalize(handle: &ImageHandle) -> Result<CanonicalImage, NormalizeError> {
    ImageNormalizer::default().normalize(handle)
}

/// Types raw bytes by content and encodes them canonically.
pub fn encode_bytes(bytes: &[u8]) -> Result<CanonicalImage, NormalizeError> {
    if bytes.is_empty() {
        return Err(NormalizeError::UnreadableSource(
            "zero-byte image payload".to_string(),
        ));
    }
    let format = image::guess_format(bytes).map_err(|_| {
        NormalizeError::UnreadableSource("payload is not a recognised image type".to_string())
    })?;
    CanonicalImage::from_bytes(format.to_mime_type(), bytes)
        .map_err(|err| NormalizeError::UnreadableSource(err.to_string()))
}

fn reference_for(id: Uuid) -> String {
    format!("{EPHEMERAL_PREFIX}{id}")
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use anyhow::Result;
    use image::{ImageFormat, Rgb, RgbImage};
    use lookout_contracts::events::EventWriter;
    use lookout_contracts::image::CanonicalImage;

    use super::{
        encode_bytes, normalize, EphemeralStore, ImageHandle, ImageNormalizer, NormalizeError,
        EPHEMERAL_PREFIX,
    };

    pub(crate) fn png_bytes(shade: u8) -> Vec<u8> {
        let image = RgbImage::from_pixel(4, 3, Rgb([shade, 64, 200]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn canonical_handles_are_identity() -> Result<()> {
        let image = encode_bytes(&png_bytes(10))?;
        let handle = ImageHandle::Canonical(image.clone());
        let once = normalize(&handle)?;
        let twice = normalize(&ImageHandle::Canonical(once.clone()))?;
        assert_eq!(once, image);
        assert_eq!(twice, once);
        Ok(())
    }

    #[test]
    fn ephemeral_normalize_releases_exactly_once() -> Result<()> {
        let store = EphemeralStore::new();
        let ephemeral = store.register(png_bytes(20));
        let reference = ephemeral.reference();
        assert!(reference.starts_with(EPHEMERAL_PREFIX));
        assert_eq!(store.live_count(), 1);

        let handle = ImageHandle::Ephemeral(ephemeral);
        let image = normalize(&handle)?;
        assert_eq!(image.media_type(), "image/png");
        assert_eq!(image.decode(), png_bytes(20));
        assert_eq!(store.live_count(), 0);

        assert_eq!(
            normalize(&handle),
            Err(NormalizeError::AlreadyReleased(reference.clone()))
        );
        assert_eq!(
            handle.release(),
            Err(NormalizeError::AlreadyReleased(reference))
        );
        Ok(())
    }

    #[test]
    fn unreadable_payload_is_still_released() {
        let store = EphemeralStore::new();
        let handle = ImageHandle::Ephemeral(store.register(b"plain text, not pixels".to_vec()));
        assert!(matches!(
            normalize(&handle),
            Err(NormalizeError::UnreadableSource(_))
        ));
        assert_eq!(store.live_count(), 0);

        let empty = ImageHandle::Ephemeral(store.register(Vec::new()));
        assert!(matches!(
            normalize(&empty),
            Err(NormalizeError::UnreadableSource(message)) if message.contains("zero-byte")
        ));
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn explicit_release_then_second_release_fails() {
        let store = EphemeralStore::new();
        let ephemeral = store.register(png_bytes(1));
        let reference = ephemeral.reference();
        assert!(ephemeral.is_live());
        assert_eq!(ephemeral.release(), Ok(()));
        assert!(!ephemeral.is_live());
        assert_eq!(
            ephemeral.release(),
            Err(NormalizeError::AlreadyReleased(reference))
        );
    }

    #[test]
    fn drop_releases_live_handles() {
        let store = EphemeralStore::new();
        let ephemeral = store.register(png_bytes(2));
        let reference = ephemeral.reference();
        drop(ephemeral);
        assert_eq!(store.live_count(), 0);
        assert!(!store.is_live(&reference));
        assert!(matches!(
            store.resolve(&reference),
            Err(NormalizeError::AlreadyReleased(_))
        ));
    }

    #[test]
    fn resolve_maps_transport_strings() -> Result<()> {
        let store = EphemeralStore::new();
        let ephemeral = store.register(png_bytes(3));

        let canonical = CanonicalImage::from_bytes("image/png", &png_bytes(3))?;
        let resolved = store.resolve(&canonical.to_string())?;
        assert_eq!(resolved.kind(), "canonical");

        assert!(matches!(
            store.resolve("https://example.test/cat.png"),
            Err(NormalizeError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            store.resolve("blob:lookout/not-a-uuid"),
            Err(NormalizeError::UnreadableSource(_))
        ));
        assert!(matches!(
            store.resolve(&format!("{EPHEMERAL_PREFIX}{}", uuid::Uuid::new_v4())),
            Err(NormalizeError::UnreadableSource(_))
        ));
        drop(ephemeral);
        Ok(())
    }

    #[test]
    fn live_reference_cannot_be_aliased() -> Result<()> {
        let store = EphemeralStore::new();
        let original = ImageHandle::Ephemeral(store.register(png_bytes(4)));
        let reference = original.describe();

        assert_eq!(
            store.resolve(&reference).map(|handle| handle.kind()),
            Err(NormalizeError::AlreadyOwned(reference.clone()))
        );
        assert!(store.is_live(&reference));

        let image = normalize(&original)?;
        assert_eq!(image.decode(), png_bytes(4));
        assert!(matches!(
            store.resolve(&reference),
            Err(NormalizeError::AlreadyReleased(_))
        ));
        Ok(())
    }

    #[test]
    fn register_file_reports_missing_path() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = EphemeralStore::new();
        let missing = temp.path().join("nope.png");
        assert!(matches!(
            store.register_file(&missing),
            Err(NormalizeError::UnreadableSource(message)) if message.contains("nope.png")
        ));

        let present = temp.path().join("shot.png");
        std::fs::write(&present, png_bytes(9))?;
        let ephemeral = store.register_file(&present)?;
        assert!(ephemeral.is_live());
        Ok(())
    }

    #[test]
    fn normalized_event_never_carries_payload() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let normalizer =
            ImageNormalizer::new(Some(EventWriter::new(&events_path, "run-normalize")));
        let store = EphemeralStore::new();
        let handle = ImageHandle::Ephemeral(store.register(png_bytes(5)));
        let image = normalizer.normalize(&handle)?;

        let raw = std::fs::read_to_string(&events_path)?;
        let event: serde_json::Value = serde_json::from_str(raw.trim())?;
        assert_eq!(event["type"], "image_normalized");
        assert_eq!(event["mime_type"], "image/png");
        assert_eq!(event["sha256"].as_str().map(str::len), Some(16));
        assert!(!raw.contains(image.payload()));
        Ok(())
    }
}
