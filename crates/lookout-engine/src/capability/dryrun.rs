use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::{CapabilityRequest, VisionCapability};

const OBJECT_NAMES: &[&str] = &[
    "Cat",
    "Laptop",
    "Coffee Mug",
    "Desk Lamp",
    "Potted Plant",
    "Notebook",
    "Headphones",
    "Wall Clock",
    "Water Bottle",
    "Sunglasses",
    "Backpack",
    "Keyboard",
    "Picture Frame",
    "Smartphone",
    "Scissors",
    "Bookshelf",
];
const OBJECTS_PER_IMAGE: usize = 3;

/// Offline capability. Object names are derived from a SHA-256 of each image
/// payload, so the same image always yields the same objects and comparing an
/// image with itself finds nothing missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunCapability;

impl VisionCapability for DryrunCapability {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn invoke(&self, request: &CapabilityRequest) -> Result<Option<Value>> {
        let images = request.images()?;
        let items: Vec<String> = match images.as_slice() {
            [(_, image)] => objects_for(image.payload()),
            [(_, reference), (_, comparison)] => {
                let present = objects_for(comparison.payload());
                objects_for(reference.payload())
                    .into_iter()
                    .filter(|name| !present.contains(name))
                    .collect()
            }
            _ => bail!(
                "dryrun cannot handle {} images for {}",
                images.len(),
                request.operation
            ),
        };

        let mut output = Map::new();
        output.insert(request.output_field.to_string(), json!(items));
        Ok(Some(Value::Object(output)))
    }
}

fn objects_for(payload: &str) -> Vec<String> {
    let digest = Sha256::digest(payload.as_bytes());
    let mut names: Vec<String> = Vec::with_capacity(OBJECTS_PER_IMAGE);
    for byte in digest.iter() {
        let name = OBJECT_NAMES[usize::from(*byte) % OBJECT_NAMES.len()];
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
        if names.len() == OBJECTS_PER_IMAGE {
            break;
        }
    }
    names
}
