mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_VISION_MODEL, VISION};
pub use selectors::{ModelSelection, ModelSelector};
