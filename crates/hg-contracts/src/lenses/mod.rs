mod registry;

pub use registry::{LensCategory, LensRegistry, LensSpec, INTENT_PLACEHOLDER};
