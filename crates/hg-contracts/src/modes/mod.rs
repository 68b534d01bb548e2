mod registry;
mod selectors;

pub use registry::{
    fallback_fields, FieldSpec, GatingLevel, ModeCategory, ModeRegistry, ModeSpec, SubMode,
};
pub use selectors::{ModeSelection, ModeSelector};
