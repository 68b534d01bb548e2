use super::registry::{ModeRegistry, ModeSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelection {
    pub mode: ModeSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModeSelector {
    pub registry: ModeRegistry,
}

impl ModeSelector {
    pub fn new(registry: ModeRegistry) -> Self {
        Self { registry }
    }

    /// Resolves a mode id, falling back to the first registry entry.
    pub fn select(&self, requested: Option<&str>) -> Result<ModeSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(mode) = self.registry.get(requested_value) {
                return Ok(ModeSelection {
                    mode: mode.clone(),
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested mode '{requested_value}' is not registered; using default."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No mode specified; using default.".to_string()), None)
        };

        let Some(mode) = self.registry.first().cloned() else {
            return Err("No analysis modes are registered.".to_string());
        };
        Ok(ModeSelection {
            mode,
            requested: requested_text,
            fallback_reason,
        })
    }
}
