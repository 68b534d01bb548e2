use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const BUILTIN_MODES_JSON: &str = include_str!("../../resources/modes.json");

/// Fields offered when no mode constrains the context form.
const FALLBACK_FIELDS: &[(&str, &str, bool)] = &[
    ("title", "Title", false),
    ("artist", "Artist", false),
    ("year", "Year", false),
    ("medium", "Medium", false),
    ("dimensions", "Dimensions", false),
    ("artist-statement", "Artist Statement", true),
    ("context-note", "Context Note", true),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatingLevel {
    #[default]
    None,
    Partial,
    Full,
}

impl GatingLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            GatingLevel::None => "none",
            GatingLevel::Partial => "partial",
            GatingLevel::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub multiline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubMode {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSpec {
    pub id: String,
    pub label: String,
    pub description: String,
    pub category: String,
    pub category_label: String,
    pub template: Option<String>,
    pub gating: GatingLevel,
    pub cross_cultural: bool,
    pub fields: Vec<FieldSpec>,
    pub submodes: Vec<SubMode>,
}

impl ModeSpec {
    pub fn declares_field(&self, id: &str) -> bool {
        self.fields.iter().any(|field| field.id == id)
    }

    pub fn submode(&self, id: &str) -> Option<&SubMode> {
        self.submodes.iter().find(|submode| submode.id == id)
    }

    pub fn template(&self) -> Option<&str> {
        self.template
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeCategory {
    pub id: String,
    pub label: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    categories: Vec<CatalogCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogCategory {
    id: String,
    label: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    sub_modes: Vec<SubMode>,
    #[serde(default)]
    fields: Vec<FieldSpec>,
    modes: Vec<CatalogMode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogMode {
    id: String,
    label: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    gating: GatingLevel,
    #[serde(default)]
    cross_cultural: bool,
}

/// Ordered catalog of analysis modes. The first entry is the default.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    modes: IndexMap<String, ModeSpec>,
    categories: Vec<ModeCategory>,
}

impl ModeRegistry {
    pub fn new(modes: IndexMap<String, ModeSpec>) -> Self {
        let mut categories: Vec<ModeCategory> = Vec::new();
        for mode in modes.values() {
            if categories.iter().all(|category| category.id != mode.category) {
                categories.push(ModeCategory {
                    id: mode.category.clone(),
                    label: mode.category_label.clone(),
                    description: String::new(),
                });
            }
        }
        Self { modes, categories }
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_MODES_JSON).context("built-in mode catalog is malformed")
    }

    /// Parses a category-grouped catalog and flattens it into mode entries.
    pub fn from_json(raw: &str) -> Result<Self> {
        let catalog: CatalogFile =
            serde_json::from_str(raw).context("mode catalog is not valid JSON")?;
        let mut modes = IndexMap::new();
        let mut categories = Vec::new();
        for category in catalog.categories {
            let mut field_ids = BTreeSet::new();
            for field in &category.fields {
                if !field_ids.insert(field.id.as_str()) {
                    bail!(
                        "category '{}' declares field '{}' twice",
                        category.id,
                        field.id
                    );
                }
            }
            for mode in category.modes {
                if modes.contains_key(&mode.id) {
                    bail!("duplicate mode id '{}'", mode.id);
                }
                modes.insert(
                    mode.id.clone(),
                    ModeSpec {
                        id: mode.id,
                        label: mode.label,
                        description: mode.description,
                        category: category.id.clone(),
                        category_label: category.label.clone(),
                        template: mode.template,
                        gating: mode.gating,
                        cross_cultural: mode.cross_cultural,
                        fields: category.fields.clone(),
                        submodes: category.sub_modes.clone(),
                    },
                );
            }
            categories.push(ModeCategory {
                id: category.id,
                label: category.label,
                description: category.description,
            });
        }
        if modes.is_empty() {
            bail!("mode catalog declares no modes");
        }
        Ok(Self { modes, categories })
    }

    pub fn get(&self, id: &str) -> Option<&ModeSpec> {
        self.modes.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModeSpec> {
        self.modes.values()
    }

    pub fn first(&self) -> Option<&ModeSpec> {
        self.modes.values().next()
    }

    pub fn categories(&self) -> &[ModeCategory] {
        &self.categories
    }

    pub fn by_category(&self, category: &str) -> Vec<ModeSpec> {
        self.modes
            .values()
            .filter(|mode| mode.category == category)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

pub fn fallback_fields() -> Vec<FieldSpec> {
    FALLBACK_FIELDS
        .iter()
        .map(|(id, label, multiline)| FieldSpec {
            id: (*id).to_string(),
            label: (*label).to_string(),
            multiline: *multiline,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{fallback_fields, GatingLevel, ModeRegistry};

    #[test]
    fn builtin_catalog_flattens_categories_in_file_order() -> anyhow::Result<()> {
        let registry = ModeRegistry::builtin()?;
        let first = registry.first().map(|mode| mode.id.as_str());
        assert_eq!(first, Some("fine-art-comprehensive"));

        let category_ids = registry
            .categories()
            .iter()
            .map(|category| category.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            category_ids,
            vec![
                "fine-art",
                "cpg",
                "comic-book",
                "commercial-illustration",
                "studio"
            ]
        );
        assert_eq!(registry.by_category("fine-art").len(), 5);
        Ok(())
    }

    #[test]
    fn modes_inherit_category_fields_and_submodes() -> anyhow::Result<()> {
        let registry = ModeRegistry::builtin()?;
        let Some(mode) = registry.get("fine-art-wip") else {
            anyhow::bail!("fine-art-wip missing");
        };
        assert_eq!(mode.category, "fine-art");
        assert_eq!(mode.gating, GatingLevel::Partial);
        assert!(mode.declares_field("period"));
        assert!(!mode.declares_field("brand"));
        assert!(mode.submode("fine-art-painting").is_some());
        assert!(mode.template().is_some());
        Ok(())
    }

    #[test]
    fn studio_protocols_carry_gating_flags() -> anyhow::Result<()> {
        let registry = ModeRegistry::builtin()?;
        let gating = |id: &str| registry.get(id).map(|mode| mode.gating);
        assert_eq!(gating("physics"), Some(GatingLevel::Partial));
        assert_eq!(gating("historian"), Some(GatingLevel::Full));
        assert_eq!(gating("technician"), Some(GatingLevel::None));
        assert_eq!(gating("full-audit"), Some(GatingLevel::Full));
        assert_eq!(gating("wip"), Some(GatingLevel::Full));
        assert!(registry
            .get("wip")
            .map(|mode| mode.declares_field("year") && mode.template().is_some())
            .unwrap_or(false));
        assert!(registry
            .get("global")
            .map(|mode| mode.cross_cultural)
            .unwrap_or(false));
        assert!(registry
            .get("physics")
            .map(|mode| mode.template().is_none())
            .unwrap_or(false));
        Ok(())
    }

    #[test]
    fn rejects_duplicate_mode_ids() {
        let raw = r#"{"categories": [
            {"id": "a", "label": "A", "modes": [{"id": "x", "label": "X"}]},
            {"id": "b", "label": "B", "modes": [{"id": "x", "label": "Y"}]}
        ]}"#;
        let err = ModeRegistry::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate mode id 'x'"));
    }

    #[test]
    fn fallback_fields_cover_free_form_context() {
        let ids = fallback_fields()
            .into_iter()
            .map(|field| field.id)
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "title",
                "artist",
                "year",
                "medium",
                "dimensions",
                "artist-statement",
                "context-note"
            ]
        );
    }
}
