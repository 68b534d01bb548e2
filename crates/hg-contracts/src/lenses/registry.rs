use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const BUILTIN_LENSES_JSON: &str = include_str!("../../resources/lenses.json");

pub const INTENT_PLACEHOLDER: &str = "{{STATED_INTENT}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LensCategory {
    pub id: String,
    pub name: String,
}

/// An alternate theoretical frame applied as an overlay to the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LensSpec {
    pub id: String,
    pub name: String,
    pub category: String,
    pub thinker: String,
    pub tagline: String,
    #[serde(rename = "prompt")]
    pub template: String,
}

impl LensSpec {
    pub fn requires_intent(&self) -> bool {
        self.template.contains(INTENT_PLACEHOLDER)
    }

    /// Returns the template with the stated intent substituted.
    ///
    /// `None` when the template needs intent text and none was supplied.
    /// The registry copy is never modified.
    pub fn instantiate(&self, intent: Option<&str>) -> Option<String> {
        if !self.requires_intent() {
            return Some(self.template.clone());
        }
        let intent = intent.map(str::trim).filter(|value| !value.is_empty())?;
        Some(self.template.replace(INTENT_PLACEHOLDER, intent))
    }
}

#[derive(Debug, Deserialize)]
struct LensCatalog {
    categories: Vec<LensCategory>,
    lenses: Vec<LensSpec>,
}

#[derive(Debug, Clone)]
pub struct LensRegistry {
    categories: Vec<LensCategory>,
    lenses: IndexMap<String, LensSpec>,
}

impl LensRegistry {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_LENSES_JSON).context("built-in lens catalog is malformed")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let catalog: LensCatalog =
            serde_json::from_str(raw).context("lens catalog is not valid JSON")?;
        let category_ids = catalog
            .categories
            .iter()
            .map(|category| category.id.as_str())
            .collect::<BTreeSet<_>>();
        let mut lenses = IndexMap::new();
        for lens in catalog.lenses {
            if !category_ids.contains(lens.category.as_str()) {
                bail!(
                    "lens '{}' references unknown category '{}'",
                    lens.id,
                    lens.category
                );
            }
            if lenses.contains_key(&lens.id) {
                bail!("duplicate lens id '{}'", lens.id);
            }
            lenses.insert(lens.id.clone(), lens);
        }
        Ok(Self {
            categories: catalog.categories,
            lenses,
        })
    }

    pub fn get(&self, id: &str) -> Option<&LensSpec> {
        self.lenses.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &LensSpec> {
        self.lenses.values()
    }

    pub fn categories(&self) -> &[LensCategory] {
        &self.categories
    }

    /// Lenses grouped under their category, in catalog order.
    pub fn grouped(&self) -> Vec<(&LensCategory, Vec<&LensSpec>)> {
        self.categories
            .iter()
            .map(|category| {
                let members = self
                    .lenses
                    .values()
                    .filter(|lens| lens.category == category.id)
                    .collect::<Vec<_>>();
                (category, members)
            })
            .filter(|(_, members)| !members.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{LensRegistry, INTENT_PLACEHOLDER};

    #[test]
    fn builtin_catalog_groups_lenses() -> anyhow::Result<()> {
        let registry = LensRegistry::builtin()?;
        let groups = registry.grouped();
        assert_eq!(groups[0].0.name, "Ontological & Philosophical");
        assert!(groups[0].1.iter().any(|lens| lens.id == "lens-phenomenology"));
        assert_eq!(
            registry.get("lens-ooo").map(|lens| lens.thinker.as_str()),
            Some("Graham Harman and Timothy Morton")
        );
        Ok(())
    }

    #[test]
    fn outlier_and_cultural_lenses_are_registered() -> anyhow::Result<()> {
        let registry = LensRegistry::builtin()?;
        let category = |id: &str| registry.get(id).map(|lens| lens.category.as_str());
        assert_eq!(category("lens-postmodern"), Some("cultural"));
        assert_eq!(category("lens-ngai"), Some("cultural"));
        assert_eq!(category("lens-metamodern"), Some("cultural"));
        assert_eq!(category("lens-hauntology"), Some("cultural"));
        assert_eq!(category("lens-uncanny"), Some("outliers"));
        assert_eq!(category("lens-neuro-archaeology"), Some("outliers"));
        assert_eq!(category("lens-biophilic"), Some("outliers"));
        assert_eq!(registry.list().count(), 18);

        let names = registry
            .grouped()
            .iter()
            .map(|(category, _)| category.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names.last().copied(), Some("Intent"));
        assert!(names.contains(&"Outliers & Stress Tests"));
        Ok(())
    }

    #[test]
    fn plain_lens_instantiates_without_intent() -> anyhow::Result<()> {
        let registry = LensRegistry::builtin()?;
        let Some(lens) = registry.get("lens-semiotics") else {
            anyhow::bail!("lens-semiotics missing");
        };
        assert!(!lens.requires_intent());
        assert_eq!(lens.instantiate(None).as_deref(), Some(lens.template.as_str()));
        Ok(())
    }

    #[test]
    fn intent_lens_requires_text_and_leaves_registry_untouched() -> anyhow::Result<()> {
        let registry = LensRegistry::builtin()?;
        let Some(lens) = registry.get("lens-stated-intent") else {
            anyhow::bail!("lens-stated-intent missing");
        };
        assert!(lens.requires_intent());
        assert!(lens.instantiate(None).is_none());
        assert!(lens.instantiate(Some("   ")).is_none());

        let derived = lens
            .instantiate(Some("A meditation on flooded memory."))
            .unwrap_or_default();
        assert!(derived.contains("A meditation on flooded memory."));
        assert!(!derived.contains(INTENT_PLACEHOLDER));

        let original = registry
            .get("lens-stated-intent")
            .map(|lens| lens.template.clone())
            .unwrap_or_default();
        assert!(original.contains(INTENT_PLACEHOLDER));
        Ok(())
    }

    #[test]
    fn rejects_lens_with_unknown_category() {
        let raw = r#"{"categories": [{"id": "a", "name": "A"}], "lenses": [
            {"id": "x", "name": "X", "category": "b", "thinker": "", "tagline": "", "prompt": ""}
        ]}"#;
        assert!(LensRegistry::from_json(raw).is_err());
    }
}
