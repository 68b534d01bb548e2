use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const BUILTIN_FRAMEWORK_JSON: &str = include_str!("../../resources/framework.json");

/// A governing category ("Root") of the framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub subtitle: String,
    pub governs: String,
    #[serde(default)]
    pub anchor_cues: Vec<String>,
}

/// A named perceptual mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principle {
    pub id: String,
    pub name: String,
    pub subtitle: String,
    pub mechanism: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
}

/// A non-Western analytical concept used by cross-cultural modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexiconTerm {
    pub id: String,
    pub term: String,
    pub origin: String,
    pub definition: String,
    pub in_practice: String,
    pub mapping: String,
}

/// Read-only reference data loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkStore {
    version: String,
    drivers: Vec<Driver>,
    principles: Vec<Principle>,
    #[serde(default)]
    lexicon: Vec<LexiconTerm>,
}

impl FrameworkStore {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_FRAMEWORK_JSON).context("built-in framework reference is malformed")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let store: Self =
            serde_json::from_str(raw).context("framework reference is not valid JSON")?;
        store.validate()?;
        Ok(store)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn drivers(&self) -> &[Driver] {
        &self.drivers
    }

    pub fn principles(&self) -> &[Principle] {
        &self.principles
    }

    pub fn lexicon(&self) -> &[LexiconTerm] {
        &self.lexicon
    }

    pub fn driver(&self, id: &str) -> Option<&Driver> {
        self.drivers.iter().find(|driver| driver.id == id)
    }

    pub fn principle(&self, id: &str) -> Option<&Principle> {
        self.principles.iter().find(|principle| principle.id == id)
    }

    pub fn principles_for_driver(&self, driver_id: &str) -> Vec<&Principle> {
        self.principles
            .iter()
            .filter(|principle| principle.driver.as_deref() == Some(driver_id))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.drivers.is_empty() {
            bail!("framework reference declares no drivers");
        }
        let mut driver_ids = BTreeSet::new();
        for driver in &self.drivers {
            if !driver_ids.insert(driver.id.as_str()) {
                bail!("duplicate driver id '{}'", driver.id);
            }
        }
        let mut principle_ids = BTreeSet::new();
        for principle in &self.principles {
            if !principle_ids.insert(principle.id.as_str()) {
                bail!("duplicate principle id '{}'", principle.id);
            }
            if let Some(driver) = principle.driver.as_deref() {
                if !driver_ids.contains(driver) {
                    bail!(
                        "principle '{}' references unknown driver '{driver}'",
                        principle.id
                    );
                }
            }
        }
        Ok(())
    }
}
