//! Rule and medication definition files.
//!
//! Both files are TOML. Parsing is strict: an entry that fails validation
//! fails the whole load instead of surfacing later during a decision.
//!
//! ```toml
//! [[constraints]]
//! type = "drug_interaction"
//! drug_a = "levothyroxine"
//! drug_b = "calcium_supplement"
//! min_gap = "4h"
//! description = "Take 4 hours apart from calcium"
//!
//! [[medications]]
//! id = "levothyroxine"
//! name = "Levothyroxine"
//! food = "empty_stomach"
//! dose_times = ["06:00"]
//! ```

use crate::catalog::build_default_reference;
use crate::config::DataConfig;
use crate::{Constraint, Error, Medication, ReferenceData, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A file of `[[constraints]]`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleFile {
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl RuleFile {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Invalid rule file: {}", e)))?;
        for constraint in &file.constraints {
            constraint.validate()?;
        }
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file = Self::from_toml_str(&contents)?;
        tracing::info!(
            "Loaded {} constraints from {:?}",
            file.constraints.len(),
            path
        );
        Ok(file)
    }

    /// Serialize with durations normalised to their largest whole unit
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

/// A file of `[[medications]]`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicationFile {
    #[serde(default)]
    pub medications: Vec<Medication>,
}

impl MedicationFile {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut file: MedicationFile = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Invalid medication file: {}", e)))?;

        let mut seen = HashSet::new();
        for med in &mut file.medications {
            if med.id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "medication '{}' has an empty id",
                    med.name
                )));
            }
            if !seen.insert(med.id.to_ascii_lowercase()) {
                return Err(Error::Config(format!("duplicate medication id '{}'", med.id)));
            }
            med.dose_times.sort();
        }
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file = Self::from_toml_str(&contents)?;
        tracing::info!(
            "Loaded {} medications from {:?}",
            file.medications.len(),
            path
        );
        Ok(file)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

/// Load reference data from the configured files
///
/// A missing path falls back to the built-in catalog for that half. The
/// combined set is validated, so a rule naming an unknown medication fails here.
pub fn load_reference(config: &DataConfig) -> Result<ReferenceData> {
    if config.medications_path.is_none() && config.rules_path.is_none() {
        tracing::debug!("No definition files configured, using built-in catalog");
        return Ok(build_default_reference());
    }

    let builtin = build_default_reference();
    let medications = match &config.medications_path {
        Some(path) => MedicationFile::load(path)?.medications,
        None => builtin.medications().to_vec(),
    };
    let constraints = match &config.rules_path {
        Some(path) => RuleFile::load(path)?.constraints,
        None => builtin.constraints().to_vec(),
    };

    ReferenceData::new(medications, constraints)
}
