//! Loading and saving parameter bundles.
//!
//! A persisted bundle holds the three distributions as nested rows. Any of
//! them may be missing; such a bundle loads, but it cannot become a model
//! until the caller supplies the missing pieces.

use hmmkit_core::{HmmError, Result};
use tracing::warn;

use crate::params::HmmParams;

/// A possibly incomplete parameter bundle.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialParams {
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub initial: Option<Vec<f64>>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub transition: Option<Vec<Vec<f64>>>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub emission: Option<Vec<Vec<f64>>>,
}

impl PartialParams {
    /// Complete bundle describing `params`.
    pub fn from_params(params: &HmmParams) -> Self {
        Self {
            initial: Some(params.initial().to_vec()),
            transition: Some(params.transition_rows()),
            emission: Some(params.emission().to_rows()),
        }
    }

    /// Names of the absent fields.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.initial.is_none() {
            out.push("initial");
        }
        if self.transition.is_none() {
            out.push("transition");
        }
        if self.emission.is_none() {
            out.push("emission");
        }
        out
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Validate and convert into model parameters.
    ///
    /// Every missing field is logged with its own warning before the
    /// configuration error is returned.
    pub fn into_params(self) -> Result<HmmParams> {
        let missing = self.missing();
        for field in &missing {
            warn!(field, "loaded parameters are missing a distribution; set it manually");
        }
        match (self.initial, self.transition, self.emission) {
            (Some(initial), Some(transition), Some(emission)) => HmmParams::from_rows(initial, &transition, &emission),
            _ => Err(HmmError::Configuration(format!(
                "parameter bundle is missing {}; complete it and pass the result to set_params()",
                missing.join(", ")
            ))),
        }
    }
}

/// Somewhere parameters can be read from and written to.
pub trait ParamStore {
    fn load(&self) -> Result<PartialParams>;
    fn save(&self, params: &HmmParams) -> Result<()>;
}

/// JSON file store.
#[cfg(feature = "serde")]
#[derive(Debug, Clone)]
pub struct JsonParamStore {
    path: std::path::PathBuf,
}

#[cfg(feature = "serde")]
impl JsonParamStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(feature = "serde")]
impl ParamStore for JsonParamStore {
    fn load(&self) -> Result<PartialParams> {
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content)
            .map_err(|e| HmmError::Serialization(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, params: &HmmParams) -> Result<()> {
        let json = serde_json::to_string_pretty(&PartialParams::from_params(params))
            .map_err(|e| HmmError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
