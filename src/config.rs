//! Configuration loading.
//!
//! | Source                                  | Example                                    |
//! |-----------------------------------------|--------------------------------------------|
//! | TOML file (optional)                    | `[tree]\nmax_depth = 10`                   |
//! | `PERCEPTION__<SECTION>__<KEY>` env vars | `PERCEPTION__INTERPOLATOR__PERIOD_MS=50`   |
//!
//! Later sources override earlier ones; anything unset keeps the defaults in
//! [`PerceptionConfig::default`].

use crate::error::{PerceptionError, Result};
use crate::types::PerceptionConfig;
use config::{Config, Environment, File};
use std::path::Path;

impl PerceptionConfig {
    /// Layer defaults, an optional TOML file and the environment, then
    /// validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let loaded: PerceptionConfig = builder
            .add_source(
                Environment::with_prefix("PERCEPTION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tree.bounds.is_valid() {
            return Err(PerceptionError::InvalidConfig(format!(
                "tree.bounds {} is inverted",
                self.tree.bounds
            )));
        }
        if self.tree.max_elements_per_leaf == 0 {
            return Err(PerceptionError::InvalidConfig(
                "tree.max_elements_per_leaf must be at least 1".into(),
            ));
        }
        if self.perceiver.update_threshold < 0.0 {
            return Err(PerceptionError::InvalidConfig(
                "perceiver.update_threshold must not be negative".into(),
            ));
        }
        if self.interpolator.period_ms == 0 {
            return Err(PerceptionError::InvalidConfig(
                "interpolator.period_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
