use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluation::RegularizationScope;
use crate::id_mapping::{BoundsPolicy, IdMapping};
use crate::matrix_factorization_sgd::{SgdParameters, TerminationPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Every setting of a training or cross-validation run. Values are fixed
/// once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub num_users: usize,
    pub num_items: usize,
    pub num_latent_features: usize,
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub accepted_squared_error: f64,
    pub lambda: f64,
    pub fold_count: usize,
    /// Seeds latent factor initialization. Unseeded runs draw from OS entropy.
    pub rng_seed: Option<u64>,
    pub error_check_interval: usize,
    pub termination_policy: TerminationPolicy,
    pub regularization_scope: RegularizationScope,
    pub bounds_policy: BoundsPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let sgd = SgdParameters::default();
        Config {
            num_users: 10,
            num_items: 10,
            num_latent_features: 2,
            learning_rate: sgd.learning_rate,
            max_epochs: sgd.max_epochs,
            accepted_squared_error: sgd.accepted_squared_error,
            lambda: sgd.lambda,
            fold_count: 5,
            rng_seed: None,
            error_check_interval: sgd.error_check_interval,
            termination_policy: sgd.termination_policy,
            regularization_scope: sgd.regularization_scope,
            bounds_policy: BoundsPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks the settings shared by training and cross-validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("num_users", self.num_users)?;
        positive("num_items", self.num_items)?;
        positive("num_latent_features", self.num_latent_features)?;
        positive("max_epochs", self.max_epochs)?;
        positive("error_check_interval", self.error_check_interval)?;
        non_negative("learning_rate", self.learning_rate)?;
        non_negative("lambda", self.lambda)?;
        non_negative("accepted_squared_error", self.accepted_squared_error)?;
        Ok(())
    }

    pub fn validate_for_cross_validation(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.fold_count < 2 {
            return Err(ConfigError::Invalid {
                field: "fold_count",
                reason: format!("need at least 2 folds, got {}", self.fold_count),
            });
        }
        Ok(())
    }

    pub fn sgd_parameters(&self) -> SgdParameters {
        SgdParameters {
            learning_rate: self.learning_rate,
            lambda: self.lambda,
            max_epochs: self.max_epochs,
            accepted_squared_error: self.accepted_squared_error,
            error_check_interval: self.error_check_interval,
            termination_policy: self.termination_policy,
            regularization_scope: self.regularization_scope,
        }
    }

    pub fn id_mapping(&self) -> IdMapping {
        IdMapping::new(self.num_users, self.num_items, self.bounds_policy)
    }
}

fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be a finite, non-negative number, got {}", value),
        });
    }
    Ok(())
}
