// SPDX-License-Identifier: GPL-3.0-or-later
//! Configuration shapes for the background-subtraction and entity-analysis
//! core. These are plain `serde::Deserialize` structs with documented
//! defaults; this crate never parses a configuration file itself, a
//! surrounding tool owns that and hands the core a validated record.
use serde::Deserialize;

use crate::error::{Error, Result};

/// Configuration for a [`crate::gmm::GaussianModel`].
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
pub struct GmmConfig {
    /// Components per mixture, 1..=10.
    #[serde(default = "GmmConfig::default_k")]
    pub k: u8,
    /// Background-mass cutoff, 0.0..=1.0.
    #[serde(default = "GmmConfig::default_t")]
    pub t: f32,
    /// Learning rate, 0.0..=1.0.
    #[serde(default = "GmmConfig::default_alpha")]
    pub alpha: f32,
    /// Initial per-component variance, 0..=255.
    #[serde(default = "GmmConfig::default_init_variance")]
    pub init_variance: f32,
    /// Minimum per-component variance, 0..=255.
    #[serde(default = "GmmConfig::default_min_variance")]
    pub min_variance: f32,
}

impl GmmConfig {
    const fn default_k() -> u8 {
        5
    }

    const fn default_t() -> f32 {
        0.7
    }

    const fn default_alpha() -> f32 {
        0.01
    }

    const fn default_init_variance() -> f32 {
        36.0
    }

    const fn default_min_variance() -> f32 {
        4.0
    }

    /// Reject any field outside its documented range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.k) {
            return Err(Error::InvalidConfiguration {
                field: "gmm.K",
                value: self.k.to_string(),
                reason: "must be in 1..=10",
            });
        }
        if !(0.0..=1.0).contains(&self.t) {
            return Err(Error::InvalidConfiguration {
                field: "gmm.T",
                value: self.t.to_string(),
                reason: "must be in 0.0..=1.0",
            });
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Error::InvalidConfiguration {
                field: "gmm.alpha",
                value: self.alpha.to_string(),
                reason: "must be in 0.0..=1.0",
            });
        }
        if !(0.0..=255.0).contains(&self.init_variance) {
            return Err(Error::InvalidConfiguration {
                field: "gmm.initVariance",
                value: self.init_variance.to_string(),
                reason: "must be in 0..=255",
            });
        }
        if !(0.0..=255.0).contains(&self.min_variance) {
            return Err(Error::InvalidConfiguration {
                field: "gmm.minVariance",
                value: self.min_variance.to_string(),
                reason: "must be in 0..=255",
            });
        }
        Ok(())
    }

    /// `1.5 * initVariance`, the variance assigned to a freshly inserted
    /// component.
    pub fn new_component_variance(&self) -> f32 {
        1.5 * self.init_variance
    }
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            k: Self::default_k(),
            t: Self::default_t(),
            alpha: Self::default_alpha(),
            init_variance: Self::default_init_variance(),
            min_variance: Self::default_min_variance(),
        }
    }
}

/// Configuration for a [`crate::median::MedianModel`].
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
pub struct MedianConfig {
    /// Ring capacity, 1..=255.
    #[serde(default = "MedianConfig::default_n")]
    pub n: u8,
    /// Byte-wise segmentation threshold, 0..=255.
    #[serde(default = "MedianConfig::default_pixel_change_threshold")]
    pub pixel_change_threshold: u8,
}

impl MedianConfig {
    const fn default_n() -> u8 {
        10
    }

    const fn default_pixel_change_threshold() -> u8 {
        25
    }

    pub fn validate(&self) -> Result<()> {
        if self.n < 1 {
            return Err(Error::InvalidConfiguration {
                field: "median.N",
                value: self.n.to_string(),
                reason: "must be in 1..=255",
            });
        }
        Ok(())
    }
}

impl Default for MedianConfig {
    fn default() -> Self {
        Self {
            n: Self::default_n(),
            pixel_change_threshold: Self::default_pixel_change_threshold(),
        }
    }
}

/// Six bounds on an [`crate::entity::Entity`]'s geometry; any bound set to
/// `-1` disables that check.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
pub struct EntityFilterConfig {
    #[serde(default = "EntityFilterConfig::default_disabled")]
    pub min_mass: i64,
    #[serde(default = "EntityFilterConfig::default_disabled")]
    pub max_mass: i64,
    #[serde(default = "EntityFilterConfig::default_disabled")]
    pub min_width: i64,
    #[serde(default = "EntityFilterConfig::default_disabled")]
    pub max_width: i64,
    #[serde(default = "EntityFilterConfig::default_disabled")]
    pub min_height: i64,
    #[serde(default = "EntityFilterConfig::default_disabled")]
    pub max_height: i64,
    /// Whether the filter is applied at all.
    #[serde(default = "EntityFilterConfig::default_enabled")]
    pub entity_filtering_enabled: bool,
}

impl EntityFilterConfig {
    const fn default_disabled() -> i64 {
        -1
    }

    const fn default_enabled() -> bool {
        true
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("entityFilter.minMass", self.min_mass),
            ("entityFilter.maxMass", self.max_mass),
            ("entityFilter.minWidth", self.min_width),
            ("entityFilter.maxWidth", self.max_width),
            ("entityFilter.minHeight", self.min_height),
            ("entityFilter.maxHeight", self.max_height),
        ] {
            if value < -1 {
                return Err(Error::InvalidConfiguration {
                    field,
                    value: value.to_string(),
                    reason: "must be >= -1 (-1 disables the check)",
                });
            }
        }
        Ok(())
    }
}

impl Default for EntityFilterConfig {
    fn default() -> Self {
        Self {
            min_mass: Self::default_disabled(),
            max_mass: Self::default_disabled(),
            min_width: Self::default_disabled(),
            max_width: Self::default_disabled(),
            min_height: Self::default_disabled(),
            max_height: Self::default_disabled(),
            entity_filtering_enabled: Self::default_enabled(),
        }
    }
}

/// The full configuration record consumed by the pipeline: one group per
/// component, plus the change-fraction threshold that decides whether the
/// proportion of foreground pixels is large enough to report as motion.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub gmm: GmmConfig,
    #[serde(default)]
    pub median: MedianConfig,
    #[serde(default)]
    pub entity_filter: EntityFilterConfig,
    /// Event threshold on foreground fraction, 0.0..=1.0.
    #[serde(default = "PipelineConfig::default_change_percent_threshold")]
    pub change_percent_threshold: f32,
}

impl PipelineConfig {
    const fn default_change_percent_threshold() -> f32 {
        0.02
    }

    pub fn validate(&self) -> Result<()> {
        self.gmm.validate()?;
        self.median.validate()?;
        self.entity_filter.validate()?;
        if !(0.0..=1.0).contains(&self.change_percent_threshold) {
            return Err(Error::InvalidConfiguration {
                field: "changePercentThreshold",
                value: self.change_percent_threshold.to_string(),
                reason: "must be in 0.0..=1.0",
            });
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gmm: GmmConfig::default(),
            median: MedianConfig::default(),
            entity_filter: EntityFilterConfig::default(),
            change_percent_threshold: Self::default_change_percent_threshold(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GmmConfig::default().validate().is_ok());
        assert!(MedianConfig::default().validate().is_ok());
        assert!(EntityFilterConfig::default().validate().is_ok());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn gmm_k_out_of_range_is_rejected() {
        let mut config = GmmConfig::default();
        config.k = 0;
        assert!(config.validate().is_err());
        config.k = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn entity_filter_rejects_values_below_negative_one() {
        let mut config = EntityFilterConfig::default();
        config.min_mass = -2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_config_parses_from_toml() {
        let text = r#"
            change_percent_threshold = 0.1

            [gmm]
            k = 3
            t = 0.5
            alpha = 0.02
            init_variance = 20.0
            min_variance = 2.0

            [median]
            n = 5
            pixel_change_threshold = 30

            [entity_filter]
            min_mass = 10
        "#;
        let config: PipelineConfig = toml::from_str(text).unwrap();
        assert_eq!(config.gmm.k, 3);
        assert_eq!(config.median.n, 5);
        assert_eq!(config.entity_filter.min_mass, 10);
        assert_eq!(config.entity_filter.max_mass, -1);
        config.validate().unwrap();
    }

    #[test]
    fn new_component_variance_is_one_and_a_half_times_init_variance() {
        let config = GmmConfig {
            init_variance: 10.0,
            ..GmmConfig::default()
        };
        assert_eq!(config.new_component_variance(), 15.0);
    }
}
