use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::util::check_argument;

/// Construction options for a forest. The float precision is the type
/// parameter of the factory (`forest::<f32>` or `forest::<f64>`), everything
/// else lives here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestConfig {
    pub dimensions: usize,
    pub sample_size: usize,
    pub number_of_trees: usize,
    pub random_seed: u64,
    pub time_decay: f64,
    pub initial_accept_fraction: f64,
    pub bounding_box_cache_fraction: f64,
    pub store_sequence_indexes: bool,
    pub center_of_mass: bool,
    pub dedup_points: bool,
    pub parallel_enabled: bool,
    /// Minimum number of observations before queries return meaningful
    /// results; queries before that report zeros.
    pub output_after: usize,
}

impl ForestConfig {
    pub fn new(dimensions: usize) -> Self {
        let sample_size = 256;
        ForestConfig {
            dimensions,
            sample_size,
            number_of_trees: 50,
            random_seed: 42,
            time_decay: 0.0,
            initial_accept_fraction: 0.125,
            bounding_box_cache_fraction: 1.0,
            store_sequence_indexes: false,
            center_of_mass: false,
            dedup_points: false,
            parallel_enabled: false,
            output_after: sample_size / 4,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_argument(self.dimensions > 0, "dimensions must be positive")?;
        check_argument(self.sample_size > 1, "sample size must exceed one")?;
        check_argument(self.number_of_trees > 0, "need at least one tree")?;
        check_argument(self.time_decay >= 0.0, "time decay cannot be negative")?;
        check_argument(
            (0.0..=1.0).contains(&self.initial_accept_fraction),
            "initial accept fraction must lie in [0, 1]",
        )?;
        check_argument(
            (0.0..=1.0).contains(&self.bounding_box_cache_fraction),
            "cache fraction must lie in [0, 1]",
        )?;
        Ok(())
    }

    /// Shared-store sizing: every tree can pin `sample_size` distinct points
    /// plus the point in flight.
    pub fn point_store_capacity(&self) -> usize {
        (self.sample_size * self.number_of_trees + 1).max(2 * self.sample_size)
    }
}

/// Builder over [`ForestConfig`] in the usual option-at-a-time style.
pub struct ForestBuilder {
    config: ForestConfig,
}

impl ForestBuilder {
    pub fn new(dimensions: usize) -> Self {
        ForestBuilder {
            config: ForestConfig::new(dimensions),
        }
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.config.sample_size = sample_size;
        self.config.output_after = (sample_size / 4).max(1);
        self
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.config.number_of_trees = number_of_trees;
        self
    }

    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.config.random_seed = random_seed;
        self
    }

    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.config.time_decay = time_decay;
        self
    }

    pub fn initial_accept_fraction(mut self, fraction: f64) -> Self {
        self.config.initial_accept_fraction = fraction;
        self
    }

    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.config.bounding_box_cache_fraction = fraction;
        self
    }

    pub fn store_sequence_indexes(mut self, enabled: bool) -> Self {
        self.config.store_sequence_indexes = enabled;
        self
    }

    pub fn center_of_mass(mut self, enabled: bool) -> Self {
        self.config.center_of_mass = enabled;
        self
    }

    pub fn dedup_points(mut self, enabled: bool) -> Self {
        self.config.dedup_points = enabled;
        self
    }

    pub fn parallel_enabled(mut self, enabled: bool) -> Self {
        self.config.parallel_enabled = enabled;
        self
    }

    pub fn output_after(mut self, output_after: usize) -> Self {
        self.config.output_after = output_after;
        self
    }

    pub fn config(self) -> ForestConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_validate() {
        let config = ForestBuilder::new(3).config();
        config.validate().unwrap();
        assert_eq!(config.sample_size, 256);
        assert_eq!(config.output_after, 64);
    }

    #[test]
    fn out_of_range_options_rejected() {
        let mut config = ForestConfig::new(2);
        config.bounding_box_cache_fraction = 1.5;
        assert!(config.validate().is_err());
        let mut config = ForestConfig::new(2);
        config.time_decay = -0.1;
        assert!(config.validate().is_err());
        let config = ForestConfig::new(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn sample_size_refreshes_output_after() {
        let config = ForestBuilder::new(2).sample_size(64).config();
        assert_eq!(config.output_after, 16);
    }
}
