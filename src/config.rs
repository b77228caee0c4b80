//! §6 configuration surface: every tunable the core and its ambient CLI
//! layer expose, plus the §7 validation policy.

use serde::{Deserialize, Serialize};

use crate::error::{HerculesError, Result};

fn default_granularity() -> u32 {
    30
}

fn default_sampling() -> u32 {
    30
}

fn default_similarity_threshold() -> u8 {
    90
}

/// Mirrors the table in spec.md §6. Deserializable from a TOML config
/// file (the teacher loads no such file today, but its `clap` flag
/// conventions make a config layer idiomatic to add); `clap` flags in
/// `main.rs` override whatever a loaded file set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Band width in days.
    pub granularity: u32,
    /// Sample stride in days; must not exceed `granularity`.
    pub sampling: u32,
    /// Enable per-file histories and the per-file private counter.
    pub track_files: bool,
    /// Number of tracked authors; `0` disables people tracking.
    pub people_number: u32,
    /// Validate file models after every mutation.
    pub debug: bool,
    /// Rename-detection similarity threshold percentage, `0..=100`.
    pub similarity_threshold: u8,
    /// Substitute dummy blobs for missing submodule objects.
    pub ignore_missing_submodules: bool,
    /// Skip semantic cleanup of the line-diff edit script.
    pub diff_cleanup_disabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
            sampling: default_sampling(),
            track_files: false,
            people_number: 0,
            debug: false,
            similarity_threshold: default_similarity_threshold(),
            ignore_missing_submodules: false,
            diff_cleanup_disabled: false,
        }
    }
}

impl Config {
    /// Applies the §7 policy: non-positive granularity/sampling reset to
    /// default with a warning (recoverable); an out-of-range similarity
    /// threshold is fatal; `sampling` may not exceed `granularity`.
    pub fn validate(&mut self) -> Result<()> {
        if self.granularity == 0 {
            log::warn!("granularity must be positive, resetting to default ({})", default_granularity());
            self.granularity = default_granularity();
        }
        if self.sampling == 0 {
            log::warn!("sampling must be positive, resetting to default ({})", default_sampling());
            self.sampling = default_sampling();
        }
        if self.sampling > self.granularity {
            log::warn!(
                "sampling ({}) exceeds granularity ({}), clamping sampling to granularity",
                self.sampling,
                self.granularity
            );
            self.sampling = self.granularity;
        }
        if self.similarity_threshold > 100 {
            return Err(HerculesError::Config(format!(
                "similarity_threshold must be in [0, 100], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    pub fn people_enabled(&self) -> bool {
        self.people_number > 0
    }

    /// Loads a base configuration from a TOML file; fields the file
    /// omits keep their `#[serde(default)]` value. `main.rs` layers
    /// `clap` flags on top of whatever this returns, the way the
    /// teacher's flag conventions make idiomatic to add even though
    /// `cochange-tool` itself never loaded a config file.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| HerculesError::Config(format!("invalid config file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.granularity, 30);
        assert_eq!(cfg.sampling, 30);
        assert!(!cfg.track_files);
        assert_eq!(cfg.people_number, 0);
        assert!(!cfg.debug);
        assert_eq!(cfg.similarity_threshold, 90);
        assert!(!cfg.ignore_missing_submodules);
        assert!(!cfg.diff_cleanup_disabled);
    }

    #[test]
    fn non_positive_granularity_resets_with_warning() {
        let mut cfg = Config { granularity: 0, ..Config::default() };
        cfg.validate().unwrap();
        assert_eq!(cfg.granularity, 30);
    }

    #[test]
    fn sampling_above_granularity_clamps() {
        let mut cfg = Config { granularity: 10, sampling: 20, ..Config::default() };
        cfg.validate().unwrap();
        assert_eq!(cfg.sampling, 10);
    }

    #[test]
    fn out_of_range_similarity_threshold_is_fatal() {
        let mut cfg = Config { similarity_threshold: 101, ..Config::default() };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, HerculesError::Config(_)));
    }

    #[test]
    fn toml_file_overrides_only_the_fields_it_sets() {
        let cfg = Config::from_toml_str("granularity = 7\ntrack_files = true\n").unwrap();
        assert_eq!(cfg.granularity, 7);
        assert!(cfg.track_files);
        assert_eq!(cfg.sampling, 30, "omitted field keeps its default");
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = Config::from_toml_str("granularity = \"not a number\"").unwrap_err();
        assert!(matches!(err, HerculesError::Config(_)));
    }
}
