use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    AGE_0_5, BIO_AGE_5_17, DEFAULT_BIOMETRIC_DIR, DEFAULT_DEMOGRAPHIC_DIR, DEFAULT_ENROLMENT_DIR,
    DEFAULT_OUTPUT_PATH, DEMO_AGE_5_17,
};
use crate::error::{PipelineError, Result};
use crate::types::DatasetKind;

/// Complete configuration for one pipeline run. Passed explicitly into every
/// entry point; nothing is read from process-wide state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inputs: InputsConfig,
    pub output: OutputConfig,
    pub cleaning: CleaningConfig,
    pub scoring: ScoringConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    pub enrolment_dir: PathBuf,
    pub demographic_dir: PathBuf,
    pub biometric_dir: PathBuf,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            enrolment_dir: PathBuf::from(DEFAULT_ENROLMENT_DIR),
            demographic_dir: PathBuf::from(DEFAULT_DEMOGRAPHIC_DIR),
            biometric_dir: PathBuf::from(DEFAULT_BIOMETRIC_DIR),
        }
    }
}

impl InputsConfig {
    pub fn dir_for(&self, kind: DatasetKind) -> &Path {
        match kind {
            DatasetKind::Enrolment => &self.enrolment_dir,
            DatasetKind::Demographic => &self.demographic_dir,
            DatasetKind::Biometric => &self.biometric_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Destination of the merged (and optionally scored) table
    pub path: PathBuf,
    /// Optional destination of the district-level score table
    pub district_scores_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            district_scores_path: None,
        }
    }
}

/// How region names are matched after trimming
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionNormalization {
    /// Trim only; case and spelling are preserved
    #[default]
    Exact,
    /// Map known state spelling variants to one canonical name
    Canonical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Resolve ambiguous `dd/mm` vs `mm/dd` dates toward day-first
    pub day_first: bool,
    pub region_normalization: RegionNormalization,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            day_first: true,
            region_normalization: RegionNormalization::Exact,
        }
    }
}

/// Relative weights of the three BIS components. They need not sum to one;
/// the score is renormalized against the weights actually in play.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// w1, applied to the normalized capture gap
    pub bcg: f64,
    /// w2, applied to `1 - BUR`
    pub utilization: f64,
    /// w3, applied to `FAFI_rate`
    pub failure: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            bcg: 1.0,
            utilization: 1.0,
            failure: 1.0,
        }
    }
}

impl ScoringWeights {
    pub fn as_array(&self) -> [f64; 3] {
        [self.bcg, self.utilization, self.failure]
    }
}

/// Which merged measures feed the metric engine, addressed by source and
/// original measure name so that collision suffixes never break the lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricColumns {
    /// Enrolment measure used as `Enrol_0_5`
    pub enrol_0_5: String,
    /// Biometric measure used as `Bio_5_17`
    pub bio_5_17: String,
    /// Demographic measure used as `Demo_5_17`
    pub demo_5_17: String,
}

impl Default for MetricColumns {
    fn default() -> Self {
        Self {
            enrol_0_5: AGE_0_5.to_string(),
            bio_5_17: BIO_AGE_5_17.to_string(),
            demo_5_17: DEMO_AGE_5_17.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Append derived metric columns to the output
    pub enabled: bool,
    pub weights: ScoringWeights,
    /// Fixed BCG reference range; kept constant so scores compare across runs
    pub bcg_floor: f64,
    pub bcg_ceiling: f64,
    /// Lowest BIS classified as `Emerging`
    pub emerging_threshold: f64,
    /// Lowest BIS classified as `Hotspot`
    pub hotspot_threshold: f64,
    pub columns: MetricColumns,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weights: ScoringWeights::default(),
            bcg_floor: 0.0,
            bcg_ceiling: 100.0,
            emerging_threshold: 30.0,
            hotspot_threshold: 60.0,
            columns: MetricColumns::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = self.weights.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PipelineError::Config(format!(
                "scoring weights must be finite and non-negative, got {:?}",
                weights
            )));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(PipelineError::Config(
                "at least one scoring weight must be positive".to_string(),
            ));
        }
        if !self.bcg_floor.is_finite()
            || !self.bcg_ceiling.is_finite()
            || self.bcg_ceiling <= self.bcg_floor
        {
            return Err(PipelineError::Config(format!(
                "bcg_ceiling ({}) must be greater than bcg_floor ({})",
                self.bcg_ceiling, self.bcg_floor
            )));
        }
        let (emerging, hotspot) = (self.emerging_threshold, self.hotspot_threshold);
        if !(0.0..=100.0).contains(&emerging)
            || !(0.0..=100.0).contains(&hotspot)
            || emerging > hotspot
        {
            return Err(PipelineError::Config(format!(
                "tier thresholds must satisfy 0 <= emerging ({}) <= hotspot ({}) <= 100",
                emerging, hotspot
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Load and clean the three datasets concurrently
    pub parallel_clean: bool,
}

impl Config {
    /// Load configuration from a TOML file. Missing sections fall back to
    /// their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_published_layout() {
        let config = Config::default();
        assert_eq!(config.inputs.enrolment_dir, PathBuf::from("api_data_aadhar_enrolment"));
        assert_eq!(config.output.path, PathBuf::from("merged_aadhaar_data.csv"));
        assert!(config.cleaning.day_first);
        assert_eq!(config.cleaning.region_normalization, RegionNormalization::Exact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[inputs]
enrolment_dir = "data/enrol"

[cleaning]
region_normalization = "canonical"

[scoring.weights]
bcg = 2.0
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.inputs.enrolment_dir, PathBuf::from("data/enrol"));
        assert_eq!(config.inputs.biometric_dir, PathBuf::from("api_data_aadhar_biometric"));
        assert_eq!(config.cleaning.region_normalization, RegionNormalization::Canonical);
        assert_eq!(config.scoring.weights.bcg, 2.0);
        assert_eq!(config.scoring.weights.failure, 1.0);
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("pipeline.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = Config::default();
        config.scoring.weights.utilization = -1.0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_all_zero_weights() {
        let mut config = Config::default();
        config.scoring.weights = ScoringWeights {
            bcg: 0.0,
            utilization: 0.0,
            failure: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.scoring.emerging_threshold = 70.0;
        config.scoring.hotspot_threshold = 60.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
