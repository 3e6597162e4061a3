use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Analysis configuration for one run
///
/// Loaded once per run and immutable afterwards. Every threshold the
/// pipeline consults lives here; `version_hash` stamps output records so a
/// classification is always auditable against the exact thresholds that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Sharp-peak detection thresholds
    pub peak: PeakSettings,

    /// Valley detection and backtracking thresholds
    pub valley: ValleySettings,

    /// Candidate deduplication
    pub merge: MergeSettings,

    /// Onset plateau adjustment
    pub onset: OnsetSettings,

    /// Interval extension
    pub extension: ExtensionSettings,

    /// Decay-curve fitting
    pub fit: FitSettings,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// Sharp-peak detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakSettings {
    /// Minimum prominence (bpm) for a local maximum to qualify
    pub min_prominence: f64,

    /// Minimum spacing between detected peaks, in seconds
    pub min_distance_seconds: u32,
}

/// Valley detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValleySettings {
    /// Minimum prominence (bpm) for a local minimum to qualify
    pub min_prominence: f64,

    /// Minimum spacing between detected valleys, in seconds
    pub min_distance_seconds: u32,

    /// How far before each valley to search for the recovery onset
    pub lookback_seconds: u32,

    /// Minimum peak-to-valley drop (bpm) for a backtracked candidate
    pub min_drop: f64,

    /// Prominence for local maxima inside the lookback window
    pub local_peak_prominence: f64,

    /// Spacing for local maxima inside the lookback window, in seconds
    pub local_peak_distance_seconds: u32,

    /// Subject resting heart rate used by the elevation guard
    pub resting_hr: f64,

    /// How far above resting HR a backtracked peak must sit
    pub min_elevation_above_rest: f64,
}

/// Candidate deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSettings {
    /// Candidates whose onsets are within this many seconds are duplicates
    pub dedup_tolerance_seconds: u32,
}

/// Onset adjustment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetSettings {
    /// Onset delays beyond this many seconds are flagged for review
    pub review_threshold_seconds: u32,
}

/// Interval extension settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionSettings {
    /// Maximum interval length, in seconds past the adjusted onset
    pub ceiling_seconds: u32,
}

/// Decay-fit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSettings {
    /// Lower bound for the decay time constant, in seconds
    pub tau_min_seconds: f64,

    /// Upper bound for the decay time constant, in seconds
    pub tau_max_seconds: f64,

    /// Sub-windows to fit, each with its own acceptance thresholds
    pub windows: Vec<FitWindowSpec>,
}

/// One named fit window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitWindowSpec {
    /// Window name used in records and reports
    pub name: String,

    /// Window start, seconds after the adjusted onset
    pub start_offset: u32,

    /// Window end, seconds after the adjusted onset
    pub end_offset: u32,

    /// Minimum acceptable R² for this window
    pub min_r_squared: f64,

    /// Minimum samples required to attempt a fit
    pub min_samples: usize,

    /// Whether a poor fit in this window can reject the interval
    pub required: bool,
}

impl FitWindowSpec {
    fn new(
        name: &str,
        start_offset: u32,
        end_offset: u32,
        min_r_squared: f64,
        min_samples: usize,
        required: bool,
    ) -> Self {
        FitWindowSpec {
            name: name.to_string(),
            start_offset,
            end_offset,
            min_r_squared,
            min_samples,
            required,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let now = Utc::now();

        AnalysisConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            peak: PeakSettings {
                min_prominence: 8.0,
                min_distance_seconds: 60,
            },
            valley: ValleySettings {
                min_prominence: 5.0,
                min_distance_seconds: 60,
                lookback_seconds: 120,
                min_drop: 10.0,
                local_peak_prominence: 3.0,
                local_peak_distance_seconds: 15,
                resting_hr: 60.0,
                min_elevation_above_rest: 40.0,
            },
            merge: MergeSettings {
                dedup_tolerance_seconds: 30,
            },
            onset: OnsetSettings {
                review_threshold_seconds: 15,
            },
            extension: ExtensionSettings {
                ceiling_seconds: 300,
            },
            fit: FitSettings {
                tau_min_seconds: 10.0,
                tau_max_seconds: 600.0,
                // Longer windows tolerate more noise
                windows: vec![
                    FitWindowSpec::new("0-30", 0, 30, 0.85, 5, true),
                    FitWindowSpec::new("30-60", 30, 60, 0.80, 5, true),
                    FitWindowSpec::new("30-90", 30, 90, 0.75, 8, true),
                    FitWindowSpec::new("full", 0, 300, 0.70, 20, false),
                ],
            },
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AnalysisConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hrrs")
            .join("config.toml")
    }

    /// Validate every threshold; any violation is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.peak.min_prominence <= 0.0 {
            bail!("peak.min_prominence must be positive");
        }
        if self.valley.min_prominence <= 0.0 {
            bail!("valley.min_prominence must be positive");
        }
        if self.valley.local_peak_prominence <= 0.0 {
            bail!("valley.local_peak_prominence must be positive");
        }
        if self.valley.lookback_seconds == 0 {
            bail!("valley.lookback_seconds must be positive");
        }
        if self.valley.min_drop <= 0.0 {
            bail!("valley.min_drop must be positive");
        }
        if !(20.0..=120.0).contains(&self.valley.resting_hr) {
            bail!(
                "valley.resting_hr must be within 20-120 bpm, got {}",
                self.valley.resting_hr
            );
        }
        if self.valley.min_elevation_above_rest < 0.0 {
            bail!("valley.min_elevation_above_rest must not be negative");
        }
        if self.extension.ceiling_seconds == 0 {
            bail!("extension.ceiling_seconds must be positive");
        }
        if self.fit.tau_min_seconds <= 0.0 || self.fit.tau_min_seconds >= self.fit.tau_max_seconds {
            bail!(
                "tau bounds must satisfy 0 < tau_min < tau_max, got {}..{}",
                self.fit.tau_min_seconds,
                self.fit.tau_max_seconds
            );
        }
        if self.fit.windows.is_empty() {
            bail!("fit.windows must not be empty");
        }
        if !self.fit.windows.iter().any(|w| w.required) {
            bail!("at least one fit window must be required");
        }

        let mut names = std::collections::HashSet::new();
        for window in &self.fit.windows {
            if !names.insert(window.name.as_str()) {
                bail!("duplicate fit window name: {}", window.name);
            }
            if window.start_offset >= window.end_offset {
                bail!(
                    "fit window '{}' must have start < end, got {}..{}",
                    window.name,
                    window.start_offset,
                    window.end_offset
                );
            }
            if window.end_offset > self.extension.ceiling_seconds {
                bail!(
                    "fit window '{}' extends past the extension ceiling ({}s)",
                    window.name,
                    self.extension.ceiling_seconds
                );
            }
            if !(0.0..=1.0).contains(&window.min_r_squared) {
                bail!(
                    "fit window '{}' min_r_squared must be within 0-1, got {}",
                    window.name,
                    window.min_r_squared
                );
            }
            if window.min_samples < 3 {
                bail!(
                    "fit window '{}' needs min_samples >= 3 for a two-parameter fit",
                    window.name
                );
            }
        }

        Ok(())
    }

    /// The fit window with the smallest start offset; its poor fits flag
    /// rather than reject when later windows pass.
    pub fn earliest_window(&self) -> Option<&FitWindowSpec> {
        self.fit
            .windows
            .iter()
            .min_by_key(|w| (w.start_offset, w.end_offset))
    }

    /// Stable hash over every threshold section (metadata excluded).
    ///
    /// Two configs that classify identically share a hash, so incremental
    /// runs can skip sessions already processed under the same thresholds.
    pub fn version_hash(&self) -> String {
        #[derive(Serialize)]
        struct Thresholds<'a> {
            peak: &'a PeakSettings,
            valley: &'a ValleySettings,
            merge: &'a MergeSettings,
            onset: &'a OnsetSettings,
            extension: &'a ExtensionSettings,
            fit: &'a FitSettings,
        }

        let canonical = toml::to_string(&Thresholds {
            peak: &self.peak,
            valley: &self.valley,
            merge: &self.merge,
            onset: &self.onset,
            extension: &self.extension,
            fit: &self.fit,
        })
        .expect("threshold sections serialize to TOML");

        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_validates() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn test_config_round_trip() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = AnalysisConfig::default();
        original.save_to_file(&config_path).unwrap();
        let loaded = AnalysisConfig::load_from_file(&config_path).unwrap();

        assert_eq!(loaded.peak.min_prominence, original.peak.min_prominence);
        assert_eq!(loaded.fit.windows.len(), original.fit.windows.len());
        assert_eq!(loaded.version_hash(), original.version_hash());
    }

    #[test]
    fn test_validation_rejects_bad_tau_bounds() {
        let mut config = AnalysisConfig::default();
        config.fit.tau_min_seconds = 500.0;
        config.fit.tau_max_seconds = 100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_window_past_ceiling() {
        let mut config = AnalysisConfig::default();
        config.fit.windows[0].end_offset = config.extension.ceiling_seconds + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_window_names() {
        let mut config = AnalysisConfig::default();
        let copy = config.fit.windows[0].clone();
        config.fit.windows.push(copy);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_version_hash_tracks_thresholds_only() {
        let mut a = AnalysisConfig::default();
        let b = AnalysisConfig::default();
        assert_eq!(a.version_hash(), b.version_hash());

        a.metadata.version = "2.0".to_string();
        assert_eq!(a.version_hash(), b.version_hash());

        a.peak.min_prominence = 12.0;
        assert_ne!(a.version_hash(), b.version_hash());
    }

    #[test]
    fn test_earliest_window() {
        let config = AnalysisConfig::default();
        assert_eq!(config.earliest_window().unwrap().name, "0-30");
    }
}
