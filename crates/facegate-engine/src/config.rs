use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_SOURCE: &str = "0";
const DEFAULT_SAMPLE_TARGET: usize = 20;
const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 70.0;
const DEFAULT_MIN_FACE_SIZE: u32 = 40;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration: defaults, then an optional TOML file, then
/// `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base directory for everything facegate persists.
    pub data_dir: PathBuf,
    /// Dataset root (default: `<data_dir>/data`).
    pub dataset_dir: Option<PathBuf>,
    /// Trained model artifact (default: `<data_dir>/trained_model.json`).
    pub model_path: Option<PathBuf>,
    /// Access log CSV (default: `<data_dir>/access_log.csv`).
    pub access_log_path: Option<PathBuf>,
    /// SeetaFace cascade (default: `<data_dir>/seeta_fd_frontal_v1.0.bin`).
    pub detector_model_path: Option<PathBuf>,
    /// Video source descriptor: device index, `/dev/videoN`, or `dir:<path>`.
    pub source: String,
    /// Samples captured per enrollment.
    pub sample_target: usize,
    /// Classifier distance below which a face is accepted.
    pub acceptance_threshold: f64,
    /// Smallest face, in pixels, the detector looks for.
    pub min_face_size: u32,
    /// Frames discarded after opening a camera.
    pub warmup_frames: usize,
    /// Retrain the model after an enrollment completes.
    pub train_after_enroll: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dataset_dir: None,
            model_path: None,
            access_log_path: None,
            detector_model_path: None,
            source: DEFAULT_SOURCE.to_string(),
            sample_target: DEFAULT_SAMPLE_TARGET,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            warmup_frames: 0,
            train_after_enroll: true,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus the process
    /// environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FACEGATE_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FACEGATE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_DATASET_DIR") {
            self.dataset_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEGATE_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEGATE_ACCESS_LOG") {
            self.access_log_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEGATE_DETECTOR_MODEL") {
            self.detector_model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEGATE_SOURCE") {
            self.source = v;
        }
        env_parse(&lookup, "FACEGATE_SAMPLE_TARGET", &mut self.sample_target)?;
        env_parse(&lookup, "FACEGATE_THRESHOLD", &mut self.acceptance_threshold)?;
        env_parse(&lookup, "FACEGATE_MIN_FACE_SIZE", &mut self.min_face_size)?;
        env_parse(&lookup, "FACEGATE_WARMUP_FRAMES", &mut self.warmup_frames)?;
        if let Some(v) = lookup("FACEGATE_TRAIN_AFTER_ENROLL") {
            self.train_after_enroll = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_target == 0 {
            return Err(ConfigError::Invalid("sample_target must be at least 1".into()));
        }
        if !self.acceptance_threshold.is_finite() || self.acceptance_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "acceptance_threshold must be a positive number, got {}",
                self.acceptance_threshold
            )));
        }
        if self.source.trim().is_empty() {
            return Err(ConfigError::Invalid("source must not be empty".into()));
        }
        Ok(())
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.dataset_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("data"))
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("trained_model.json"))
    }

    pub fn access_log_path(&self) -> PathBuf {
        self.access_log_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("access_log.csv"))
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.detector_model_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("seeta_fd_frontal_v1.0.bin"))
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key, value })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config {
            data_dir: PathBuf::from("/srv/facegate"),
            ..Config::default()
        };
        assert_eq!(config.sample_target, 20);
        assert_eq!(config.acceptance_threshold, 70.0);
        assert_eq!(config.dataset_dir(), PathBuf::from("/srv/facegate/data"));
        assert_eq!(config.model_path(), PathBuf::from("/srv/facegate/trained_model.json"));
        assert_eq!(config.access_log_path(), PathBuf::from("/srv/facegate/access_log.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("FACEGATE_DATA_DIR", "/var/lib/facegate"),
                ("FACEGATE_SAMPLE_TARGET", "5"),
                ("FACEGATE_THRESHOLD", "55.5"),
                ("FACEGATE_SOURCE", "dir:/tmp/frames"),
                ("FACEGATE_TRAIN_AFTER_ENROLL", "0"),
            ]))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/facegate"));
        assert_eq!(config.sample_target, 5);
        assert_eq!(config.acceptance_threshold, 55.5);
        assert_eq!(config.source, "dir:/tmp/frames");
        assert!(!config.train_after_enroll);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("FACEGATE_SAMPLE_TARGET", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "FACEGATE_SAMPLE_TARGET", .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = Config {
            sample_target: 0,
            ..Config::default()
        };
        assert!(zero.validate().is_err());

        let negative = Config {
            acceptance_threshold: -1.0,
            ..Config::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("facegate.toml");
        std::fs::write(
            &path,
            "data_dir = \"/opt/fg\"\nsample_target = 30\nmodel_path = \"/opt/models/m.json\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sample_target, 30);
        assert_eq!(config.model_path(), PathBuf::from("/opt/models/m.json"));
        assert_eq!(config.dataset_dir(), PathBuf::from("/opt/fg/data"));
        assert_eq!(config.acceptance_threshold, 70.0);
    }

    #[test]
    fn test_from_file_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("facegate.toml");
        std::fs::write(&path, "treshold = 10\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }
}
