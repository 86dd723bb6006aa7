use crate::analytics::DetectorConfig;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::store::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default search locations for the configuration file
const CONFIG_PATHS: [&str; 3] = [
    "baseline.toml",
    "config/baseline.toml",
    "~/.config/baseline-rs/config.toml",
];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub storage: StorageConfig,
    pub detector: DetectorConfig,
    pub logging: LoggingConfig,
}

impl BaselineConfig {
    /// Load defaults, then the first config file found, then environment overrides.
    ///
    /// `BASELINE__STORAGE__BACKEND=mongodb` style variables override any key.
    /// `MONGO_URI`, `DB_NAME` and `COLLECTION_NAME` are honoured directly for
    /// existing deployments.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        settings = settings.add_source(
            config::Config::try_from(&BaselineConfig::default())
                .map_err(|e| Error::Config(e.to_string()))?,
        );

        match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                settings = settings.add_source(config::File::from(path));
            }
            None => {
                if let Some(path) = CONFIG_PATHS.iter().map(expand_home).find(|p| p.exists()) {
                    tracing::debug!("Reading configuration from {}", path.display());
                    settings = settings.add_source(config::File::from(path));
                }
            }
        }

        settings = settings.add_source(
            config::Environment::with_prefix("BASELINE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: BaselineConfig = settings
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Ok(uri) = std::env::var("MONGO_URI") {
            config.storage.mongodb.uri = uri;
        }
        if let Ok(database) = std::env::var("DB_NAME") {
            config.storage.mongodb.database = database;
        }
        if let Ok(collection) = std::env::var("COLLECTION_NAME") {
            config.storage.mongodb.collection = collection;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check thresholds and the selected backend's settings
    pub fn validate(&self) -> Result<()> {
        let detector = &self.detector;
        let thresholds = [
            ("detector.z_threshold", detector.z_threshold),
            ("detector.density_threshold", detector.density_threshold),
            ("detector.mahalanobis_threshold", detector.mahalanobis_threshold),
        ];
        for (name, value) in thresholds {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }

        self.storage
            .validate()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Annotated sample configuration
    pub fn sample_toml() -> Result<String> {
        let body = toml::to_string_pretty(&BaselineConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(format!(
            r#"# baseline-rs configuration
#
# Save as baseline.toml. Any key can be overridden from the environment,
# e.g. BASELINE__STORAGE__BACKEND=mongodb or BASELINE__DETECTOR__Z_THRESHOLD=4.
#
# storage.backend: memory | file | object | mongodb
# storage.object.access_token: bearer token for the object store (not shown)
# detector.mahalanobis_mode: query-pair | training-covariance

{}"#,
            body
        ))
    }
}

fn expand_home(path: &&str) -> std::path::PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::MahalanobisMode;
    use crate::store::StorageBackend;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BaselineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.z_threshold, 3.0);
        assert_eq!(config.detector.density_threshold, 0.01);
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[storage]
backend = "memory"

[detector]
z_threshold = 4.5
mahalanobis_mode = "training-covariance"
"#
        )
        .unwrap();

        let config = BaselineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.detector.z_threshold, 4.5);
        assert_eq!(
            config.detector.mahalanobis_mode,
            MahalanobisMode::TrainingCovariance
        );
        // untouched keys keep their defaults
        assert_eq!(config.detector.density_threshold, 0.01);
        assert_eq!(config.storage.timeout_seconds, 10);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = BaselineConfig::load(Some(Path::new("/nonexistent/baseline.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_non_positive_threshold() {
        let mut config = BaselineConfig::default();
        config.detector.density_threshold = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = BaselineConfig::sample_toml().unwrap();
        assert!(sample.contains("[storage]"));
        let parsed: BaselineConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.storage.backend, StorageBackend::File);
    }
}
