use crate::constants;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub oracle: OracleConfig,
    pub resolver: ResolverConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/concerts.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    pub requests_per_min: u64,
    /// Tokens available after an idle period. 1 keeps calls at least 60/rpm seconds apart.
    pub burst: u64,
    pub timeout_seconds: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: constants::GEMINI_API_URL.to_string(),
            model: constants::DEFAULT_MODEL.to_string(),
            requests_per_min: constants::ORACLE_REQUESTS_PER_MIN,
            burst: 1,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub similarity_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: constants::SIMILARITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.oracle.requests_per_min == 0 {
            return Err(PipelineError::Config(
                "oracle.requests_per_min must be greater than zero".to_string(),
            ));
        }
        if self.oracle.burst == 0 {
            return Err(PipelineError::Config(
                "oracle.burst must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.resolver.similarity_threshold) {
            return Err(PipelineError::Config(format!(
                "resolver.similarity_threshold must be within [0, 1], got {}",
                self.resolver.similarity_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[resolver]\nsimilarity_threshold = 0.75").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.resolver.similarity_threshold, 0.75);
        assert_eq!(config.oracle.requests_per_min, 15);
        assert_eq!(config.oracle.burst, 1);
        assert_eq!(config.database.path, "data/concerts.db");
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[resolver]\nsimilarity_threshold = 1.5").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
