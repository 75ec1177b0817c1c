//! Configuration management for the dialogue state tracker.

use serde::{Deserialize, Serialize};

use crate::error::{DstError, DstResult};
use crate::operation::OpSetKind;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TrackerConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order:
    /// 1. config/default.toml (base settings)
    /// 2. config/{DST_ENV}.toml (environment-specific)
    /// 3. Environment variables with DST_ prefix
    pub fn load() -> DstResult<Self> {
        let env = std::env::var("DST_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("DST").separator("__"));

        let config: TrackerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> DstResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DstError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: TrackerConfig = toml::from_str(&content)
            .map_err(|e| DstError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> DstResult<()> {
        let model = &self.model;
        if model.hidden_size == 0 {
            return Err(DstError::ConfigError(
                "model.hidden_size must be greater than 0".into(),
            ));
        }
        if model.vocab_size == 0 {
            return Err(DstError::ConfigError(
                "model.vocab_size must be greater than 0".into(),
            ));
        }
        if model.max_seq_length == 0 {
            return Err(DstError::ConfigError(
                "model.max_seq_length must be greater than 0".into(),
            ));
        }
        if model.n_domain == 0 {
            return Err(DstError::ConfigError(
                "model.n_domain must be greater than 0".into(),
            ));
        }

        let decoder = &self.decoder;
        if decoder.max_value == 0 {
            return Err(DstError::ConfigError(
                "decoder.max_value must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&decoder.teacher_forcing_ratio) {
            return Err(DstError::ConfigError(format!(
                "decoder.teacher_forcing_ratio must be in [0, 1], got {}",
                decoder.teacher_forcing_ratio
            )));
        }
        for (name, id) in [("pad_id", decoder.pad_id), ("eos_id", decoder.eos_id)] {
            if id as usize >= model.vocab_size {
                return Err(DstError::ConfigError(format!(
                    "decoder.{} {} is outside the vocabulary ({} ids)",
                    name, id, model.vocab_size
                )));
            }
        }

        if self.updater.dontcare_value.is_empty() {
            return Err(DstError::ConfigError(
                "updater.dontcare_value must not be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Shapes of the learned components.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    pub hidden_size: usize,
    pub vocab_size: usize,
    pub max_seq_length: usize,
    pub n_domain: usize,
    pub op_set: OpSetKind,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 768,
            vocab_size: 35_003,
            max_seq_length: 512,
            n_domain: 5,
            op_set: OpSetKind::Four,
        }
    }
}

/// Special ids, generation length and teacher forcing for value generation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub pad_id: u32,
    pub eos_id: u32,
    /// Generation steps per update slot at inference.
    pub max_value: usize,
    /// Probability that a training batch decodes with gold inputs.
    pub teacher_forcing_ratio: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            pad_id: 0,
            eos_id: 3,
            max_value: 9,
            teacher_forcing_ratio: 0.5,
        }
    }
}

/// Values written by the belief-state updater.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdaterConfig {
    /// Sentinel stored for DONTCARE.
    pub dontcare_value: String,
    /// Generated value meaning "no value"; an UPDATE producing it clears the slot.
    pub null_value: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            dontcare_value: "don't care".to_string(),
            null_value: "[NULL]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        TrackerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_hidden_size() {
        let mut config = TrackerConfig::default();
        config.model.hidden_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_ratio_out_of_range() {
        let mut config = TrackerConfig::default();
        config.decoder.teacher_forcing_ratio = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("teacher_forcing_ratio"));
    }

    #[test]
    fn test_rejects_pad_outside_vocab() {
        let mut config = TrackerConfig::default();
        config.model.vocab_size = 2;
        config.decoder.eos_id = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");
        std::fs::write(
            &path,
            r#"
[model]
hidden_size = 16
vocab_size = 64
max_seq_length = 32
n_domain = 3
op_set = "six"

[decoder]
pad_id = 0
eos_id = 2
teacher_forcing_ratio = 0.0
"#,
        )
        .unwrap();

        let config = TrackerConfig::from_file(&path).unwrap();
        assert_eq!(config.model.op_set, OpSetKind::Six);
        assert_eq!(config.decoder.eos_id, 2);
        assert_eq!(config.decoder.max_value, 9);
        assert_eq!(config.updater.null_value, "[NULL]");
    }
}
