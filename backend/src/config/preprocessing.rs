use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessingConfigError {
    #[error("Failed to read preprocessing config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse preprocessing config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid preprocessing config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    pub version: f32,
    pub classifier: ImageSpec,
    pub caption: ImageSpec,
}

/// Input geometry and per-channel normalization expected by one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSpec {
    pub size: Vec<u32>,
    pub resize_method: String,
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl PreprocessingConfig {
    pub fn load(path: &Path) -> Result<Self, PreprocessingConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, PreprocessingConfigError> {
        let config: PreprocessingConfig = serde_yaml::from_str(config_str)?;
        config.classifier.validate("classifier")?;
        config.caption.validate("caption")?;
        Ok(config)
    }
}

impl ImageSpec {
    fn validate(&self, name: &str) -> Result<(), PreprocessingConfigError> {
        let invalid = |reason: &str| PreprocessingConfigError::Invalid(format!("{name}: {reason}"));

        if self.size.len() != 2 || self.size.contains(&0) {
            return Err(invalid("size must be [height, width] with non-zero entries"));
        }
        if self.mean.len() != 3 || self.std.len() != 3 {
            return Err(invalid("mean and std need one value per RGB channel"));
        }
        if self.std.iter().any(|s| *s <= 0.0) {
            return Err(invalid("std values must be positive"));
        }
        self.filter()?;
        Ok(())
    }

    pub fn height(&self) -> u32 {
        self.size[0]
    }

    pub fn width(&self) -> u32 {
        self.size[1]
    }

    pub fn filter(&self) -> Result<FilterType, PreprocessingConfigError> {
        match self.resize_method.as_str() {
            "nearest" => Ok(FilterType::Nearest),
            "bilinear" => Ok(FilterType::Triangle),
            "bicubic" => Ok(FilterType::CatmullRom),
            "lanczos" => Ok(FilterType::Lanczos3),
            other => Err(PreprocessingConfigError::Invalid(format!(
                "unknown resize method {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
version: 1.0
classifier:
  size: [224, 224]
  resize_method: bilinear
  mean: [0.485, 0.456, 0.406]
  std: [0.229, 0.224, 0.225]
caption:
  size: [224, 196]
  resize_method: bicubic
  mean: [0.5, 0.5, 0.5]
  std: [0.5, 0.5, 0.5]
"#;

    #[test]
    fn parses_both_model_specs() {
        let config = PreprocessingConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.classifier.height(), 224);
        assert_eq!(config.caption.width(), 196);
        assert_eq!(config.caption.filter().unwrap(), FilterType::CatmullRom);
    }

    #[test]
    fn rejects_unknown_resize_method() {
        let broken = CONFIG.replace("bicubic", "sinc");
        assert!(matches!(
            PreprocessingConfig::from_yaml(&broken),
            Err(PreprocessingConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let broken = CONFIG.replace("mean: [0.5, 0.5, 0.5]", "mean: [0.5]");
        assert!(PreprocessingConfig::from_yaml(&broken).is_err());
    }

    #[test]
    fn shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/preprocessing.yaml");
        PreprocessingConfig::load(&path).unwrap();
    }
}
