use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Invalid OLLAMA_HOST: {0}")]
    OllamaHost(#[from] url::ParseError),
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub models_dir: PathBuf,
    pub preprocessing_path: PathBuf,
    pub ollama_host: Url,
    pub chat_timeout: Duration,
    pub request_timeout: Duration,
    pub scratch_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let ollama_host = lookup("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            models_dir: lookup("DERMAI_MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models")),
            preprocessing_path: lookup("DERMAI_PREPROCESSING")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/preprocessing.yaml")),
            ollama_host: base_url(&ollama_host)?,
            chat_timeout: Duration::from_secs(parse_or(&lookup, "DERMAI_CHAT_TIMEOUT_SECS", 120)?),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "DERMAI_REQUEST_TIMEOUT_SECS",
                300,
            )?),
            scratch_dir: lookup("DERMAI_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            max_upload_bytes: parse_or(&lookup, "DERMAI_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }

    /// Directory holding the exported artifacts of one model.
    pub fn model_dir(&self, model_name: &str) -> PathBuf {
        self.models_dir.join(model_name)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses `raw` so that relative joins append to its path instead of
/// replacing the last segment.
fn base_url(raw: &str) -> Result<Url, SettingsError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, SettingsError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| SettingsError::Invalid { name, value }),
        None => Ok(default),
    }
}
