use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/server.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub model: ModelConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub serialize_inference: bool,
    pub inference_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub field_name: String,
    pub max_bytes: usize,
    /// When set, accepted uploads are also spooled here for the lifetime of the request.
    pub dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4040,
            workers: None,
            model: ModelConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/model.onnx"),
            serialize_inference: false,
            inference_timeout_secs: 30,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field_name: "image".to_string(),
            max_bytes: 1_000_000,
            dir: None,
        }
    }
}

impl ModelConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}

impl ServerConfig {
    /// Reads the YAML file named by `CONFIG_PATH` (missing file is fine) and
    /// applies environment overrides on top.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_yaml(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file at {}, using defaults", path);
                Self::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_env("PORT", port)?;
        }
        if let Some(workers) = lookup("WORKERS") {
            self.workers = Some(parse_env("WORKERS", workers)?);
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(flag) = lookup("SERIALIZE_INFERENCE") {
            self.model.serialize_inference = parse_env("SERIALIZE_INFERENCE", flag)?;
        }
        if let Some(secs) = lookup("INFERENCE_TIMEOUT_SECS") {
            self.model.inference_timeout_secs = parse_env("INFERENCE_TIMEOUT_SECS", secs.clone())?;
            // A zero timeout would fail every prediction.
            if self.model.inference_timeout_secs == 0 {
                return Err(ConfigError::InvalidEnv {
                    name: "INFERENCE_TIMEOUT_SECS",
                    value: secs,
                });
            }
        }
        if let Some(max) = lookup("MAX_UPLOAD_BYTES") {
            self.upload.max_bytes = parse_env("MAX_UPLOAD_BYTES", max)?;
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload.dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}
