use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const BASE_URL_ENV: &str = "TALKSENSE_API_BASE_URL";
const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: Url,
    pub timeout: Option<Duration>,
    pub chat: SendOptions,
    pub credentials_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendOptions {
    pub use_rag: bool,
    pub temperature: f64,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            use_rag: true,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no writable data directory for credential storage")]
    Missing,
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "No data directory available; set storage.credentials_path in talksense.yaml."
                    .to_string()
            }
            Self::Invalid(detail) => format!("Configuration problem: {detail}. Update talksense.yaml."),
        }
    }
}

impl ClientSettings {
    /// Loads `talksense.yaml` from the first candidate location, falling back to
    /// defaults when no file exists. `TALKSENSE_API_BASE_URL` overrides the file.
    pub fn load() -> Result<Self, ConfigError> {
        let raw = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                parse_config(&contents)?
            }
            None => RawConfig::default(),
        };
        let env_base_url = std::env::var(BASE_URL_ENV).ok();
        resolve_settings(raw, env_base_url.as_deref())
    }

    pub fn for_base_url(base_url: &str, credentials_path: PathBuf) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            timeout: None,
            chat: SendOptions::default(),
            credentials_path,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }
}

fn parse_config(contents: &str) -> Result<RawConfig, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(RawConfig::default());
    }
    serde_yaml::from_str(contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid talksense.yaml: {err}")))
}

fn resolve_settings(raw: RawConfig, env_base_url: Option<&str>) -> Result<ClientSettings, ConfigError> {
    let api = raw.api.unwrap_or_default();
    let base_url = env_base_url
        .map(str::to_string)
        .or(api.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let base_url = parse_base_url(&base_url)?;

    let timeout = match api.timeout_secs {
        Some(0) => {
            return Err(ConfigError::Invalid(
                "api.timeout_secs must be greater than zero".to_string(),
            ))
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    let chat_section = raw.chat.unwrap_or_default();
    let mut chat = SendOptions::default();
    if let Some(use_rag) = chat_section.use_rag {
        chat.use_rag = use_rag;
    }
    if let Some(temperature) = chat_section.temperature {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ConfigError::Invalid(format!(
                "chat.temperature must be between 0.0 and 1.0, got {temperature}"
            )));
        }
        chat.temperature = temperature;
    }

    let credentials_path = match raw.storage.and_then(|section| section.credentials_path) {
        Some(path) => PathBuf::from(path),
        None => default_credentials_path().ok_or(ConfigError::Missing)?,
    };

    Ok(ClientSettings {
        base_url,
        timeout,
        chat,
        credentials_path,
    })
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|err| ConfigError::Invalid(format!("invalid api.base_url `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "api.base_url must use http or https, got `{}`",
            url.scheme()
        )));
    }
    Ok(url)
}

fn default_credentials_path() -> Option<PathBuf> {
    BaseDirs::new().map(|base| base.data_dir().join("talksense").join("auth.json"))
}

fn locate_config_file() -> Option<PathBuf> {
    config_candidates().into_iter().find(|path| path.exists())
}

fn config_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("talksense");
        paths.push(config_dir.join("talksense.yaml"));
        paths.push(config_dir.join("talksense.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".talksense").join("talksense.yaml"));
        paths.push(home_dir.join(".talksense").join("talksense.yml"));
    } else {
        paths.push(PathBuf::from("talksense.yaml"));
        paths.push(PathBuf::from("talksense.yml"));
    }
    paths
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    api: Option<ApiSection>,
    chat: Option<ChatSection>,
    storage: Option<StorageSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatSection {
    #[serde(default)]
    use_rag: Option<bool>,
    #[serde(default)]
    temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    #[serde(default)]
    credentials_path: Option<String>,
}
