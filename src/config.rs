use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable that overrides `[server].base_url`.
pub const BASE_URL_ENV: &str = "SEGSCOPE_API_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub upload: Upload,
    #[serde(default)]
    pub export: Export,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies `SEGSCOPE_API_URL` and an optional CLI override, in that order.
    pub fn with_base_url_override(mut self, cli: Option<&str>) -> Self {
        if let Ok(env_val) = std::env::var(BASE_URL_ENV) {
            if !env_val.trim().is_empty() {
                self.server.base_url = env_val.trim().to_string();
            }
        }
        if let Some(url) = cli {
            self.server.base_url = url.trim().to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub base_url: String,
    pub timeout_seconds: u64,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            timeout_seconds: 30,
        }
    }
}

impl Server {
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polling {
    pub interval_ms: u64,
}
impl Default for Polling {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub extensions: Vec<String>,
}
impl Default for Upload {
    fn default() -> Self {
        Self {
            extensions: vec!["dcm".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    pub out_dir: String,
    pub prefix: String,
}
impl Default for Export {
    fn default() -> Self {
        Self {
            out_dir: "exports".into(),
            prefix: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
