//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable holding the model provider API key
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Legacy per-backend environment variables, in configuration order
pub const LEGACY_BACKEND_ENV: &[(&str, &str)] = &[
    ("FASTMCP_URL", "expenses"),
    ("FASTMCP_FOODCARD_URL", "foodcard"),
];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Generative model configuration
    pub model: ModelConfig,
    /// Tool servers, in priority order
    pub backends: Vec<BackendConfig>,
    /// Dispatch behaviour
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MCP_INTERPRETER_ prefix)
        figment = figment.merge(Env::prefixed("MCP_INTERPRETER_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so ${VAR}, GOOGLE_API_KEY and FASTMCP_* see them
        config.load_env_files();
        config.apply_legacy_endpoints(|key| env::var(key).ok());
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Append backends named by the legacy `FASTMCP_*` variables.
    ///
    /// Entries already present (same URL) are not duplicated.
    pub fn apply_legacy_endpoints(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (var, name) in LEGACY_BACKEND_ENV {
            let Some(url) = lookup(var).filter(|u| !u.trim().is_empty()) else {
                continue;
            };
            if self.backends.iter().any(|b| b.url == url) {
                continue;
            }
            self.backends.push(BackendConfig {
                name: (*name).to_string(),
                url,
                ..BackendConfig::default()
            });
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in backend URLs and headers
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for backend in &mut self.backends {
            backend.url = Self::expand_string(&re, &backend.url);
            for value in backend.headers.values_mut() {
                *value = Self::expand_string(&re, value);
            }
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Enabled backends, in configuration order
    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.iter().filter(|b| b.enabled)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Allow cross-origin requests from any origin
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            cors: true,
        }
    }
}

/// Generative model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API key: literal value, `env:VAR_NAME`, or unset to read `GOOGLE_API_KEY`
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    /// API base URL
    pub base_url: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ModelConfig {
    /// Resolve the API key from the process environment
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|key| env::var(key).ok())
    }

    /// Resolve the API key with an explicit variable lookup
    pub fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        let key = match self.api_key.as_deref() {
            Some(value) => match value.strip_prefix("env:") {
                Some(var_name) => lookup(var_name),
                None => Some(value.to_string()),
            },
            None => lookup(API_KEY_ENV),
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

/// One MCP tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Display name used in logs
    pub name: String,
    /// Endpoint URL (Streamable HTTP endpoint, or an `/sse` endpoint)
    pub url: String,
    /// Whether backend is enabled
    pub enabled: bool,
    /// Extra HTTP headers (auth etc.)
    pub headers: HashMap<String, String>,
    /// Request timeout for this backend
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Force Streamable HTTP on or off (inferred from the URL when unset)
    pub streamable_http: Option<bool>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            enabled: true,
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            streamable_http: None,
        }
    }
}

impl BackendConfig {
    /// Backend for a bare URL
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: url.clone(),
            url,
            ..Self::default()
        }
    }

    /// Whether to speak Streamable HTTP (anything not ending in `/sse`)
    #[must_use]
    pub fn uses_streamable_http(&self) -> bool {
        self.streamable_http
            .unwrap_or_else(|| !self.url.trim_end_matches('/').ends_with("/sse"))
    }

    /// Transport type name
    #[must_use]
    pub fn transport_type(&self) -> &'static str {
        if self.uses_streamable_http() {
            "streamable-http"
        } else {
            "sse"
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Check the model's params against the tool's input schema before invoking
    pub validate_params: bool,
    /// Resolve the owning backend from the aggregated catalog instead of
    /// re-listing every backend
    pub reuse_catalog: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            validate_params: true,
            reuse_catalog: false,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms" or bare seconds
    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
