//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream API configuration
    pub upstream: UpstreamConfig,
    /// Key material file paths
    pub keys: KeysConfig,
    /// Magic token issuance configuration
    pub tokens: TokenConfig,
    /// Scope identifier -> allowed pattern strings.
    ///
    /// Each pattern is `"METHODS /path"` — see [`crate::scopes::ScopePattern`].
    pub scopes: HashMap<String, Vec<String>>,
    /// Header / query sanitization configuration
    pub sanitize: SanitizeConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Timeout for a single forwarded upstream request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Root URL of the real API that proxied requests are forwarded to
    pub api_root: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_root: "https://api.github.com".to_string(),
        }
    }
}

/// Key material file paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// PEM private signing key path
    pub private_key: String,
    /// PEM certificate path (provides the verification key)
    pub certificate: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            private_key: "keys/private.pem".to_string(),
            certificate: "keys/certificate.pem".to_string(),
        }
    }
}

/// Magic token issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Lifetime of issued magic tokens (expiry = issuance + ttl)
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Seal the embedded upstream credential with AES-256-GCM so it is not
    /// readable from the (merely signed, not encrypted) token payload
    pub seal_credential: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            seal_credential: true,
        }
    }
}

/// Header / query sanitization configuration.
///
/// Explicit name lists, case-insensitive for headers. These replace the
/// original process-wide scrub registries with construction-time values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Request header names stripped before forwarding
    pub request_headers: Vec<String>,
    /// Response header names stripped before replying
    pub response_headers: Vec<String>,
    /// Query parameter names removed from the forwarded query string
    pub query_params: Vec<String>,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            request_headers: vec![
                "host".to_string(),
                "authorization".to_string(),
                "connection".to_string(),
                "content-length".to_string(),
                "transfer-encoding".to_string(),
                "accept-encoding".to_string(),
            ],
            response_headers: vec![
                "connection".to_string(),
                "keep-alive".to_string(),
                "transfer-encoding".to_string(),
                "content-length".to_string(),
                "content-encoding".to_string(),
            ],
            query_params: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MAGICPROXY_ prefix)
        figment = figment.merge(Env::prefixed("MAGICPROXY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde cannot express
    fn validate(&self) -> Result<()> {
        self.api_root()?;
        if self.tokens.ttl.is_zero() {
            return Err(Error::Config("tokens.ttl must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Parsed upstream API root URL
    pub fn api_root(&self) -> Result<Url> {
        Url::parse(&self.upstream.api_root)
            .map_err(|e| Error::Config(format!("Invalid upstream.api_root: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.tokens.ttl, Duration::from_secs(3600));
        assert!(config.tokens.seal_credential);
    }

    #[test]
    fn default_sanitize_strips_authorization() {
        let config = SanitizeConfig::default();
        assert!(config.request_headers.contains(&"authorization".to_string()));
        assert!(config.request_headers.contains(&"host".to_string()));
    }

    #[test]
    fn load_missing_file_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/config.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load_yaml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9000
upstream:
  api_root: "https://api.example.com"
tokens:
  ttl: 15m
scopes:
  read:
    - "GET /v1/items/**"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.upstream.api_root, "https://api.example.com");
        assert_eq!(config.tokens.ttl, Duration::from_secs(900));
        assert_eq!(config.scopes["read"], vec!["GET /v1/items/**"]);
    }

    #[test]
    fn invalid_api_root_rejected() {
        let config = Config {
            upstream: UpstreamConfig {
                api_root: "not a url".to_string(),
            },
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
