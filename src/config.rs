//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - GitHub OAuth client settings
//! - Server binding settings
//! - Ethereum settlement verification settings
//! - Auth token settings
//!
//! Secrets come from the environment and take precedence over the file.
//! The resulting `Config` is built once at startup and passed by reference
//! into the components that need it; nothing reads the environment later.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub ethereum: EthereumConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// GitHub OAuth application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// OAuth App Client ID (GITHUB_CLIENT_ID env var takes precedence)
    pub client_id: String,
    pub redirect_uri: String,
    pub oauth_scope: String,
}

/// Database configuration (uses DATABASE_URL env var in practice)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {}

/// Whether bounty completion verifies the settlement transaction.
///
/// The skip mode exists for development against testnets without funded
/// accounts; it is an explicit, injected policy rather than a runtime
/// environment check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    Enforce,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    /// Network name used to build the Infura endpoint URL
    pub network: String,
    /// Full RPC URL override; empty means use Infura with INFURA_API_KEY
    #[serde(default)]
    pub rpc_url: String,
    pub verification: VerificationPolicy,
    pub receipt_poll_attempts: u32,
    pub receipt_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Signing secret for issued tokens (JWT_SECRET env var takes precedence)
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    /// GitHub client ID (env var takes precedence, required if config value is empty)
    pub fn github_client_id(&self) -> Option<String> {
        env_or_config("GITHUB_CLIENT_ID", &self.github.client_id)
    }

    /// GitHub client secret (env-only; never stored in the file)
    pub fn github_client_secret(&self) -> Option<String> {
        non_empty_env("GITHUB_CLIENT_SECRET")
    }

    /// Token signing secret (env var takes precedence)
    pub fn jwt_secret(&self) -> String {
        non_empty_env("JWT_SECRET").unwrap_or_else(|| self.auth.jwt_secret.clone())
    }

    /// Ethereum JSON-RPC endpoint: explicit override, else Infura
    pub fn ethereum_rpc_url(&self) -> Option<String> {
        if !self.ethereum.rpc_url.is_empty() {
            return Some(self.ethereum.rpc_url.clone());
        }
        non_empty_env("INFURA_API_KEY")
            .map(|key| format!("https://{}.infura.io/v3/{}", self.ethereum.network, key))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

fn env_or_config(name: &str, fallback: &str) -> Option<String> {
    non_empty_env(name).or_else(|| {
        if fallback.is_empty() {
            None
        } else {
            Some(fallback.to_string())
        }
    })
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config is validated at compile time,
        // so this should never fail. Using a fallback for robustness.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            github: GitHubConfig {
                client_id: String::new(),
                redirect_uri: "http://localhost:8080/api/auth/github/callback".to_string(),
                oauth_scope: "user:email,read:user,read:org,repo".to_string(),
            },
            database: DatabaseConfig::default(),
            ethereum: EthereumConfig {
                network: "sepolia".to_string(),
                rpc_url: String::new(),
                verification: VerificationPolicy::Skip,
                receipt_poll_attempts: 30,
                receipt_poll_interval_secs: 2,
            },
            auth: AuthConfig {
                jwt_secret: "dev_jwt_secret".to_string(),
                token_ttl_hours: 168,
            },
        })
    }
}
