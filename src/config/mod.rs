//! Configuration loading and persistence (`~/.shopdesk/config.toml`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Gateway listener settings (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 42810)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Allow binding to non-localhost (default: false)
    #[serde(default)]
    pub allow_public_bind: bool,
}

fn default_gateway_port() -> u16 {
    42810
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            allow_public_bind: false,
        }
    }
}

/// Durable storage settings (`[storage]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override for the SQLite data directory. Defaults to
    /// `<config dir>/data` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Credential table (`[auth]` section).
///
/// Entries may hold plaintext tokens or SHA-256 hex digests; digests are
/// recommended (`shopdesk hash-token` produces them).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Tokens granting admin-pool access.
    #[serde(default)]
    pub admin_tokens: Vec<String>,
    /// Per-customer tokens.
    #[serde(default)]
    pub customers: Vec<CustomerToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerToken {
    /// The customer id this token resolves to.
    pub customer_id: String,
    /// Plaintext token or SHA-256 hex digest.
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,

    /// Path this config was loaded from (computed, not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Directory holding the SQLite database (computed, not serialized).
    #[serde(skip)]
    pub data_dir: PathBuf,
}

fn default_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SHOPDESK_CONFIG_DIR") {
        let dir = dir.trim();
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = directories::UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".shopdesk"))
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = default_config_dir()?;
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(&config_dir)
            .await
            .with_context(|| format!("Failed to create config directory {}", config_dir.display()))?;

        if config_path.exists() {
            // Warn if config file is world-readable (holds credentials)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.set_computed_paths(&config_dir, config_path);
            config.validate()?;
            tracing::info!(
                path = %config.config_path.display(),
                initialized = false,
                "Config loaded"
            );
            Ok(config)
        } else {
            let mut config = Config::default();
            config.set_computed_paths(&config_dir, config_path.clone());
            config.save().await?;

            // Restrict permissions on the newly created file
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }

            config.validate()?;
            tracing::info!(
                path = %config.config_path.display(),
                initialized = true,
                "Config loaded"
            );
            Ok(config)
        }
    }

    pub async fn save(&self) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(&self.config_path, contents)
            .await
            .with_context(|| format!("Failed to write config to {}", self.config_path.display()))?;
        Ok(())
    }

    /// Validate values that would otherwise fail at arbitrary runtime
    /// points.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        for (i, entry) in self.auth.customers.iter().enumerate() {
            if entry.customer_id.trim().is_empty() {
                anyhow::bail!("auth.customers[{i}].customer_id must not be empty");
            }
            if entry.token.trim().is_empty() {
                anyhow::bail!("auth.customers[{i}].token must not be empty");
            }
        }
        Ok(())
    }

    fn set_computed_paths(&mut self, config_dir: &Path, config_path: PathBuf) {
        self.config_path = config_path;
        self.data_dir = self
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("data"));
    }
}
