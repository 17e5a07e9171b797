use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::exchange::{ExchangeRule, RuleSettings};
use crate::registry::{ActiveTypeRegistry, TypeActivity};

/// TOML-backed configuration for one cohort member.
/// Identity fields may be overridden from the environment (see `EnvOverrides`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub types: TypesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub local_collection_id: String,
    #[serde(default)]
    pub local_collection_name: Option<String>,
    pub server_name: String,
    #[serde(default)]
    pub server_type: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    pub repository_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub save: RuleSettings,
    #[serde(default)]
    pub learn: RuleSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypesConfig {
    /// Treat every type as active. Useful when no type store is wired in.
    #[serde(default)]
    pub all_active: bool,
    /// Active type def GUIDs or names.
    #[serde(default)]
    pub active: Vec<String>,
}

impl FileConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    /// Reject configurations that would make every event fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.local_collection_id.trim().is_empty() {
            return Err(ConfigError::Missing("identity.local_collection_id"));
        }
        if self.identity.server_name.trim().is_empty() {
            return Err(ConfigError::Missing("identity.server_name"));
        }
        if self.identity.repository_name.trim().is_empty() {
            return Err(ConfigError::Missing("identity.repository_name"));
        }
        if !self.types.all_active && self.types.active.is_empty() {
            return Err(ConfigError::Invalid {
                field: "types.active",
                reason: "no active types and all_active is false".to_string(),
            });
        }
        Ok(())
    }

    pub fn type_registry(&self) -> ActiveTypeRegistry {
        if self.types.all_active {
            ActiveTypeRegistry::permissive()
        } else {
            ActiveTypeRegistry::new(self.types.active.iter().cloned())
        }
    }

    pub fn exchange_rule(&self, types: Arc<dyn TypeActivity>) -> ExchangeRule {
        ExchangeRule::new(self.exchange.save.clone(), self.exchange.learn.clone(), types)
    }

    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  local_collection_id: {}", self.identity.local_collection_id);
        tracing::info!("  server_name: {}", self.identity.server_name);
        tracing::info!("  repository_name: {}", self.identity.repository_name);
        tracing::info!("  save rule: {}", self.exchange.save.kind);
        tracing::info!("  learn rule: {}", self.exchange.learn.kind);
        if self.types.all_active {
            tracing::info!("  active types: <all>");
        } else {
            tracing::info!("  active types: {}", self.types.active.len());
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
