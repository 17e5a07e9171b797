use anyhow::Result;

use crate::file_config::FileConfig;

/// Identity overrides loaded from environment variables (and `.env`).
///
/// Lets one config file serve several cohort members that differ only in
/// identity.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub local_collection_id: Option<String>,
    pub server_name: Option<String>,
    pub repository_name: Option<String>,
    pub organization_name: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            local_collection_id: non_empty_env("COHORT_LOCAL_COLLECTION_ID"),
            server_name: non_empty_env("COHORT_SERVER_NAME"),
            repository_name: non_empty_env("COHORT_REPOSITORY_NAME"),
            organization_name: non_empty_env("COHORT_ORGANIZATION_NAME"),
        })
    }

    pub fn apply(&self, config: &mut FileConfig) {
        if let Some(id) = &self.local_collection_id {
            tracing::info!("  COHORT_LOCAL_COLLECTION_ID overrides config file");
            config.identity.local_collection_id = id.clone();
        }
        if let Some(name) = &self.server_name {
            tracing::info!("  COHORT_SERVER_NAME overrides config file");
            config.identity.server_name = name.clone();
        }
        if let Some(name) = &self.repository_name {
            tracing::info!("  COHORT_REPOSITORY_NAME overrides config file");
            config.identity.repository_name = name.clone();
        }
        if let Some(org) = &self.organization_name {
            config.identity.organization_name = Some(org.clone());
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_overrides_only_set_fields() {
        let mut config = FileConfig::from_toml_str(
            r#"
            [identity]
            local_collection_id = "from-file"
            server_name = "server-file"
            repository_name = "repo-file"

            [types]
            all_active = true
            "#,
        )
        .unwrap();

        let overrides = EnvOverrides {
            local_collection_id: Some("from-env".into()),
            ..Default::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.identity.local_collection_id, "from-env");
        assert_eq!(config.identity.server_name, "server-file");
        assert_eq!(config.identity.repository_name, "repo-file");
    }
}
