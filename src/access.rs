//! Static access policy.
//!
//! Loaded once at startup from a JSON file and shared read-only between
//! requests. Maps identities to the tabs they may see, tabs to display labels
//! and tabs to the Drive folder holding their files.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;

/// On-disk layout of the access configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Tab key to display label
    pub tabs: BTreeMap<String, String>,
    /// Tab key to Drive folder id
    #[serde(default)]
    pub folder_ids: BTreeMap<String, String>,
    /// Identity (email) to tab keys, in display order
    #[serde(default)]
    pub user_roles: HashMap<String, Vec<String>>,
}

/// What a single identity is allowed to see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserAccess {
    pub tabs: Vec<String>,
    pub folder_map: BTreeMap<String, String>,
}

impl UserAccess {
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[derive(Debug)]
pub struct AccessPolicy {
    config: AccessConfig,
}

impl TryFrom<AccessConfig> for AccessPolicy {
    type Error = GatewayError;

    fn try_from(config: AccessConfig) -> Result<Self, Self::Error> {
        for (identity, tabs) in &config.user_roles {
            for tab in tabs {
                if !config.tabs.contains_key(tab) {
                    error!(identity = %identity, tab = %tab, "Tab has no display label");
                    return Err(GatewayError::Configuration(format!(
                        "User '{identity}' references tab '{tab}' which has no display label"
                    )));
                }
                if !config.folder_ids.contains_key(tab) {
                    warn!(tab = %tab, "Tab has no folder id, requests will be unscoped");
                }
            }
        }
        Ok(Self { config })
    }
}

impl AccessPolicy {
    /// Load and validate the access configuration from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self, GatewayError> {
        info!(access_config = ?path, "Loading access configuration");
        let contents = fs::read_to_string(path).await.inspect_err(|err| {
            error!(access_config = ?path, error = %err, "Failed to read access configuration")
        })?;
        let config: AccessConfig = serde_json::from_str(&contents).map_err(|err| {
            GatewayError::Configuration(format!(
                "Failed to parse access configuration {}: {err}",
                path.display()
            ))
        })?;
        let policy = Self::try_from(config)?;
        info!(
            tabs = policy.config.tabs.len(),
            users = policy.config.user_roles.len(),
            "Loaded access configuration"
        );
        Ok(policy)
    }

    /// Tab key to display label, for every configured tab
    pub fn tabs(&self) -> &BTreeMap<String, String> {
        &self.config.tabs
    }

    pub fn is_known_identity(&self, identity: &str) -> bool {
        self.config.user_roles.contains_key(identity)
    }

    /// Unknown identities get empty access rather than an error
    pub fn access_for(&self, identity: &str) -> UserAccess {
        let tabs = self
            .config
            .user_roles
            .get(identity)
            .cloned()
            .unwrap_or_default();
        let folder_map = tabs
            .iter()
            .filter_map(|tab| {
                self.config
                    .folder_ids
                    .get(tab)
                    .map(|folder| (tab.clone(), folder.clone()))
            })
            .collect();
        UserAccess { tabs, folder_map }
    }

    /// Checks `identity` may use `tab` and returns the folder to scope to, if any
    pub fn authorize(&self, identity: &str, tab: &str) -> Result<Option<&str>, GatewayError> {
        let allowed = self
            .config
            .user_roles
            .get(identity)
            .is_some_and(|tabs| tabs.iter().any(|t| t == tab));
        if !allowed {
            debug!(user = %identity, tab = %tab, "Tab not permitted");
            return Err(GatewayError::AccessDenied(tab.to_string()));
        }
        Ok(self.config.folder_ids.get(tab).map(String::as_str))
    }
}
