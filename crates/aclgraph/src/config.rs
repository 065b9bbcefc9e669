//! Engine configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a
//! valid configuration:
//!
//! ```toml
//! audit_enabled = true
//! revoke_mode = "exact_mask"
//! max_insert_attempts = 5
//! max_chain_depth = 32
//! database_path = "/var/lib/app/acl.db"
//!
//! [domain_aliases]
//! invoices = "billing"
//!
//! [[policies]]
//! domain = "billing"
//! roles = [{ role = "accountant", actions = ["read", "write"] }]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use aclgraph_core::{RevokeMode, ValidationError};
use aclgraph_perms::{DEFAULT_MAX_CHAIN_DEPTH, DEFAULT_MAX_INSERT_ATTEMPTS};

use crate::policy::PolicyDescriptor;

/// Configuration for the [`PermissionService`](crate::PermissionService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AclConfig {
    /// Emit one INFO event on target `aclgraph::audit` per mutation.
    pub audit_enabled: bool,
    /// How revoke treats entries whose mask only partly overlaps.
    pub revoke_mode: RevokeMode,
    /// Insert-then-fetch rounds before a creation race becomes a conflict.
    pub max_insert_attempts: u32,
    /// Parent hops followed before an ancestor chain is rejected.
    pub max_chain_depth: u32,
    /// SQLite file used by [`PermissionService::open`](crate::PermissionService::open).
    /// `None` means an in-memory database.
    pub database_path: Option<PathBuf>,
    /// Role policies applied by
    /// [`PermissionService::sync_configured_policies`](crate::PermissionService::sync_configured_policies).
    pub policies: Vec<PolicyDescriptor>,
    /// Domain renames applied when policies are read back.
    pub domain_aliases: BTreeMap<String, String>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            audit_enabled: false,
            revoke_mode: RevokeMode::ClearBits,
            max_insert_attempts: DEFAULT_MAX_INSERT_ATTEMPTS,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            database_path: None,
            policies: Vec::new(),
            domain_aliases: BTreeMap::new(),
        }
    }
}

impl AclConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse acl config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read acl config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid acl config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_insert_attempts == 0 {
            return Err(ValidationError::InvalidConfig(
                "max_insert_attempts must be at least 1".into(),
            ));
        }
        if self.max_chain_depth == 0 {
            return Err(ValidationError::InvalidConfig(
                "max_chain_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
