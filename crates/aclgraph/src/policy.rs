//! Role policies over domains and components.
//!
//! A [`PolicyDescriptor`] says which roles may read, write or administer a
//! domain (or one component of it). The seeder writes descriptors into the
//! ACL tables as role entries on well-known identities:
//!
//! - class = the normalized domain
//! - external id = `"__root__"` for the domain itself, `"domain:component"`
//!   for a component
//!
//! [`aggregate`] reads the stored granting role entries back into one
//! [`DomainPolicy`] per domain, mapping (class, external id) pairs through a
//! [`ResourceMapper`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use aclgraph_core::Permission;

/// External id of the identity that carries domain-wide policy.
pub const ROOT_IDENTITY: &str = "__root__";

/// Identities that stand for the whole domain rather than a component.
pub const DOMAIN_INDICATORS: [&str; 3] = ["*", "__domain__", ROOT_IDENTITY];

/// Coarse action a policy grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    #[serde(alias = "READ")]
    Read,
    #[serde(alias = "WRITE")]
    Write,
    #[serde(alias = "ADMIN")]
    Admin,
}

impl PolicyAction {
    pub const ALL: [PolicyAction; 3] = [PolicyAction::Read, PolicyAction::Write, PolicyAction::Admin];

    /// The permission bit an action is stored as.
    pub fn permission(self) -> Permission {
        match self {
            PolicyAction::Read => Permission::READ,
            PolicyAction::Write => Permission::WRITE,
            PolicyAction::Admin => Permission::ADMINISTRATION,
        }
    }

    /// Combined mask of `actions`. An empty list means read.
    pub fn mask_of(actions: &[PolicyAction]) -> Permission {
        if actions.is_empty() {
            return Permission::READ;
        }
        actions
            .iter()
            .fold(Permission::NONE, |mask, action| mask | action.permission())
    }

    /// The actions whose bit is set in `mask`. Other bits are ignored.
    pub fn from_mask(mask: Permission) -> Vec<PolicyAction> {
        Self::ALL
            .into_iter()
            .filter(|action| mask.contains(action.permission()))
            .collect()
    }
}

/// The actions one role holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub role: String,
    #[serde(default)]
    pub actions: Vec<PolicyAction>,
}

impl RolePolicy {
    pub fn new(role: impl Into<String>, actions: impl IntoIterator<Item = PolicyAction>) -> Self {
        Self {
            role: role.into(),
            actions: actions.into_iter().collect(),
        }
    }
}

/// Role policy for a domain, or for one component when `component` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default)]
    pub roles: Vec<RolePolicy>,
}

impl PolicyDescriptor {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            component: None,
            roles: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_role(
        mut self,
        role: impl Into<String>,
        actions: impl IntoIterator<Item = PolicyAction>,
    ) -> Self {
        self.roles.push(RolePolicy::new(role, actions));
        self
    }
}

/// Reduce a domain or component name to `[a-z0-9:_-]`.
///
/// Lowercases, turns whitespace runs and any other character into a single
/// `-`, and strips leading and trailing dashes. Blank results are `None`.
pub fn normalize_segment(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    for c in value.trim().to_lowercase().chars() {
        let c = match c {
            'a'..='z' | '0'..='9' | ':' | '_' | '-' => c,
            _ => '-',
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Role name as it appears in a policy: trimmed, `ROLE_` prefix dropped,
/// uppercased.
pub fn normalize_role(sid: &str) -> Option<String> {
    let trimmed = sid.trim();
    let name = trimmed.strip_prefix("ROLE_").unwrap_or(trimmed);
    if name.is_empty() {
        None
    } else {
        Some(name.to_uppercase())
    }
}

/// Where a stored identity lands in the policy view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocation {
    pub domain: String,
    pub component: Option<String>,
}

/// Maps (class name, external id) pairs to domains and components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMapper {
    aliases: BTreeMap<String, String>,
}

impl ResourceMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report domain `from` as `to`.
    pub fn with_alias(mut self, from: &str, to: impl Into<String>) -> Self {
        if let Some(from) = normalize_segment(from) {
            self.aliases.insert(from, to.into());
        }
        self
    }

    /// An external id of the form `domain:component` names its domain
    /// explicitly. Otherwise the class is the domain and the external id the
    /// component, unless it is a domain indicator or repeats the domain.
    pub fn map(&self, class_name: &str, external_id: &str) -> Option<ResourceLocation> {
        let class = normalize_segment(class_name);
        let identity = normalize_segment(external_id);

        if let Some((domain, component)) = identity.as_deref().and_then(|id| id.split_once(':')) {
            let domain = if domain.is_empty() {
                self.resolve_domain(class.as_deref()?)?
            } else {
                self.resolve_domain(domain)?
            };
            return Some(ResourceLocation {
                domain,
                component: component_of(component),
            });
        }

        let domain = self.resolve_domain(class.as_deref()?)?;
        let component = identity
            .as_deref()
            .and_then(component_of)
            .filter(|component| *component != domain);
        Some(ResourceLocation { domain, component })
    }

    fn resolve_domain(&self, candidate: &str) -> Option<String> {
        let domain = component_of(candidate)?;
        Some(self.aliases.get(&domain).cloned().unwrap_or(domain))
    }
}

fn component_of(value: &str) -> Option<String> {
    normalize_segment(value).filter(|v| !DOMAIN_INDICATORS.contains(&v.as_str()))
}

/// Roles holding each action, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleActions {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub read: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub write: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub admin: BTreeSet<String>,
}

impl RoleActions {
    fn apply(&mut self, role: &str, actions: &[PolicyAction]) {
        for action in actions {
            let target = match action {
                PolicyAction::Read => &mut self.read,
                PolicyAction::Write => &mut self.write,
                PolicyAction::Admin => &mut self.admin,
            };
            target.insert(role.to_owned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.admin.is_empty()
    }
}

/// Aggregated policy of one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicy {
    /// Domain-wide roles, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<RoleActions>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, RoleActions>,
}

/// One granting or denying entry, joined with its class, identity and SID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRow {
    pub class_name: String,
    pub external_id: String,
    pub sid: String,
    pub principal: bool,
    pub mask: Permission,
    pub granting: bool,
}

/// Fold stored entries into per-domain policies.
///
/// Denies and principal SIDs are skipped, as are rows the mapper cannot
/// place or whose mask carries none of the policy actions. Domains and
/// components left without roles are dropped.
pub fn aggregate(
    rows: impl IntoIterator<Item = PolicyRow>,
    mapper: &ResourceMapper,
) -> BTreeMap<String, DomainPolicy> {
    let mut policies: BTreeMap<String, DomainPolicy> = BTreeMap::new();

    for row in rows {
        if !row.granting || row.principal {
            continue;
        }
        let Some(location) = mapper.map(&row.class_name, &row.external_id) else {
            continue;
        };
        let Some(role) = normalize_role(&row.sid) else {
            continue;
        };
        let actions = PolicyAction::from_mask(row.mask);
        if actions.is_empty() {
            continue;
        }

        let domain = policies.entry(location.domain).or_default();
        let target = match location.component {
            Some(component) => domain.components.entry(component).or_default(),
            None => domain.roles.get_or_insert_with(RoleActions::default),
        };
        target.apply(&role, &actions);
    }

    policies.retain(|_, policy| {
        policy.components.retain(|_, roles| !roles.is_empty());
        if policy.roles.as_ref().is_some_and(RoleActions::is_empty) {
            policy.roles = None;
        }
        policy.roles.is_some() || !policy.components.is_empty()
    });
    debug!(domains = policies.len(), "loaded acl domain policies");
    policies
}
