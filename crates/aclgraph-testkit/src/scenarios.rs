//! Declarative scenarios.
//!
//! A scenario is a JSON list of steps run against a fresh service. Mutating
//! steps may name the error kind they expect; `expect` steps assert a check
//! result. The same file runs against every backend, so the scenarios double
//! as cross-store conformance vectors.
//!
//! Objects are written `"Class:id"`, SIDs `"principal:name"` or
//! `"role:NAME"`, permissions by well-known name.

use serde::{Deserialize, Serialize};

use aclgraph::{AclConfig, PermissionService};
use aclgraph_core::{ObjectKey, Permission, SidKey};
use aclgraph_perms::AclError;
use aclgraph_store::Store;
use aclgraph_sync::{RoleLifecycleEvent, SyncError};

const BUILTIN: &str = include_str!("../scenarios/resolution.json");

/// A named list of steps with the config to run them under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: AclConfig,
    pub steps: Vec<Step>,
}

/// One step plus the error kind it should produce, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    Grant {
        object: String,
        sid: String,
        permissions: Vec<String>,
    },
    Deny {
        object: String,
        sid: String,
        permissions: Vec<String>,
    },
    Revoke {
        object: String,
        sid: String,
        permissions: Vec<String>,
    },
    Ensure {
        object: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default = "default_true")]
        inheriting: bool,
    },
    SetParent {
        object: String,
        parent: Option<String>,
    },
    SetInheriting {
        object: String,
        inheriting: bool,
    },
    DeleteAcl {
        object: String,
    },
    Role {
        event: RoleLifecycleEvent,
    },
    Expect {
        object: String,
        sids: Vec<String>,
        permission: String,
        allowed: bool,
    },
    ExpectEntries {
        object: String,
        count: usize,
    },
}

fn default_true() -> bool {
    true
}

/// Result of running one scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: String,
    pub steps_run: usize,
    pub failures: Vec<String>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Parse a JSON array of scenarios.
pub fn load_scenarios(json: &str) -> serde_json::Result<Vec<Scenario>> {
    serde_json::from_str(json)
}

/// The scenarios shipped with this crate.
pub fn builtin_scenarios() -> serde_json::Result<Vec<Scenario>> {
    load_scenarios(BUILTIN)
}

/// Parse `"Class:id"`.
pub fn parse_object(text: &str) -> Option<ObjectKey> {
    let (class, id) = text.split_once(':')?;
    Some(ObjectKey::new(class, id))
}

/// Parse `"principal:name"` or `"role:NAME"`.
pub fn parse_sid(text: &str) -> Option<SidKey> {
    match text.split_once(':')? {
        ("principal", name) => Some(SidKey::principal(name)),
        ("role", name) => Some(SidKey::role(name)),
        _ => None,
    }
}

/// Combine well-known permission names into one mask.
pub fn parse_mask(names: &[String]) -> Option<Permission> {
    names.iter().try_fold(Permission::NONE, |acc, name| {
        Permission::from_name(name).ok().map(|bit| acc | bit)
    })
}

/// What a step produced, before comparing it to the expectation.
enum StepResult {
    Ok,
    Failed(&'static str),
    Mismatch(String),
}

impl<T> From<Result<T, AclError>> for StepResult {
    fn from(result: Result<T, AclError>) -> Self {
        match result {
            Ok(_) => StepResult::Ok,
            Err(err) => StepResult::Failed(err.kind()),
        }
    }
}

/// Run `scenario` against a fresh service over `store`.
pub async fn run_scenario<S: Store>(store: S, scenario: &Scenario) -> ScenarioReport {
    let service = PermissionService::new(store, scenario.config.clone());
    let mut report = ScenarioReport {
        name: scenario.name.clone(),
        ..ScenarioReport::default()
    };

    for (index, step) in scenario.steps.iter().enumerate() {
        report.steps_run += 1;
        let result = match run_step(&service, &step.action).await {
            Ok(result) => result,
            Err(message) => {
                report.failures.push(format!("step {index}: {message}"));
                continue;
            }
        };

        let failure = match (result, step.error.as_deref()) {
            (StepResult::Mismatch(message), _) => Some(message),
            (StepResult::Ok, None) => None,
            (StepResult::Ok, Some(expected)) => {
                Some(format!("expected {expected} error, step succeeded"))
            }
            (StepResult::Failed(kind), Some(expected)) if kind == expected => None,
            (StepResult::Failed(kind), _) => Some(format!("unexpected {kind} error")),
        };
        if let Some(message) = failure {
            report
                .failures
                .push(format!("step {index} ({:?}): {message}", step.action));
        }
    }
    report
}

async fn run_step<S: Store>(
    service: &PermissionService<S>,
    action: &Action,
) -> Result<StepResult, String> {
    let result = match action {
        Action::Grant {
            object,
            sid,
            permissions,
        } => {
            let (object, sid, mask) = parse_triple(object, sid, permissions)?;
            service.grant(&object, &sid, mask).await.into()
        }
        Action::Deny {
            object,
            sid,
            permissions,
        } => {
            let (object, sid, mask) = parse_triple(object, sid, permissions)?;
            service.deny(&object, &sid, mask).await.into()
        }
        Action::Revoke {
            object,
            sid,
            permissions,
        } => {
            let (object, sid, mask) = parse_triple(object, sid, permissions)?;
            service.revoke(&object, &sid, mask).await.into()
        }
        Action::Ensure {
            object,
            parent,
            inheriting,
        } => {
            let object = object_arg(object)?;
            let parent = parent.as_deref().map(object_arg).transpose()?;
            service
                .ensure_identity(&object, parent.as_ref(), *inheriting)
                .await
                .into()
        }
        Action::SetParent { object, parent } => {
            let object = object_arg(object)?;
            let parent = parent.as_deref().map(object_arg).transpose()?;
            service.set_parent(&object, parent.as_ref()).await.into()
        }
        Action::SetInheriting { object, inheriting } => service
            .set_entries_inheriting(&object_arg(object)?, *inheriting)
            .await
            .into(),
        Action::DeleteAcl { object } => service.delete_acl(&object_arg(object)?).await.into(),
        Action::Role { event } => match service.synchronizer().handle(event).await {
            Ok(_) => StepResult::Ok,
            Err(SyncError::Acl(err)) => StepResult::Failed(err.kind()),
            Err(SyncError::Validation(_)) => StepResult::Failed("validation"),
            Err(SyncError::Closed) => StepResult::Failed("closed"),
        },
        Action::Expect {
            object,
            sids,
            permission,
            allowed,
        } => {
            let object = object_arg(object)?;
            let sids = sids
                .iter()
                .map(|s| parse_sid(s).ok_or_else(|| format!("bad sid {s:?}")))
                .collect::<Result<Vec<_>, _>>()?;
            let bit = Permission::from_name(permission).map_err(|e| e.to_string())?;
            match service.check(&object, &sids, bit).await {
                Ok(actual) if actual == *allowed => StepResult::Ok,
                Ok(actual) => StepResult::Mismatch(format!(
                    "{object} {permission} for {sids:?}: expected {allowed}, got {actual}"
                )),
                Err(err) => StepResult::Failed(err.kind()),
            }
        }
        Action::ExpectEntries { object, count } => {
            let object = object_arg(object)?;
            match service.list(&object).await {
                Ok(entries) if entries.len() == *count => StepResult::Ok,
                Ok(entries) => StepResult::Mismatch(format!(
                    "{object}: expected {count} entries, found {}",
                    entries.len()
                )),
                Err(err) => StepResult::Failed(err.kind()),
            }
        }
    };
    Ok(result)
}

fn object_arg(text: &str) -> Result<ObjectKey, String> {
    parse_object(text).ok_or_else(|| format!("bad object {text:?}"))
}

fn parse_triple(
    object: &str,
    sid: &str,
    permissions: &[String],
) -> Result<(ObjectKey, SidKey, Permission), String> {
    let object = object_arg(object)?;
    let sid = parse_sid(sid).ok_or_else(|| format!("bad sid {sid:?}"))?;
    let mask = parse_mask(permissions).ok_or_else(|| format!("bad permissions {permissions:?}"))?;
    Ok((object, sid, mask))
}
