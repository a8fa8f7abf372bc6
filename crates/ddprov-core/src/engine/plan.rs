//! Plan computation
//!
//! A plan compares the desired resources against the state store's records:
//! unknown addresses are created, known ones are diffed, records with no
//! desired counterpart are deleted.

use crate::diff::{self, Diff};
use crate::error::{Error, Result};
use crate::registry::ResourceRegistry;
use crate::traits::StateRecord;
use crate::value::ConfigMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// One desired resource instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredResource {
    /// Unique instance address (`datadog_monitor.cpu`)
    pub address: String,
    /// Resource type name
    pub kind: String,
    /// Desired configuration
    #[serde(default)]
    pub config: ConfigMap,
    /// Addresses that must be applied first
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl DesiredResource {
    pub fn new(address: impl Into<String>, kind: impl Into<String>, config: ConfigMap) -> Self {
        Self {
            address: address.into(),
            kind: kind.into(),
            config,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, address: impl Into<String>) -> Self {
        self.depends_on.push(address.into());
        self
    }
}

/// What the engine will do with one address
#[derive(Debug, Clone, PartialEq)]
pub enum PlanAction {
    Create,
    Update(Diff),
    /// Delete then create; the diff holds a force-new change
    Replace(Diff),
    Delete,
    NoOp,
}

impl PlanAction {
    pub fn name(&self) -> &'static str {
        match self {
            PlanAction::Create => "create",
            PlanAction::Update(_) => "update",
            PlanAction::Replace(_) => "replace",
            PlanAction::Delete => "delete",
            PlanAction::NoOp => "no-op",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            PlanAction::Create => "+",
            PlanAction::Update(_) => "~",
            PlanAction::Replace(_) => "-/+",
            PlanAction::Delete => "-",
            PlanAction::NoOp => " ",
        }
    }
}

/// Planned action for one address
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub address: String,
    pub kind: String,
    pub action: PlanAction,
}

impl fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action.symbol(), self.action.name(), self.address)?;
        if let PlanAction::Update(d) | PlanAction::Replace(d) = &self.action {
            if !d.is_empty() {
                write!(f, " [{}]", d.paths().join(", "))?;
            }
        }
        Ok(())
    }
}

/// Ordered list of planned changes (desired order, then orphans)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
}

impl Plan {
    /// Whether every action is a no-op
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(|c| c.action == PlanAction::NoOp)
    }

    /// Count of changes with the given action name
    pub fn count(&self, action: &str) -> usize {
        self.changes.iter().filter(|c| c.action.name() == action).count()
    }

    pub fn get(&self, address: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.address == address)
    }

    /// Machine-readable rendering
    pub fn to_json(&self) -> Value {
        let changes: Vec<Value> = self
            .changes
            .iter()
            .map(|c| {
                let paths = match &c.action {
                    PlanAction::Update(d) | PlanAction::Replace(d) => d.paths(),
                    _ => Vec::new(),
                };
                json!({
                    "address": c.address,
                    "kind": c.kind,
                    "action": c.action.name(),
                    "changed": paths,
                })
            })
            .collect();
        json!({ "changes": changes })
    }
}

/// Check addresses, kinds and dependencies of the desired set
pub(crate) fn check_desired(desired: &[DesiredResource], registry: &ResourceRegistry) -> Result<()> {
    let mut seen = HashSet::new();
    for res in desired {
        if !seen.insert(res.address.as_str()) {
            return Err(Error::config(format!("duplicate resource address: {}", res.address)));
        }
        if !registry.has_resource(&res.kind) {
            return Err(Error::config(format!("Unknown resource type: {}", res.kind)));
        }
    }
    for res in desired {
        if let Some(dep) = res.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
            return Err(Error::config(format!(
                "{} depends on unknown resource {}",
                res.address, dep
            )));
        }
    }
    Ok(())
}

/// Compute the plan for a desired set against existing records
pub fn compute(
    desired: &[DesiredResource],
    records: &BTreeMap<String, StateRecord>,
    registry: &ResourceRegistry,
) -> Result<Plan> {
    check_desired(desired, registry)?;

    let mut changes = Vec::with_capacity(desired.len());
    for res in desired {
        let action = match records.get(&res.address) {
            None => PlanAction::Create,
            Some(record) if record.kind != res.kind => PlanAction::Replace(Diff::default()),
            Some(record) => {
                let schema = registry.schema_of(&res.kind)?;
                let d = diff::diff(&schema, &record.values, &res.config);
                if d.is_empty() {
                    PlanAction::NoOp
                } else if d.requires_replace() {
                    PlanAction::Replace(d)
                } else {
                    PlanAction::Update(d)
                }
            }
        };
        changes.push(PlannedChange {
            address: res.address.clone(),
            kind: res.kind.clone(),
            action,
        });
    }

    let wanted: HashSet<&str> = desired.iter().map(|r| r.address.as_str()).collect();
    for (address, record) in records {
        if !wanted.contains(address.as_str()) {
            changes.push(PlannedChange {
                address: address.clone(),
                kind: record.kind.clone(),
                action: PlanAction::Delete,
            });
        }
    }

    Ok(Plan { changes })
}

/// Group desired resources into dependency waves
///
/// Every resource lands in the first wave after all of its dependencies.
/// Returns indices into `desired`, each wave in input order.
pub fn waves(desired: &[DesiredResource]) -> Result<Vec<Vec<usize>>> {
    let index: HashMap<&str, usize> = desired
        .iter()
        .enumerate()
        .map(|(i, r)| (r.address.as_str(), i))
        .collect();

    let mut level: Vec<Option<usize>> = vec![None; desired.len()];
    let mut remaining = desired.len();
    while remaining > 0 {
        let mut progressed = false;
        for (i, res) in desired.iter().enumerate() {
            if level[i].is_some() {
                continue;
            }
            let mut deepest = Some(0);
            for dep in &res.depends_on {
                let Some(&j) = index.get(dep.as_str()) else {
                    return Err(Error::config(format!(
                        "{} depends on unknown resource {}",
                        res.address, dep
                    )));
                };
                deepest = match (deepest, level[j]) {
                    (Some(d), Some(l)) => Some(d.max(l + 1)),
                    _ => None,
                };
            }
            if let Some(l) = deepest {
                level[i] = Some(l);
                remaining -= 1;
                progressed = true;
            }
        }
        if !progressed {
            let stuck: Vec<&str> = desired
                .iter()
                .enumerate()
                .filter(|(i, _)| level[*i].is_none())
                .map(|(_, r)| r.address.as_str())
                .collect();
            return Err(Error::config(format!("dependency cycle among: {}", stuck.join(", "))));
        }
    }

    let depth = level.iter().flatten().max().map_or(0, |d| d + 1);
    let mut out = vec![Vec::new(); depth];
    for (i, l) in level.into_iter().enumerate() {
        if let Some(l) = l {
            out[l].push(i);
        }
    }
    Ok(out)
}
