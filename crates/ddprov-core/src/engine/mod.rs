//! Reconcile engine
//!
//! The ReconcileEngine is responsible for:
//! - Planning: diffing desired resources against recorded state
//! - Applying: running lifecycle handlers in dependency order with bounded
//!   parallelism
//! - Refreshing: re-reading every tracked instance and reporting drift
//! - Importing: adopting existing remote objects
//! - Reading data sources: read-only lookups that never touch the store
//!
//! ## Architecture
//!
//! ```text
//!  desired resources          StateStore (records)
//!         │                          │
//!         └──────────┬───────────────┘
//!                    ▼
//!            ┌────────────────┐
//!            │ ReconcileEngine│── EngineEvent ──► receiver
//!            └────────────────┘
//!                    │  waves, Semaphore(parallelism)
//!                    ▼
//!            ┌────────────────┐
//!            │   Lifecycle    │── ApiClient (retry, cancel)
//!            └────────────────┘
//! ```
//!
//! ## Apply Flow
//!
//! 1. Compute the plan
//! 2. Group desired resources into dependency waves
//! 3. Run each wave concurrently, at most `parallelism` handlers at once
//! 4. Write successful results to the StateStore
//! 5. Skip dependents of failed resources
//! 6. Delete orphans last
//!
//! A fatal diagnostic (authentication failure) cancels the rest of the run.

pub mod plan;

pub use plan::{DesiredResource, Plan, PlanAction, PlannedChange};

use crate::config::EngineConfig;
use crate::diag::{Diagnostic, Diagnostics};
use crate::diff;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::registry::ResourceRegistry;
use crate::schema;
use crate::traits::{DataSource, OpContext, StateBag, StateRecord, StateStore};
use crate::value::ConfigMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Events emitted by the ReconcileEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Plan computed
    PlanComputed {
        creates: usize,
        updates: usize,
        replaces: usize,
        deletes: usize,
    },

    /// Handler started for an address
    ResourceStarted { address: String, action: String },

    /// Handler finished without errors
    ResourceSucceeded { address: String, action: String },

    /// Handler reported errors, or was skipped
    ResourceFailed { address: String, error: String },

    /// Warning diagnostic
    Warning { address: String, message: String },

    /// Remote object differs from the recorded state
    DriftDetected { address: String, paths: Vec<String> },

    /// Remote object no longer exists
    Vanished { address: String },

    /// Run finished
    Finished { succeeded: usize, failed: usize },
}

/// Outcome for one address
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created,
    Updated,
    Replaced,
    Deleted,
    Unchanged,
    Imported,
    /// Data source lookup succeeded
    Read,
    Refreshed { drift: Vec<String> },
    Vanished,
    Failed,
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Skipped { .. })
    }
}

/// Per-address outcomes and diagnostics of a run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: BTreeMap<String, Outcome>,
    pub diagnostics: BTreeMap<String, Diagnostics>,
}

impl RunReport {
    /// Whether any address failed or was skipped
    pub fn has_errors(&self) -> bool {
        self.outcomes.values().any(Outcome::is_failure)
    }

    /// Whether any diagnostic is fatal
    pub fn has_fatal(&self) -> bool {
        self.diagnostics
            .values()
            .any(|d| d.find_kind("fatal").is_some())
    }

    pub fn outcome(&self, address: &str) -> Option<&Outcome> {
        self.outcomes.get(address)
    }

    fn record(&mut self, address: &str, outcome: Outcome, diags: Diagnostics) {
        self.outcomes.insert(address.to_string(), outcome);
        if !diags.is_empty() {
            self.diagnostics.entry(address.to_string()).or_default().extend(diags);
        }
    }
}

/// Work item for one address
enum Step {
    Create(StateBag),
    Update(StateBag),
    Replace { old: StateBag, new: StateBag },
    Delete(StateBag),
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Create(_) => "create",
            Step::Update(_) => "update",
            Step::Replace { .. } => "replace",
            Step::Delete(_) => "delete",
        }
    }
}

struct StepResult {
    address: String,
    kind: String,
    action: &'static str,
    bag: StateBag,
    diags: Diagnostics,
    /// A replace whose delete failed; the prior record stays as it is
    kept_old: bool,
}

/// Reconcile engine
///
/// ## Lifecycle
///
/// 1. Create with [`ReconcileEngine::new()`]
/// 2. Call [`plan`](ReconcileEngine::plan), [`apply`](ReconcileEngine::apply),
///    [`refresh`](ReconcileEngine::refresh) or [`import`](ReconcileEngine::import)
/// 3. Export the StateStore
///
/// ## Load Resistance
///
/// - **Bounded parallelism**: a semaphore caps concurrent handlers
/// - **Bounded event channel**: events are dropped (logged) when full
pub struct ReconcileEngine {
    registry: Arc<ResourceRegistry>,
    store: Arc<dyn StateStore>,
    ctx: OpContext,
    parallelism: usize,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ReconcileEngine {
    /// Create a new reconcile engine
    ///
    /// # Parameters
    ///
    /// - `registry`: Resource implementations
    /// - `store`: Recorded instance state
    /// - `ctx`: Operation context (API client, retry policy, cancellation)
    /// - `config`: Engine configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        registry: Arc<ResourceRegistry>,
        store: Arc<dyn StateStore>,
        ctx: OpContext,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let engine = Self {
            registry,
            store,
            ctx,
            parallelism: config.parallelism,
            event_tx: tx,
        };
        Ok((engine, rx))
    }

    /// Compute the plan without touching the remote
    pub async fn plan(&self, desired: &[DesiredResource]) -> Result<Plan> {
        let records = self.records().await?;
        let plan = plan::compute(desired, &records, &self.registry)?;

        self.emit_event(EngineEvent::PlanComputed {
            creates: plan.count("create"),
            updates: plan.count("update"),
            replaces: plan.count("replace"),
            deletes: plan.count("delete"),
        });
        for change in &plan.changes {
            if change.action != PlanAction::NoOp {
                info!("Plan: {}", change);
            }
        }
        Ok(plan)
    }

    /// Plan and apply the desired resources
    ///
    /// # Returns
    ///
    /// - `Ok(RunReport)`: every address has an outcome; failures are
    ///   reported as diagnostics, not as `Err`
    /// - `Err(Error)`: invalid desired set (unknown kind, cycle) or a
    ///   state store failure
    pub async fn apply(&self, desired: &[DesiredResource]) -> Result<RunReport> {
        let plan = self.plan(desired).await?;
        let waves = plan::waves(desired)?;
        let records = self.records().await?;
        let run_ctx = self.ctx.child();
        let mut report = RunReport::default();
        let mut failed: HashSet<String> = HashSet::new();

        for wave in waves {
            let mut steps = Vec::new();
            for i in wave {
                let res = &desired[i];
                if let Some(dep) = res.depends_on.iter().find(|d| failed.contains(*d)) {
                    let reason = format!("dependency {} failed", dep);
                    warn!("Skipping {}: {}", res.address, reason);
                    self.emit_event(EngineEvent::ResourceFailed {
                        address: res.address.clone(),
                        error: reason.clone(),
                    });
                    failed.insert(res.address.clone());
                    report.record(&res.address, Outcome::Skipped { reason }, Diagnostics::new());
                    continue;
                }
                if run_ctx.is_cancelled() {
                    failed.insert(res.address.clone());
                    report.record(
                        &res.address,
                        Outcome::Skipped { reason: "run cancelled".to_string() },
                        Diagnostics::new(),
                    );
                    continue;
                }

                let Some(change) = plan.get(&res.address) else {
                    continue;
                };
                let prior = records.get(&res.address);
                let step = match (&change.action, prior) {
                    (PlanAction::NoOp, _) => {
                        debug!("{} is up to date", res.address);
                        report.record(&res.address, Outcome::Unchanged, Diagnostics::new());
                        continue;
                    }
                    (PlanAction::Create, _) => Step::Create(StateBag::new(res.config.clone())),
                    (PlanAction::Update(_), Some(rec)) => Step::Update(StateBag::from_state(
                        rec.id.clone(),
                        rec.values.clone(),
                        res.config.clone(),
                    )),
                    (PlanAction::Replace(_), Some(rec)) => Step::Replace {
                        old: StateBag::from_state(rec.id.clone(), rec.values.clone(), ConfigMap::new()),
                        new: StateBag::new(res.config.clone()),
                    },
                    (action, None) => {
                        return Err(Error::Other(format!(
                            "planned {} for {} without a state record",
                            action.name(),
                            res.address
                        )));
                    }
                    (PlanAction::Delete, Some(_)) => continue,
                };
                let old_kind = prior.map(|r| r.kind.clone()).unwrap_or_else(|| res.kind.clone());
                steps.push((res.address.clone(), res.kind.clone(), old_kind, step));
            }

            let results = self.run_steps(&run_ctx, steps).await?;
            for result in results {
                self.finish(&run_ctx, result, &mut report).await?;
            }
            for (address, outcome) in &report.outcomes {
                if outcome.is_failure() {
                    failed.insert(address.clone());
                }
            }
        }

        let orphans: Vec<_> = plan
            .changes
            .iter()
            .filter(|c| c.action == PlanAction::Delete)
            .filter_map(|c| records.get(&c.address).map(|rec| (c, rec)))
            .map(|(c, rec)| {
                let bag = StateBag::from_state(rec.id.clone(), rec.values.clone(), ConfigMap::new());
                (c.address.clone(), c.kind.clone(), c.kind.clone(), Step::Delete(bag))
            })
            .collect();
        if !orphans.is_empty() {
            if run_ctx.is_cancelled() {
                for (address, ..) in orphans {
                    report.record(&address, Outcome::Skipped { reason: "run cancelled".to_string() }, Diagnostics::new());
                }
            } else {
                for result in self.run_steps(&run_ctx, orphans).await? {
                    self.finish(&run_ctx, result, &mut report).await?;
                }
            }
        }

        self.store.flush().await?;
        self.finished(&report);
        Ok(report)
    }

    /// Re-read every tracked instance and report drift
    ///
    /// Records are updated with the fresh view; vanished objects are
    /// removed from the store.
    pub async fn refresh(&self) -> Result<RunReport> {
        let records = self.records().await?;
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for (address, record) in records {
            let lifecycle = Lifecycle::new(self.registry.resource(&record.kind)?);
            let ctx = self.ctx.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let mut bag = StateBag::from_state(record.id.clone(), record.values.clone(), ConfigMap::new());
                let diags = lifecycle.read(&ctx, &mut bag).await;
                (address, record, bag, diags)
            });
        }

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (address, record, bag, diags) =
                joined.map_err(|e| Error::Other(format!("refresh task failed: {}", e)))?;
            self.forward_warnings(&address, &diags);

            if diags.has_errors() {
                self.emit_failed(&address, &diags);
                report.record(&address, Outcome::Failed, diags);
                continue;
            }

            let Some(id) = bag.id() else {
                info!("{} vanished", address);
                self.store.remove(&address).await?;
                self.emit_event(EngineEvent::Vanished { address: address.clone() });
                report.record(&address, Outcome::Vanished, diags);
                continue;
            };

            let schema = self.registry.schema_of(&record.kind)?;
            let drift = diff::diff(&schema, &record.values, bag.state());
            let paths = drift.paths();
            if !paths.is_empty() {
                info!("Drift detected on {}: {}", address, paths.join(", "));
                self.emit_event(EngineEvent::DriftDetected {
                    address: address.clone(),
                    paths: paths.clone(),
                });
            }
            self.store
                .put(&address, StateRecord::new(record.kind.clone(), id, bag.state().clone()))
                .await?;
            report.record(&address, Outcome::Refreshed { drift: paths }, diags);
        }

        self.store.flush().await?;
        self.finished(&report);
        Ok(report)
    }

    /// Run data source lookups
    ///
    /// Lookups are independent of each other and of the state store; they
    /// run concurrently, bounded by the engine's parallelism.
    ///
    /// # Returns
    ///
    /// - `Ok((outputs, RunReport))`: outputs of the successful lookups by
    ///   address; failed lookups are reported as diagnostics
    /// - `Err(Error)`: an unknown data source kind
    pub async fn read_data(&self, lookups: &[DesiredResource]) -> Result<(BTreeMap<String, ConfigMap>, RunReport)> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for lookup in lookups {
            let source = self.registry.data_source(&lookup.kind)?;
            let ctx = self.ctx.clone();
            let semaphore = semaphore.clone();
            let address = lookup.address.clone();
            let config = lookup.config.clone();
            self.emit_event(EngineEvent::ResourceStarted {
                address: address.clone(),
                action: "read".to_string(),
            });
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = read_lookup(source.as_ref(), &ctx, &config).await;
                (address, result)
            });
        }

        let mut outputs = BTreeMap::new();
        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (address, result) = joined.map_err(|e| Error::Other(format!("lookup task failed: {}", e)))?;
            match result {
                Ok(values) => {
                    self.emit_event(EngineEvent::ResourceSucceeded {
                        address: address.clone(),
                        action: "read".to_string(),
                    });
                    outputs.insert(address.clone(), values);
                    report.record(&address, Outcome::Read, Diagnostics::new());
                }
                Err(diags) => {
                    self.emit_failed(&address, &diags);
                    report.record(&address, Outcome::Failed, diags);
                }
            }
        }

        self.finished(&report);
        Ok((outputs, report))
    }

    /// Adopt an existing remote object under an address
    pub async fn import(&self, address: &str, kind: &str, id: &str, config: ConfigMap) -> Result<RunReport> {
        let lifecycle = Lifecycle::new(self.registry.resource(kind)?);
        let mut report = RunReport::default();

        self.emit_event(EngineEvent::ResourceStarted {
            address: address.to_string(),
            action: "import".to_string(),
        });
        let mut bag = StateBag::new(config);
        let diags = lifecycle.import(&self.ctx, id, &mut bag).await;
        self.forward_warnings(address, &diags);

        match bag.id() {
            Some(id) if !diags.has_errors() => {
                self.store
                    .put(address, StateRecord::new(kind, id, bag.state().clone()))
                    .await?;
                self.emit_event(EngineEvent::ResourceSucceeded {
                    address: address.to_string(),
                    action: "import".to_string(),
                });
                report.record(address, Outcome::Imported, diags);
            }
            _ => {
                self.emit_failed(address, &diags);
                report.record(address, Outcome::Failed, diags);
            }
        }

        self.store.flush().await?;
        self.finished(&report);
        Ok(report)
    }

    /// Cancel in-flight handlers; they abandon their retries promptly
    pub fn cancel(&self) {
        self.ctx.cancel_token().cancel();
    }

    async fn run_steps(
        &self,
        ctx: &OpContext,
        steps: Vec<(String, String, String, Step)>,
    ) -> Result<Vec<StepResult>> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();
        let mut order: HashMap<String, usize> = HashMap::new();

        for (i, (address, kind, old_kind, step)) in steps.into_iter().enumerate() {
            let lifecycle = Lifecycle::new(self.registry.resource(&kind)?);
            let old_lifecycle = Lifecycle::new(self.registry.resource(&old_kind)?);
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            order.insert(address.clone(), i);

            self.emit_event(EngineEvent::ResourceStarted {
                address: address.clone(),
                action: step.name().to_string(),
            });
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let action = step.name();
                let (bag, diags, kept_old) = run_step(&lifecycle, &old_lifecycle, &ctx, step).await;
                StepResult {
                    address,
                    kind,
                    action,
                    bag,
                    diags,
                    kept_old,
                }
            });
        }

        let mut results = Vec::with_capacity(order.len());
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.map_err(|e| Error::Other(format!("apply task failed: {}", e)))?);
        }
        results.sort_by_key(|r| order.get(&r.address).copied().unwrap_or(usize::MAX));
        Ok(results)
    }

    /// Record a step's result in the store and the report
    async fn finish(&self, ctx: &OpContext, result: StepResult, report: &mut RunReport) -> Result<()> {
        let StepResult {
            address,
            kind,
            action,
            bag,
            diags,
            kept_old,
        } = result;
        self.forward_warnings(&address, &diags);

        if diags.find_kind("fatal").is_some() {
            error!("Fatal error on {}; cancelling the run", address);
            ctx.cancel_token().cancel();
        }

        let failed = diags.has_errors();
        match bag.id() {
            _ if kept_old => {}
            Some(id) if action != "delete" => {
                self.store
                    .put(&address, StateRecord::new(kind, id, bag.state().clone()))
                    .await?
            }
            Some(_) => {}
            None => self.store.remove(&address).await?,
        }

        if failed {
            self.emit_failed(&address, &diags);
            report.record(&address, Outcome::Failed, diags);
            return Ok(());
        }

        let outcome = match (action, bag.id()) {
            ("create", _) => Outcome::Created,
            ("update", Some(_)) => Outcome::Updated,
            ("update", None) => Outcome::Vanished,
            ("replace", _) => Outcome::Replaced,
            _ => Outcome::Deleted,
        };
        if outcome == Outcome::Vanished {
            self.emit_event(EngineEvent::Vanished { address: address.clone() });
        } else {
            self.emit_event(EngineEvent::ResourceSucceeded {
                address: address.clone(),
                action: action.to_string(),
            });
        }
        report.record(&address, outcome, diags);
        Ok(())
    }

    async fn records(&self) -> Result<BTreeMap<String, StateRecord>> {
        let mut records = BTreeMap::new();
        for address in self.store.list().await? {
            if let Some(record) = self.store.get(&address).await? {
                records.insert(address, record);
            }
        }
        Ok(records)
    }

    fn forward_warnings(&self, address: &str, diags: &Diagnostics) {
        for warning in diags.warnings() {
            self.emit_event(EngineEvent::Warning {
                address: address.to_string(),
                message: warning.summary.clone(),
            });
        }
    }

    fn emit_failed(&self, address: &str, diags: &Diagnostics) {
        let error = diags
            .errors()
            .map(|d| d.summary.clone())
            .collect::<Vec<_>>()
            .join("; ");
        self.emit_event(EngineEvent::ResourceFailed {
            address: address.to_string(),
            error,
        });
    }

    fn finished(&self, report: &RunReport) {
        let failed = report.outcomes.values().filter(|o| o.is_failure()).count();
        let succeeded = report.outcomes.len() - failed;
        info!("Run finished: {} succeeded, {} failed", succeeded, failed);
        self.emit_event(EngineEvent::Finished { succeeded, failed });
    }

    /// Emit an engine event
    ///
    /// # Parameters
    ///
    /// - `event`: The event to emit
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Validate and run one lookup
async fn read_lookup(
    source: &dyn DataSource,
    ctx: &OpContext,
    config: &ConfigMap,
) -> std::result::Result<ConfigMap, Diagnostics> {
    let mut errors = schema::validate(config, &source.schema()).err().unwrap_or_default();
    if let Err(more) = source.validate_config(config) {
        errors.extend(more);
    }
    if !errors.is_empty() {
        return Err(errors
            .iter()
            .map(|e| Diagnostic::from(e).in_resource(source.kind(), None))
            .collect::<Vec<_>>()
            .into());
    }

    debug!("Reading data source {}", source.kind());
    source.read(ctx, config).await.map_err(|e| {
        warn!("Data source {} failed: {}", source.kind(), e);
        vec![Diagnostic::from(&e).in_resource(source.kind(), None)].into()
    })
}

async fn run_step(
    lifecycle: &Lifecycle,
    old_lifecycle: &Lifecycle,
    ctx: &OpContext,
    step: Step,
) -> (StateBag, Diagnostics, bool) {
    match step {
        Step::Create(mut bag) => {
            let diags = lifecycle.create(ctx, &mut bag).await;
            (bag, diags, false)
        }
        Step::Update(mut bag) => {
            let diags = lifecycle.update(ctx, &mut bag).await;
            (bag, diags, false)
        }
        Step::Delete(mut bag) => {
            let diags = lifecycle.delete(ctx, &mut bag).await;
            (bag, diags, false)
        }
        Step::Replace { mut old, mut new } => {
            let mut diags = old_lifecycle.delete(ctx, &mut old).await;
            if diags.has_errors() {
                return (old, diags, true);
            }
            diags.extend(lifecycle.create(ctx, &mut new).await);
            (new, diags, false)
        }
    }
}
