// # ddprovd - provider driver
//
// Thin integration layer between an orchestrator and the reconcile engine.
// All resource and retry logic lives in ddprov-core and ddprov-datadog; this
// binary only wires them together.
//
// The driver is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime and logging
// 3. Registering resources and verifying credentials
// 4. Running one plan / apply / refresh / import / read pass
// 5. Writing the resulting document to stdout
//
// The driver never owns a state file: the orchestrator hands in the prior
// state and persists what comes out.
//
// ## Configuration
//
// ### Provider
// - `DD_API_KEY` / `DATADOG_API_KEY`, `DD_APP_KEY` / `DATADOG_APP_KEY`
// - `DD_HOST` / `DATADOG_HOST`
// - `DD_HTTP_CLIENT_RETRY_*`
//
// ### Run
// - `DDPROV_MODE`: plan, apply, refresh, import or read (default plan)
// - `DDPROV_MANIFEST`: path to the desired-resource manifest (JSON)
// - `DDPROV_STATE_IN`: path to the prior state document (optional)
// - `DDPROV_IMPORT_ADDRESS`, `DDPROV_IMPORT_KIND`, `DDPROV_IMPORT_ID`: import target
// - `DDPROV_PARALLELISM`: concurrent handlers (default 10)
// - `DDPROV_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export DD_API_KEY=...
// export DD_APP_KEY=...
// export DDPROV_MODE=apply
// export DDPROV_MANIFEST=./resources.json
// export DDPROV_STATE_IN=./state.json
//
// ddprovd > state.next.json
// ```

use anyhow::{Context, Result};
use ddprov_core::config::{EngineConfig, ProviderBlock, ProviderConfig};
use ddprov_core::engine::{DesiredResource, EngineEvent, Outcome, ReconcileEngine, RunReport};
use ddprov_core::traits::{ApiClient, OpContext, StateRecord, StateStore};
use ddprov_core::{MemoryStateStore, ResourceRegistry};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes
///
/// - 0: run finished without resource errors
/// - 1: configuration or startup error
/// - 2: runtime error (unexpected)
/// - 3: run finished but at least one resource failed
#[derive(Debug, Clone, Copy)]
enum DdprovExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
    ResourceErrors = 3,
}

impl From<DdprovExitCode> for ExitCode {
    fn from(code: DdprovExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Plan,
    Apply,
    Refresh,
    Import,
    Read,
}

impl Mode {
    fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plan" => Ok(Mode::Plan),
            "apply" => Ok(Mode::Apply),
            "refresh" => Ok(Mode::Refresh),
            "import" => Ok(Mode::Import),
            "read" => Ok(Mode::Read),
            other => anyhow::bail!(
                "DDPROV_MODE '{}' is not valid. Valid modes: plan, apply, refresh, import, read",
                other
            ),
        }
    }
}

/// Desired-resource manifest
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    /// Explicit provider block; unset fields fall back to the environment
    #[serde(default)]
    provider: ProviderBlock,
    #[serde(default)]
    resources: Vec<DesiredResource>,
    /// Data source lookups, answered by `DDPROV_MODE=read`
    #[serde(default)]
    data: Vec<DesiredResource>,
}

/// What to import, for `DDPROV_MODE=import`
#[derive(Debug)]
struct ImportTarget {
    address: String,
    kind: String,
    id: String,
}

/// Driver configuration
struct Config {
    mode: Mode,
    manifest_path: Option<String>,
    state_path: Option<String>,
    import: Option<ImportTarget>,
    parallelism: Option<usize>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mode = Mode::parse(&env::var("DDPROV_MODE").unwrap_or_else(|_| "plan".to_string()))?;
        let import = if mode == Mode::Import {
            Some(ImportTarget {
                address: env::var("DDPROV_IMPORT_ADDRESS").context("DDPROV_IMPORT_ADDRESS is required for import")?,
                kind: env::var("DDPROV_IMPORT_KIND").context("DDPROV_IMPORT_KIND is required for import")?,
                id: env::var("DDPROV_IMPORT_ID").context("DDPROV_IMPORT_ID is required for import")?,
            })
        } else {
            None
        };
        let parallelism = match env::var("DDPROV_PARALLELISM") {
            Ok(s) => Some(
                s.parse()
                    .with_context(|| format!("DDPROV_PARALLELISM must be a positive integer. Got: {}", s))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            mode,
            manifest_path: env::var("DDPROV_MANIFEST").ok().filter(|p| !p.is_empty()),
            state_path: env::var("DDPROV_STATE_IN").ok().filter(|p| !p.is_empty()),
            import,
            parallelism,
            log_level: env::var("DDPROV_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        if matches!(self.mode, Mode::Plan | Mode::Apply | Mode::Read) && self.manifest_path.is_none() {
            anyhow::bail!(
                "DDPROV_MANIFEST is required for plan, apply and read. \
                Set it via: export DDPROV_MANIFEST=./resources.json"
            );
        }
        if self.parallelism == Some(0) {
            anyhow::bail!("DDPROV_PARALLELISM must be > 0");
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DDPROV_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
        Ok(())
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DdprovExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DdprovExitCode::ConfigError.into();
    }

    // Logs go to stderr; stdout carries the state document
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdprovExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdprovExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(config).await {
            Ok(code) => code,
            Err(RunError::Config(e)) => {
                error!("Configuration error: {:#}", e);
                DdprovExitCode::ConfigError
            }
            Err(RunError::Runtime(e)) => {
                error!("Run failed: {:#}", e);
                DdprovExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Startup failures are configuration errors; everything after is runtime
enum RunError {
    Config(anyhow::Error),
    Runtime(anyhow::Error),
}

async fn run(config: Config) -> std::result::Result<DdprovExitCode, RunError> {
    let manifest = match &config.manifest_path {
        Some(path) => read_json::<Manifest>(path).map_err(RunError::Config)?,
        None => Manifest::default(),
    };
    let prior: BTreeMap<String, StateRecord> = match &config.state_path {
        Some(path) => read_json(path).map_err(RunError::Config)?,
        None => BTreeMap::new(),
    };

    let provider = ProviderConfig::from_env(manifest.provider.clone())
        .and_then(|c| c.validate().map(|_| c))
        .map_err(|e| RunError::Config(e.into()))?;
    info!("Starting ddprovd against {}", provider.base_url());

    let registry = Arc::new(ResourceRegistry::new());
    register_resources(&registry);
    info!(
        "{} resource kind(s) and {} data source(s) registered",
        registry.list_resources().len(),
        registry.list_data_sources().len()
    );

    let client = build_client(&provider).map_err(RunError::Config)?;
    let ctx = OpContext::new(client, provider.retry_policy());

    if provider.validate {
        verify_credentials(&ctx).await.map_err(RunError::Config)?;
    }

    let store = Arc::new(MemoryStateStore::from_records(prior));
    let mut engine_config = EngineConfig::default();
    if let Some(parallelism) = config.parallelism {
        engine_config.parallelism = parallelism;
    }
    let (engine, events) = ReconcileEngine::new(registry, store.clone() as Arc<dyn StateStore>, ctx.clone(), engine_config)
        .map_err(|e| RunError::Config(e.into()))?;

    let events_task = tokio::spawn(log_events(events));
    let cancel = ctx.cancel_token().clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling in-flight operations");
            cancel.cancel();
        }
    });

    let outcome = execute(&engine, &config, &manifest, &store).await;
    signal_task.abort();
    drop(engine);
    let _ = events_task.await;

    let report = outcome.map_err(RunError::Runtime)?;
    match report {
        Some(report) if report.has_errors() => {
            log_failures(&report);
            Ok(DdprovExitCode::ResourceErrors)
        }
        _ => Ok(DdprovExitCode::Success),
    }
}

/// Run the selected mode and write its document to stdout
async fn execute(
    engine: &ReconcileEngine,
    config: &Config,
    manifest: &Manifest,
    store: &MemoryStateStore,
) -> Result<Option<RunReport>> {
    let resources = &manifest.resources;
    let report = match config.mode {
        Mode::Plan => {
            let plan = engine.plan(resources).await?;
            info!(
                "Plan: {} to create, {} to update, {} to replace, {} to delete",
                plan.count("create"),
                plan.count("update"),
                plan.count("replace"),
                plan.count("delete")
            );
            write_stdout(&plan.to_json())?;
            return Ok(None);
        }
        Mode::Read => {
            let (outputs, report) = engine.read_data(&manifest.data).await?;
            summarize(&report);
            write_stdout(&serde_json::to_value(outputs)?)?;
            return Ok(Some(report));
        }
        Mode::Apply => engine.apply(resources).await?,
        Mode::Refresh => engine.refresh().await?,
        Mode::Import => {
            let target = config
                .import
                .as_ref()
                .context("import target missing")?;
            let known = resources
                .iter()
                .find(|r| r.address == target.address)
                .map(|r| r.config.clone())
                .unwrap_or_default();
            engine.import(&target.address, &target.kind, &target.id, known).await?
        }
    };

    summarize(&report);
    let state = store.snapshot().await;
    write_stdout(&serde_json::to_value(state)?)?;
    Ok(Some(report))
}

#[cfg(feature = "datadog")]
fn register_resources(registry: &ResourceRegistry) {
    ddprov_datadog::register(registry);
}

#[cfg(not(feature = "datadog"))]
fn register_resources(_registry: &ResourceRegistry) {
    warn!("Built without the datadog feature; no resource kinds available");
}

#[cfg(feature = "datadog")]
fn build_client(config: &ProviderConfig) -> Result<Arc<dyn ApiClient>> {
    Ok(Arc::new(ddprov_datadog::HttpApiClient::new(config)?))
}

#[cfg(not(feature = "datadog"))]
fn build_client(_config: &ProviderConfig) -> Result<Arc<dyn ApiClient>> {
    anyhow::bail!("built without an API client; enable the datadog feature")
}

#[cfg(feature = "datadog")]
async fn verify_credentials(ctx: &OpContext) -> Result<()> {
    Ok(ddprov_datadog::validate_credentials(ctx).await?)
}

#[cfg(not(feature = "datadog"))]
async fn verify_credentials(_ctx: &OpContext) -> Result<()> {
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path))
}

fn write_stdout(value: &serde_json::Value) -> Result<()> {
    use std::io::Write;
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Forward engine events to the log until the engine goes away
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::ResourceStarted { address, action } => debug!("{}: {} started", address, action),
            EngineEvent::ResourceSucceeded { address, action } => info!("{}: {} complete", address, action),
            EngineEvent::ResourceFailed { address, error } => error!("{}: {}", address, error),
            EngineEvent::Warning { address, message } => warn!("{}: {}", address, message),
            EngineEvent::DriftDetected { address, paths } => {
                warn!("{}: drift on {}", address, paths.join(", "))
            }
            EngineEvent::Vanished { address } => warn!("{}: removed outside of ddprov", address),
            other => debug!("{:?}", other),
        }
    }
}

fn summarize(report: &RunReport) {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for outcome in report.outcomes.values() {
        let key = match outcome {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Replaced => "replaced",
            Outcome::Deleted => "deleted",
            Outcome::Unchanged => "unchanged",
            Outcome::Imported => "imported",
            Outcome::Read => "read",
            Outcome::Refreshed { .. } => "refreshed",
            Outcome::Vanished => "vanished",
            Outcome::Failed => "failed",
            Outcome::Skipped { .. } => "skipped",
        };
        *counts.entry(key).or_default() += 1;
    }
    let summary: Vec<String> = counts.iter().map(|(k, n)| format!("{} {}", n, k)).collect();
    info!("Run finished: {}", summary.join(", "));
}

fn log_failures(report: &RunReport) {
    for (address, diags) in &report.diagnostics {
        for diag in diags.errors() {
            match &diag.detail {
                Some(detail) => error!("{}: {}: {}", address, diag.summary, detail),
                None => error!("{}: {}", address, diag.summary),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("APPLY").unwrap(), Mode::Apply);
        assert_eq!(Mode::parse("import").unwrap(), Mode::Import);
        assert_eq!(Mode::parse("read").unwrap(), Mode::Read);
        assert!(Mode::parse("destroy").is_err());
    }

    #[test]
    fn test_manifest_parse() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "provider": {"api_url": "https://api.datadoghq.eu", "validate": false},
                "resources": [
                    {"address": "datadog_monitor.cpu", "kind": "datadog_monitor", "config": {"name": "cpu"}}
                ],
                "data": [
                    {"address": "data.datadog_user.ops", "kind": "datadog_user", "config": {"filter": "ops@example.com"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.provider.validate, Some(false));
        assert_eq!(manifest.resources.len(), 1);
        assert_eq!(manifest.resources[0].kind, "datadog_monitor");
        assert_eq!(manifest.data[0].address, "data.datadog_user.ops");
    }

    #[test]
    fn test_read_mode_needs_a_manifest() {
        let config = Config {
            mode: Mode::Read,
            manifest_path: None,
            state_path: None,
            import: None,
            parallelism: None,
            log_level: "info".to_string(),
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("required for plan, apply and read"), "{}", err);
    }

    #[test]
    fn test_manifest_rejects_unknown_keys() {
        assert!(serde_json::from_str::<Manifest>(r#"{"resource": []}"#).is_err());
    }
}
