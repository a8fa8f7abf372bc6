// # ddprov-datadog
//
// Datadog resources for the ddprov infrastructure-as-code provider.
//
// ## Contents
//
// - `client`: `reqwest`-backed `ApiClient` for the v1 and v2 REST APIs
// - `data_sources`: read-only lookups over the list endpoints
// - `pagination`: page-by-page listing for v1 and v2 endpoints
// - `resources`: one module per managed resource kind
//
// ## Resource Rules
//
// - Handlers make single requests; retries belong to the core retry loop
// - Handlers never touch the state store; they fill the `StateBag`
// - Secrets the API masks are restored from configuration, never logged

pub mod client;
pub mod data_sources;
pub mod pagination;
pub mod resources;

pub use client::HttpApiClient;

use ddprov_core::traits::{ApiRequest, OpContext};
use ddprov_core::{Error, ResourceRegistry, Result};
use data_sources::{monitor::MonitorLookup, security_rules::SecurityRulesLookup, user::UserLookup};
use resources::{
    aws_lambda_arn::AwsLambdaArnResource, dashboard::DashboardResource, downtime::DowntimeResource,
    logs_pipeline::LogsPipelineResource, monitor::MonitorResource, security_filter::SecurityFilterResource,
    security_rule::SecurityRuleResource, slo::SloResource, suppression::SuppressionResource, user::UserResource,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Endpoint checking the API key
const VALIDATE_PATH: &str = "/api/v1/validate";

/// Register every Datadog resource kind and data source
pub fn register(registry: &ResourceRegistry) {
    registry.register_resource(Arc::new(DashboardResource::new()));
    registry.register_resource(Arc::new(MonitorResource::new()));
    registry.register_resource(Arc::new(DowntimeResource::new()));
    registry.register_resource(Arc::new(SloResource::new()));
    registry.register_resource(Arc::new(LogsPipelineResource::new()));
    registry.register_resource(Arc::new(SecurityFilterResource::new()));
    registry.register_resource(Arc::new(SecurityRuleResource::new()));
    registry.register_resource(Arc::new(SuppressionResource::new()));
    registry.register_resource(Arc::new(UserResource::new()));
    registry.register_resource(Arc::new(AwsLambdaArnResource::new()));

    let (integration, service) = resources::pagerduty::resources();
    registry.register_resource(Arc::new(integration));
    registry.register_resource(Arc::new(service));

    registry.register_data_source(Arc::new(UserLookup::new()));
    registry.register_data_source(Arc::new(MonitorLookup::new()));
    registry.register_data_source(Arc::new(SecurityRulesLookup::new()));
}

/// Verify the configured keys once at start-up
///
/// # Returns
///
/// - `Ok(())`: the API accepted the key
/// - `Err(Error::Fatal)`: the key was rejected
pub async fn validate_credentials(ctx: &OpContext) -> Result<()> {
    match ctx.call_json(ApiRequest::get(VALIDATE_PATH)).await {
        Ok(body) if body.get("valid").and_then(Value::as_bool) == Some(false) => {
            Err(Error::fatal("invalid or missing credentials provided"))
        }
        Ok(_) => {
            info!("Datadog credentials validated");
            Ok(())
        }
        Err(Error::RemoteRejected { status, body }) => Err(Error::fatal(format!(
            "invalid or missing credentials provided ({}): {}",
            status, body
        ))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_register_all_kinds() {
        let registry = ResourceRegistry::new();
        register(&registry);

        assert_eq!(
            registry.list_resources(),
            vec![
                "datadog_dashboard",
                "datadog_downtime",
                "datadog_integration_aws_lambda_arn",
                "datadog_integration_pagerduty",
                "datadog_integration_pagerduty_service_object",
                "datadog_logs_custom_pipeline",
                "datadog_monitor",
                "datadog_security_monitoring_filter",
                "datadog_security_monitoring_rule",
                "datadog_security_monitoring_suppression",
                "datadog_service_level_objective",
                "datadog_user",
            ]
        );
        assert!(registry.schema_of("datadog_monitor").is_ok());
        assert_eq!(
            registry.list_data_sources(),
            vec!["datadog_monitor", "datadog_security_monitoring_rules", "datadog_user"]
        );
        assert!(registry.data_source("datadog_user").is_ok());
    }
}
