//! `datadog_integration_aws_lambda_arn`
//!
//! Attaches a log forwarder Lambda to an AWS integration account. There is
//! no scalar identifier on the server; the instance id is
//! `<account_id> <lambda_arn>`. Every field forces replacement, so Update is
//! never planned.

use async_trait::async_trait;
use ddprov_core::error::{Error, Result};
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::{debug, info};

const LOGS_PATH: &str = "/api/v1/integration/aws/logs";

pub const KIND: &str = "datadog_integration_aws_lambda_arn";

pub fn schema() -> Schema {
    Schema::new().fields([
        Field::string("account_id")
            .required()
            .force_new()
            .describe("Your AWS Account ID without dashes."),
        Field::string("lambda_arn")
            .required()
            .force_new()
            .describe("The ARN of the Datadog forwarder Lambda."),
    ])
}

/// Malformed composite identifier
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("error extracting account ID and Lambda ARN from an AWS integration id: {0}")]
pub struct LambdaArnIdError(pub String);

/// Split `<account_id> <lambda_arn>`; exactly one space is allowed
pub fn parse_id(id: &str) -> std::result::Result<(&str, &str), LambdaArnIdError> {
    let mut parts = id.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(account), Some(arn), None) => Ok((account, arn)),
        _ => Err(LambdaArnIdError(id.to_string())),
    }
}

pub fn format_id(account_id: &str, lambda_arn: &str) -> String {
    format!("{} {}", account_id, lambda_arn)
}

/// Request body for attach and detach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAndLambda {
    pub account_id: String,
    pub lambda_arn: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LogsLambda {
    #[serde(default)]
    arn: String,
}

/// One account entry of the log integration listing
#[derive(Debug, Clone, Default, Deserialize)]
struct LogsAccount {
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    lambdas: Vec<LogsLambda>,
}

/// Whether a listing holds the pair
fn is_attached(listing: &Value, pair: &AccountAndLambda) -> Result<bool> {
    let accounts: Vec<LogsAccount> = serde_json::from_value(listing.clone())?;
    Ok(accounts
        .iter()
        .filter(|a| a.account_id == pair.account_id)
        .any(|a| a.lambdas.iter().any(|l| l.arn == pair.lambda_arn)))
}

fn pair_from_id(id: &str) -> Result<AccountAndLambda> {
    let (account_id, lambda_arn) = parse_id(id).map_err(|e| Error::config(e.to_string()))?;
    Ok(AccountAndLambda {
        account_id: account_id.to_string(),
        lambda_arn: lambda_arn.to_string(),
    })
}

fn pair_from_config(config: &ConfigMap) -> Result<AccountAndLambda> {
    let f = Fields::new(config);
    Ok(AccountAndLambda {
        account_id: f.required_str("account_id")?.to_string(),
        lambda_arn: f.required_str("lambda_arn")?.to_string(),
    })
}

/// Resource implementation for AWS log forwarder Lambdas
pub struct AwsLambdaArnResource {
    descriptor: ResourceDescriptor,
    write_lock: Mutex<()>,
}

impl AwsLambdaArnResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
            write_lock: Mutex::new(()),
        }
    }
}

impl Default for AwsLambdaArnResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for AwsLambdaArnResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let pair = pair_from_config(bag.config())?;
        let _guard = self.write_lock.lock().await;
        let response = ctx.call_json(ApiRequest::post(LOGS_PATH, serde_json::to_value(&pair)?)).await?;
        if response.get("status").and_then(Value::as_str) == Some("error") {
            return Err(Error::rejected(200, response.to_string()));
        }
        info!("Lambda {} attached to AWS account {}", pair.lambda_arn, pair.account_id);
        bag.set_id(format_id(&pair.account_id, &pair.lambda_arn));
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let pair = pair_from_id(&id)?;
        let listing = ctx.call_json(ApiRequest::get(LOGS_PATH)).await?;
        if !is_attached(&listing, &pair)? {
            debug!("Lambda {} is no longer attached", pair.lambda_arn);
            return Err(Error::not_found(id));
        }
        let mut state = ConfigMap::new();
        state.insert("account_id".to_string(), pair.account_id.into());
        state.insert("lambda_arn".to_string(), pair.lambda_arn.into());
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, _ctx: &OpContext, _bag: &mut StateBag) -> Result<()> {
        Err(Error::fatal("aws_lambda_arn does not support update; every change forces a new resource"))
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let pair = pair_from_id(bag.require_id()?)?;
        let _guard = self.write_lock.lock().await;
        ctx.call(ApiRequest::delete(LOGS_PATH).with_body(serde_json::to_value(&pair)?)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ARN: &str = "arn:aws:lambda:us-east-1:123456789:function:datadog-forwarder";

    #[test]
    fn test_parse_id() {
        let id = format_id("123456789", ARN);
        assert_eq!(parse_id(&id).unwrap(), ("123456789", ARN));

        for bad in ["123456789", "123456789 extra bits"] {
            assert_eq!(
                parse_id(bad).unwrap_err().to_string(),
                format!("error extracting account ID and Lambda ARN from an AWS integration id: {}", bad)
            );
        }
    }

    #[test]
    fn test_listing_lookup() {
        let pair = AccountAndLambda {
            account_id: "123456789".to_string(),
            lambda_arn: ARN.to_string(),
        };
        let listing = json!([
            {"account_id": "111", "lambdas": [{"arn": ARN}], "services": []},
            {"account_id": "123456789", "lambdas": [{"arn": ARN}], "services": ["lambda"]}
        ]);
        assert!(is_attached(&listing, &pair).unwrap());
        assert!(!is_attached(&json!([{"account_id": "123456789", "lambdas": []}]), &pair).unwrap());
        assert!(!is_attached(&json!([]), &pair).unwrap());
    }
}
