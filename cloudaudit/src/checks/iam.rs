use anyhow::Result;
use aws_sdk_iam::{config::retry::RetryConfig, types::PolicyScopeType, Client};
use tracing::{debug, warn};

use crate::{
  catalog::{CheckMetadata, ComplianceControl, Severity},
  policy::PolicyDocument,
  report::{CheckResult, ComplianceReport},
};

/// KMS actions that must not be combined with `Resource: "*"`
const DECRYPT_ACTIONS: [&str; 2] = ["kms:Decrypt", "kms:ReEncryptFrom"];

/// Get the IAM client
async fn get_client(region: Option<String>) -> Result<Client> {
  let config = crate::get_sdk_config(region).await?;
  let client = Client::from_conf(
    aws_sdk_iam::config::Builder::from(&config)
      .retry_config(RetryConfig::standard().with_max_attempts(3))
      .build(),
  );
  Ok(client)
}

pub fn no_kms_decrypt_wildcard() -> CheckMetadata {
  CheckMetadata {
    id: "iam-no-kms-decrypt-wildcard",
    title: "Customer managed IAM policies do not allow KMS decryption on all keys",
    description: "Checks that no customer managed IAM policy grants kms:Decrypt or kms:ReEncryptFrom over \
                  Resource \"*\", which would allow decryption with any key in the account",
    controls: vec![ComplianceControl::new(
      "KMS.1",
      "AWS-Foundational-Security-Best-Practices",
    )],
    severity: Severity::High,
    execute: |region| Box::pin(run_no_kms_decrypt_wildcard(region)),
    service_name: Some("AWS Identity and Access Management"),
    short_service_name: Some("iam"),
  }
}

#[derive(Debug)]
struct PolicySnapshot {
  name: Option<String>,
  arn: Option<String>,
  /// URL-encoded default version document; an Err here is isolated to this policy
  document: std::result::Result<String, String>,
}

pub async fn run_no_kms_decrypt_wildcard(region: Option<String>) -> ComplianceReport {
  match fetch_policies(region).await {
    Ok(policies) => evaluate_no_kms_decrypt_wildcard(&policies),
    Err(e) => ComplianceReport::from_error("IAM", format!("Error checking IAM policies: {e}")),
  }
}

async fn fetch_policies(region: Option<String>) -> Result<Vec<PolicySnapshot>> {
  let client = get_client(region).await?;

  let mut listed = Vec::new();
  let mut pages = client
    .list_policies()
    .scope(PolicyScopeType::Local)
    .into_paginator()
    .send();
  while let Some(page) = pages.next().await {
    for policy in page?.policies() {
      listed.push((
        policy.policy_name().map(String::from),
        policy.arn().map(String::from),
        policy.default_version_id().map(String::from),
      ));
    }
  }
  debug!("Evaluating {} customer managed policies", listed.len());

  let mut policies = Vec::new();
  for (name, arn, version_id) in listed {
    let document = match (&arn, &version_id) {
      (Some(arn), Some(version_id)) => {
        // One policy's version fetch failing must not suppress the others
        match client
          .get_policy_version()
          .policy_arn(arn)
          .version_id(version_id)
          .send()
          .await
        {
          Ok(response) => match response.policy_version().and_then(|v| v.document()) {
            Some(document) => Ok(document.to_string()),
            None => Err("Policy version has no document".to_string()),
          },
          Err(e) => {
            warn!("Failed to get policy version for {arn}: {e}");
            Err(format!("Error getting policy version: {e}"))
          }
        }
      }
      _ => Err("Policy is missing an ARN or default version".to_string()),
    };

    policies.push(PolicySnapshot { name, arn, document });
  }

  Ok(policies)
}

fn grants_wildcard_decrypt(policy: &PolicyDocument) -> bool {
  policy.statements().any(|s| {
    s.is_allow() && s.covers_all_resources() && DECRYPT_ACTIONS.iter().any(|action| s.allows_action(action))
  })
}

fn evaluate_no_kms_decrypt_wildcard(policies: &[PolicySnapshot]) -> ComplianceReport {
  if policies.is_empty() {
    return ComplianceReport::new(vec![CheckResult::not_applicable(
      "IAM",
      "No customer managed IAM policies found",
    )]);
  }

  let mut checks = Vec::new();
  for policy in policies {
    let name = policy.name.clone().unwrap_or_else(|| "Unknown policy".to_string());

    let document = match &policy.document {
      Ok(document) => document,
      Err(message) => {
        checks.push(CheckResult::error(name, policy.arn.clone(), message.clone()));
        continue;
      }
    };

    match PolicyDocument::parse_url_encoded(document) {
      Err(e) => checks.push(CheckResult::error(
        name,
        policy.arn.clone(),
        format!("Error parsing policy document: {e}"),
      )),
      Ok(parsed) => {
        if grants_wildcard_decrypt(&parsed) {
          checks.push(CheckResult::fail(
            name,
            policy.arn.clone(),
            "Policy allows KMS decryption actions on all resources",
          ));
        } else {
          checks.push(CheckResult::pass(name, policy.arn.clone()));
        }
      }
    }
  }

  ComplianceReport::new(checks)
}
