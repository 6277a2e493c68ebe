use anyhow::Result;
use aws_sdk_s3::{
  config::retry::RetryConfig,
  error::{ProvideErrorMetadata, SdkError},
  Client,
};
use tracing::{debug, warn};

use crate::{
  catalog::{CheckMetadata, ComplianceControl, Severity},
  policy::PolicyDocument,
  report::{CheckResult, ComplianceReport},
};

/// Get the S3 client
async fn get_client(region: Option<String>) -> Result<Client> {
  let config = crate::get_sdk_config(region).await?;
  let client = Client::from_conf(
    aws_sdk_s3::config::Builder::from(&config)
      .retry_config(RetryConfig::standard().with_max_attempts(3))
      .build(),
  );
  Ok(client)
}

pub fn secure_transport() -> CheckMetadata {
  CheckMetadata {
    id: "s3-secure-transport",
    title: "S3 bucket policies deny insecure transport",
    description: "Checks that every bucket carries a policy with a Deny statement conditioned on \
                  aws:SecureTransport being false, so requests over plain HTTP are rejected",
    controls: vec![ComplianceControl::new("2.1.2", "CIS-AWS-Foundations-Benchmark-v1.4")],
    severity: Severity::Medium,
    execute: |region| Box::pin(run_secure_transport(region)),
    service_name: Some("Amazon Simple Storage Service"),
    short_service_name: Some("s3"),
  }
}

#[derive(Debug)]
enum PolicyFetch {
  Document(String),
  Missing,
  Error(String),
}

#[derive(Debug)]
struct BucketSnapshot {
  name: Option<String>,
  policy: PolicyFetch,
}

pub async fn run_secure_transport(region: Option<String>) -> ComplianceReport {
  match fetch_bucket_policies(region).await {
    Ok(buckets) => evaluate_secure_transport(&buckets),
    Err(e) => ComplianceReport::from_error("S3", format!("Error checking S3 bucket policies: {e}")),
  }
}

async fn fetch_bucket_policies(region: Option<String>) -> Result<Vec<BucketSnapshot>> {
  let client = get_client(region).await?;

  let mut names = Vec::new();
  let mut pages = client.list_buckets().into_paginator().send();
  while let Some(page) = pages.next().await {
    for bucket in page?.buckets() {
      names.push(bucket.name().map(String::from));
    }
  }

  let mut buckets = Vec::new();
  for name in names {
    let Some(name) = name else {
      buckets.push(BucketSnapshot {
        name: None,
        policy: PolicyFetch::Missing,
      });
      continue;
    };

    // A failed policy fetch for one bucket must not suppress the others
    let policy = match client.get_bucket_policy().bucket(&name).send().await {
      Ok(response) => match response.policy() {
        Some(document) => PolicyFetch::Document(document.to_string()),
        None => PolicyFetch::Missing,
      },
      Err(e) if is_no_such_policy(&e) => PolicyFetch::Missing,
      Err(e) => {
        warn!("Failed to get bucket policy for {name}: {e}");
        PolicyFetch::Error(format!("Error getting bucket policy: {e}"))
      }
    };

    buckets.push(BucketSnapshot { name: Some(name), policy });
  }

  debug!("Evaluating {} buckets", buckets.len());
  Ok(buckets)
}

fn is_no_such_policy(error: &SdkError<aws_sdk_s3::operation::get_bucket_policy::GetBucketPolicyError>) -> bool {
  error
    .as_service_error()
    .and_then(|e| e.code())
    .is_some_and(|code| code == "NoSuchBucketPolicy")
}

fn evaluate_secure_transport(buckets: &[BucketSnapshot]) -> ComplianceReport {
  if buckets.is_empty() {
    return ComplianceReport::new(vec![CheckResult::not_applicable("S3", "No S3 buckets found")]);
  }

  let mut checks = Vec::new();
  for bucket in buckets {
    let Some(name) = bucket.name.clone() else {
      checks.push(CheckResult::error("Unknown bucket", None, "Bucket is missing a name"));
      continue;
    };

    match &bucket.policy {
      PolicyFetch::Error(message) => checks.push(CheckResult::error(name, None, message.clone())),
      PolicyFetch::Missing => checks.push(CheckResult::fail(
        name,
        None,
        "Bucket has no policy denying insecure transport",
      )),
      PolicyFetch::Document(document) => match PolicyDocument::parse(document) {
        Err(e) => checks.push(CheckResult::error(name, None, format!("Error parsing bucket policy: {e}"))),
        Ok(policy) => {
          let denies = policy.statements().any(|s| s.is_deny() && s.denies_insecure_transport());
          if denies {
            checks.push(CheckResult::pass(name, None));
          } else {
            checks.push(CheckResult::fail(
              name,
              None,
              "Bucket policy does not deny insecure transport",
            ));
          }
        }
      },
    }
  }

  ComplianceReport::new(checks)
}
