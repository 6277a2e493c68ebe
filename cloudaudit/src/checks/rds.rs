use std::collections::HashSet;

use anyhow::Result;
use aws_sdk_rds::{config::retry::RetryConfig, Client};
use tracing::debug;

use crate::{
  catalog::{CheckMetadata, ComplianceControl, Severity},
  report::{CheckResult, ComplianceReport},
};

/// Get the RDS client
async fn get_client(region: Option<String>) -> Result<Client> {
  let config = crate::get_sdk_config(region).await?;
  let client = Client::from_conf(
    aws_sdk_rds::config::Builder::from(&config)
      .retry_config(RetryConfig::standard().with_max_attempts(3))
      .build(),
  );
  Ok(client)
}

pub fn cluster_deletion_protection() -> CheckMetadata {
  CheckMetadata {
    id: "rds-cluster-deletion-protection",
    title: "RDS clusters and instances have deletion protection enabled",
    description: "Checks that every RDS cluster has deletion protection enabled on the cluster itself or on one of \
                  its member instances, and that every standalone RDS instance has deletion protection enabled",
    controls: vec![ComplianceControl::new(
      "RDS.7",
      "AWS-Foundational-Security-Best-Practices",
    )],
    severity: Severity::High,
    execute: |region| Box::pin(run_cluster_deletion_protection(region)),
    service_name: Some("Amazon Relational Database Service"),
    short_service_name: Some("rds"),
  }
}

pub fn auto_minor_version_upgrade() -> CheckMetadata {
  CheckMetadata {
    id: "rds-auto-minor-version-upgrade",
    title: "RDS instances have automatic minor version upgrades enabled",
    description: "Checks that every RDS instance has automatic minor version upgrades enabled and no pending \
                  maintenance actions outstanding",
    controls: vec![ComplianceControl::new(
      "RDS.13",
      "AWS-Foundational-Security-Best-Practices",
    )],
    severity: Severity::Medium,
    execute: |region| Box::pin(run_auto_minor_version_upgrade(region)),
    service_name: Some("Amazon Relational Database Service"),
    short_service_name: Some("rds"),
  }
}

pub fn event_subscription() -> CheckMetadata {
  CheckMetadata {
    id: "rds-event-subscription",
    title: "RDS event subscriptions are enabled for instance events",
    description: "Checks that RDS event subscriptions exist, are enabled, and cover database instance event sources",
    controls: vec![ComplianceControl::new(
      "RDS.20",
      "AWS-Foundational-Security-Best-Practices",
    )],
    severity: Severity::Low,
    execute: |region| Box::pin(run_event_subscription(region)),
    service_name: Some("Amazon Relational Database Service"),
    short_service_name: Some("rds"),
  }
}

#[derive(Debug)]
struct ClusterSnapshot {
  name: Option<String>,
  arn: Option<String>,
  deletion_protection: bool,
  member_ids: Vec<String>,
}

#[derive(Debug)]
struct InstanceSnapshot {
  id: Option<String>,
  arn: Option<String>,
  deletion_protection: bool,
  cluster_id: Option<String>,
}

pub async fn run_cluster_deletion_protection(region: Option<String>) -> ComplianceReport {
  match fetch_deletion_protection(region).await {
    Ok((clusters, instances)) => evaluate_cluster_deletion_protection(&clusters, &instances),
    Err(e) => ComplianceReport::from_error("RDS", format!("Error checking RDS deletion protection: {e}")),
  }
}

async fn fetch_deletion_protection(region: Option<String>) -> Result<(Vec<ClusterSnapshot>, Vec<InstanceSnapshot>)> {
  let client = get_client(region).await?;

  let mut clusters = Vec::new();
  let mut pages = client.describe_db_clusters().into_paginator().send();
  while let Some(page) = pages.next().await {
    for cluster in page?.db_clusters() {
      clusters.push(ClusterSnapshot {
        name: cluster.db_cluster_identifier().map(String::from),
        arn: cluster.db_cluster_arn().map(String::from),
        deletion_protection: cluster.deletion_protection().unwrap_or(false),
        member_ids: cluster
          .db_cluster_members()
          .iter()
          .filter_map(|m| m.db_instance_identifier().map(String::from))
          .collect(),
      });
    }
  }

  let instances = fetch_instances(&client).await?;
  debug!(
    "Evaluating deletion protection for {} clusters and {} instances",
    clusters.len(),
    instances.len()
  );

  Ok((clusters, instances))
}

async fn fetch_instances(client: &Client) -> Result<Vec<InstanceSnapshot>> {
  let mut instances = Vec::new();
  let mut pages = client.describe_db_instances().into_paginator().send();
  while let Some(page) = pages.next().await {
    for instance in page?.db_instances() {
      instances.push(InstanceSnapshot {
        id: instance.db_instance_identifier().map(String::from),
        arn: instance.db_instance_arn().map(String::from),
        deletion_protection: instance.deletion_protection().unwrap_or(false),
        cluster_id: instance.db_cluster_identifier().map(String::from),
      });
    }
  }
  Ok(instances)
}

/// Protective OR: a cluster is compliant when it or any of its member
/// instances carries deletion protection. Standalone instances are
/// evaluated individually.
fn evaluate_cluster_deletion_protection(
  clusters: &[ClusterSnapshot],
  instances: &[InstanceSnapshot],
) -> ComplianceReport {
  let mut checks = Vec::new();

  for cluster in clusters {
    let name = cluster.name.clone().unwrap_or_else(|| "Unknown cluster".to_string());
    let member_protected = instances
      .iter()
      .filter(|i| i.id.as_ref().is_some_and(|id| cluster.member_ids.contains(id)))
      .any(|i| i.deletion_protection);

    if cluster.deletion_protection || member_protected {
      checks.push(CheckResult::pass(name, cluster.arn.clone()));
    } else {
      checks.push(CheckResult::fail(
        name,
        cluster.arn.clone(),
        "Neither RDS cluster nor its instances have deletion protection enabled",
      ));
    }
  }

  for instance in instances.iter().filter(|i| i.cluster_id.is_none()) {
    let name = instance.id.clone().unwrap_or_else(|| "Unknown instance".to_string());
    if instance.deletion_protection {
      checks.push(CheckResult::pass(name, instance.arn.clone()));
    } else {
      checks.push(CheckResult::fail(
        name,
        instance.arn.clone(),
        "RDS instance does not have deletion protection enabled",
      ));
    }
  }

  if checks.is_empty() {
    return ComplianceReport::new(vec![CheckResult::not_applicable(
      "RDS",
      "No RDS clusters or instances found in the region",
    )]);
  }

  ComplianceReport::new(checks)
}

#[derive(Debug)]
struct UpgradeSnapshot {
  id: Option<String>,
  arn: Option<String>,
  auto_minor_version_upgrade: bool,
  pending_maintenance: bool,
}

pub async fn run_auto_minor_version_upgrade(region: Option<String>) -> ComplianceReport {
  match fetch_upgrade_state(region).await {
    Ok(instances) => evaluate_auto_minor_version_upgrade(&instances),
    Err(e) => ComplianceReport::from_error("RDS", format!("Error checking RDS auto minor version upgrade: {e}")),
  }
}

async fn fetch_upgrade_state(region: Option<String>) -> Result<Vec<UpgradeSnapshot>> {
  let client = get_client(region).await?;

  let mut pending: HashSet<String> = HashSet::new();
  let mut pages = client.describe_pending_maintenance_actions().into_paginator().send();
  while let Some(page) = pages.next().await {
    for action in page?.pending_maintenance_actions() {
      if let Some(arn) = action.resource_identifier() {
        pending.insert(arn.to_string());
      }
    }
  }

  let mut instances = Vec::new();
  let mut pages = client.describe_db_instances().into_paginator().send();
  while let Some(page) = pages.next().await {
    for instance in page?.db_instances() {
      let arn = instance.db_instance_arn().map(String::from);
      instances.push(UpgradeSnapshot {
        id: instance.db_instance_identifier().map(String::from),
        pending_maintenance: arn.as_ref().is_some_and(|a| pending.contains(a)),
        arn,
        auto_minor_version_upgrade: instance.auto_minor_version_upgrade().unwrap_or(false),
      });
    }
  }

  Ok(instances)
}

fn evaluate_auto_minor_version_upgrade(instances: &[UpgradeSnapshot]) -> ComplianceReport {
  if instances.is_empty() {
    return ComplianceReport::new(vec![CheckResult::not_applicable(
      "RDS",
      "No RDS instances found in the region",
    )]);
  }

  let mut checks = Vec::new();
  for instance in instances {
    let name = instance.id.clone().unwrap_or_else(|| "Unknown instance".to_string());

    // Pending maintenance is correlated by ARN, so an instance without one
    // cannot be evaluated
    if instance.arn.is_none() {
      checks.push(CheckResult::error(name, None, "RDS instance is missing an ARN"));
      continue;
    }

    let mut reasons = Vec::new();
    if !instance.auto_minor_version_upgrade {
      reasons.push("Auto minor version upgrade is not enabled");
    }
    if instance.pending_maintenance {
      reasons.push("Instance has pending maintenance actions");
    }

    if reasons.is_empty() {
      checks.push(CheckResult::pass(name, instance.arn.clone()));
    } else {
      checks.push(CheckResult::fail(name, instance.arn.clone(), reasons.join("; ")));
    }
  }

  ComplianceReport::new(checks)
}

#[derive(Debug)]
struct SubscriptionSnapshot {
  id: Option<String>,
  arn: Option<String>,
  enabled: bool,
  source_type: Option<String>,
}

pub async fn run_event_subscription(region: Option<String>) -> ComplianceReport {
  match fetch_subscriptions(region).await {
    Ok(subscriptions) => evaluate_event_subscription(&subscriptions),
    Err(e) => ComplianceReport::from_error("RDS", format!("Error checking RDS event subscriptions: {e}")),
  }
}

async fn fetch_subscriptions(region: Option<String>) -> Result<Vec<SubscriptionSnapshot>> {
  let client = get_client(region).await?;

  let mut subscriptions = Vec::new();
  let mut pages = client.describe_event_subscriptions().into_paginator().send();
  while let Some(page) = pages.next().await {
    for subscription in page?.event_subscriptions_list() {
      subscriptions.push(SubscriptionSnapshot {
        id: subscription.cust_subscription_id().map(String::from),
        arn: subscription.event_subscription_arn().map(String::from),
        enabled: subscription.enabled().unwrap_or(false),
        source_type: subscription.source_type().map(String::from),
      });
    }
  }

  Ok(subscriptions)
}

/// Event subscriptions are a mandatory detective control, so having none
/// at all is a failure rather than a non-applicable scope.
///
/// Subscriptions without an identifier are skipped without emitting a
/// result, matching the historical behavior of this check
fn evaluate_event_subscription(subscriptions: &[SubscriptionSnapshot]) -> ComplianceReport {
  if subscriptions.is_empty() {
    return ComplianceReport::new(vec![CheckResult::fail(
      "RDS event subscriptions",
      None,
      "No RDS event subscriptions found in the region",
    )]);
  }

  let mut checks = Vec::new();
  for subscription in subscriptions {
    let Some(id) = &subscription.id else {
      continue;
    };

    let covers_instances = match &subscription.source_type {
      // No source type means the subscription covers all sources
      None => true,
      Some(source) => source == "db-instance",
    };

    let mut reasons = Vec::new();
    if !subscription.enabled {
      reasons.push("Event subscription is not enabled");
    }
    if !covers_instances {
      reasons.push("Event subscription does not cover db-instance events");
    }

    if reasons.is_empty() {
      checks.push(CheckResult::pass(id.clone(), subscription.arn.clone()));
    } else {
      checks.push(CheckResult::fail(id.clone(), subscription.arn.clone(), reasons.join("; ")));
    }
  }

  ComplianceReport::new(checks)
}
