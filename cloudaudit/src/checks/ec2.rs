use anyhow::Result;
use aws_sdk_ec2::{config::retry::RetryConfig, Client};
use tracing::debug;

use crate::{
  catalog::{CheckMetadata, ComplianceControl, Severity},
  report::{CheckResult, ComplianceReport},
};

const SSH_PORT: i32 = 22;

/// Get the EC2 client
async fn get_client(region: Option<String>) -> Result<Client> {
  let config = crate::get_sdk_config(region).await?;
  let client = Client::from_conf(
    aws_sdk_ec2::config::Builder::from(&config)
      .retry_config(RetryConfig::standard().with_max_attempts(3))
      .build(),
  );
  Ok(client)
}

pub fn restricted_ssh() -> CheckMetadata {
  CheckMetadata {
    id: "ec2-restricted-ssh",
    title: "Security groups do not allow unrestricted SSH access",
    description: "Checks that no security group ingress rule admits 0.0.0.0/0 or ::/0 to TCP port 22",
    controls: vec![ComplianceControl::new("5.2", "CIS-AWS-Foundations-Benchmark-v1.4")],
    severity: Severity::High,
    execute: |region| Box::pin(run_restricted_ssh(region)),
    service_name: Some("Amazon Elastic Compute Cloud"),
    short_service_name: Some("ec2"),
  }
}

pub fn ebs_encryption_by_default() -> CheckMetadata {
  CheckMetadata {
    id: "ec2-ebs-encryption-by-default",
    title: "EBS encryption is enabled by default",
    description: "Checks that new EBS volumes in the region are encrypted by default",
    controls: vec![ComplianceControl::new("2.2.1", "CIS-AWS-Foundations-Benchmark-v1.4")],
    severity: Severity::Medium,
    execute: |region| Box::pin(run_ebs_encryption_by_default(region)),
    service_name: Some("Amazon Elastic Compute Cloud"),
    short_service_name: Some("ec2"),
  }
}

#[derive(Debug)]
struct IngressRule {
  protocol: Option<String>,
  from_port: Option<i32>,
  to_port: Option<i32>,
  cidrs: Vec<String>,
}

#[derive(Debug)]
struct SecurityGroupSnapshot {
  id: Option<String>,
  name: Option<String>,
  rules: Vec<IngressRule>,
}

pub async fn run_restricted_ssh(region: Option<String>) -> ComplianceReport {
  match fetch_security_groups(region).await {
    Ok(groups) => evaluate_restricted_ssh(&groups),
    Err(e) => ComplianceReport::from_error("EC2", format!("Error checking EC2 security groups: {e}")),
  }
}

async fn fetch_security_groups(region: Option<String>) -> Result<Vec<SecurityGroupSnapshot>> {
  let client = get_client(region).await?;

  let mut groups = Vec::new();
  let mut pages = client.describe_security_groups().into_paginator().send();
  while let Some(page) = pages.next().await {
    for group in page?.security_groups() {
      let rules = group
        .ip_permissions()
        .iter()
        .map(|p| {
          let mut cidrs: Vec<String> = p.ip_ranges().iter().filter_map(|r| r.cidr_ip().map(String::from)).collect();
          cidrs.extend(p.ipv6_ranges().iter().filter_map(|r| r.cidr_ipv6().map(String::from)));
          IngressRule {
            protocol: p.ip_protocol().map(String::from),
            from_port: p.from_port(),
            to_port: p.to_port(),
            cidrs,
          }
        })
        .collect();

      groups.push(SecurityGroupSnapshot {
        id: group.group_id().map(String::from),
        name: group.group_name().map(String::from),
        rules,
      });
    }
  }

  debug!("Evaluating {} security groups", groups.len());
  Ok(groups)
}

fn rule_admits_world_ssh(rule: &IngressRule) -> bool {
  let world_open = rule.cidrs.iter().any(|c| c == "0.0.0.0/0" || c == "::/0");
  if !world_open {
    return false;
  }

  // Protocol -1 means all protocols and all ports
  match rule.protocol.as_deref() {
    Some("-1") => true,
    Some("tcp") => {
      let from = rule.from_port.unwrap_or(i32::MIN);
      let to = rule.to_port.unwrap_or(i32::MAX);
      from <= SSH_PORT && SSH_PORT <= to
    }
    _ => false,
  }
}

fn evaluate_restricted_ssh(groups: &[SecurityGroupSnapshot]) -> ComplianceReport {
  if groups.is_empty() {
    return ComplianceReport::new(vec![CheckResult::not_applicable(
      "EC2",
      "No security groups found in the region",
    )]);
  }

  let mut checks = Vec::new();
  for group in groups {
    let name = group
      .id
      .clone()
      .or_else(|| group.name.clone())
      .unwrap_or_else(|| "Unknown security group".to_string());

    if group.rules.iter().any(rule_admits_world_ssh) {
      checks.push(CheckResult::fail(
        name,
        None,
        "Security group allows unrestricted ingress to TCP port 22",
      ));
    } else {
      checks.push(CheckResult::pass(name, None));
    }
  }

  ComplianceReport::new(checks)
}

pub async fn run_ebs_encryption_by_default(region: Option<String>) -> ComplianceReport {
  match fetch_ebs_encryption(region).await {
    Ok(enabled) => evaluate_ebs_encryption_by_default(enabled),
    Err(e) => ComplianceReport::from_error("EC2", format!("Error checking EBS encryption by default: {e}")),
  }
}

async fn fetch_ebs_encryption(region: Option<String>) -> Result<bool> {
  let client = get_client(region).await?;
  let response = client.get_ebs_encryption_by_default().send().await?;
  Ok(response.ebs_encryption_by_default().unwrap_or(false))
}

/// The account-level setting always exists, so this check never emits
/// NOTAPPLICABLE
fn evaluate_ebs_encryption_by_default(enabled: bool) -> ComplianceReport {
  let result = if enabled {
    CheckResult::pass("EBS encryption by default", None)
  } else {
    CheckResult::fail(
      "EBS encryption by default",
      None,
      "EBS encryption by default is not enabled in the region",
    )
  };

  ComplianceReport::new(vec![result])
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;
  use crate::report::CheckStatus;

  fn rule(protocol: &str, from: Option<i32>, to: Option<i32>, cidrs: &[&str]) -> IngressRule {
    IngressRule {
      protocol: Some(protocol.to_string()),
      from_port: from,
      to_port: to,
      cidrs: cidrs.iter().map(|s| s.to_string()).collect(),
    }
  }

  fn group(id: &str, rules: Vec<IngressRule>) -> SecurityGroupSnapshot {
    SecurityGroupSnapshot {
      id: Some(id.to_string()),
      name: Some(format!("{id}-name")),
      rules,
    }
  }

  #[rstest]
  #[case(rule("tcp", Some(22), Some(22), &["0.0.0.0/0"]), true)]
  #[case(rule("tcp", Some(0), Some(1024), &["0.0.0.0/0"]), true)]
  #[case(rule("tcp", Some(22), Some(22), &["::/0"]), true)]
  #[case(rule("-1", None, None, &["0.0.0.0/0"]), true)]
  #[case(rule("tcp", Some(22), Some(22), &["10.0.0.0/8"]), false)]
  #[case(rule("tcp", Some(80), Some(443), &["0.0.0.0/0"]), false)]
  #[case(rule("udp", Some(22), Some(22), &["0.0.0.0/0"]), false)]
  fn world_ssh_rule_predicate(#[case] rule: IngressRule, #[case] expected: bool) {
    assert_eq!(rule_admits_world_ssh(&rule), expected);
  }

  #[test]
  fn group_with_open_ssh_fails() {
    let groups = [
      group("sg-1", vec![rule("tcp", Some(22), Some(22), &["0.0.0.0/0"])]),
      group("sg-2", vec![rule("tcp", Some(443), Some(443), &["0.0.0.0/0"])]),
    ];

    let report = evaluate_restricted_ssh(&groups);

    assert_eq!(report.checks.len(), 2);
    assert_eq!(report.checks[0].resource_name, "sg-1");
    assert_eq!(report.checks[0].status, CheckStatus::Fail);
    assert_eq!(report.checks[1].status, CheckStatus::Pass);
  }

  #[test]
  fn no_security_groups_is_not_applicable() {
    let report = evaluate_restricted_ssh(&[]);

    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].status, CheckStatus::NotApplicable);
  }

  #[test]
  fn group_without_id_falls_back_to_name_then_placeholder() {
    let groups = [
      SecurityGroupSnapshot {
        id: None,
        name: Some("legacy".to_string()),
        rules: vec![],
      },
      SecurityGroupSnapshot {
        id: None,
        name: None,
        rules: vec![],
      },
    ];

    let report = evaluate_restricted_ssh(&groups);

    assert_eq!(report.checks[0].resource_name, "legacy");
    assert_eq!(report.checks[1].resource_name, "Unknown security group");
  }

  #[test]
  fn ebs_encryption_enabled_passes() {
    let report = evaluate_ebs_encryption_by_default(true);

    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].status, CheckStatus::Pass);
    assert_eq!(report.checks[0].message, None);
  }

  #[test]
  fn ebs_encryption_disabled_fails() {
    let report = evaluate_ebs_encryption_by_default(false);

    assert_eq!(report.checks[0].status, CheckStatus::Fail);
    assert_eq!(
      report.checks[0].message.as_deref(),
      Some("EBS encryption by default is not enabled in the region")
    );
  }
}
