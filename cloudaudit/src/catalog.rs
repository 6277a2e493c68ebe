use std::{fmt, future::Future, pin::Pin};

use serde::{Deserialize, Serialize};

use crate::{checks, report::ComplianceReport};

/// Severity assigned to a check's findings
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
  Low,
  Medium,
  High,
  Critical,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Severity::Low => write!(f, "LOW"),
      Severity::Medium => write!(f, "MEDIUM"),
      Severity::High => write!(f, "HIGH"),
      Severity::Critical => write!(f, "CRITICAL"),
    }
  }
}

/// Mapping to a named compliance framework clause
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceControl {
  pub id: String,
  pub document: String,
}

impl ComplianceControl {
  pub fn new(id: &str, document: &str) -> Self {
    Self {
      id: id.into(),
      document: document.into(),
    }
  }
}

pub type CheckFuture = Pin<Box<dyn Future<Output = ComplianceReport> + Send>>;

/// Every check is invoked uniformly: an optional region, a report back
pub type CheckFn = fn(Option<String>) -> CheckFuture;

/// Static descriptor attached to each check
///
/// Created once at registry construction and immutable thereafter. External
/// aggregators enumerate these to discover and run checks.
pub struct CheckMetadata {
  pub id: &'static str,
  pub title: &'static str,
  pub description: &'static str,
  pub controls: Vec<ComplianceControl>,
  pub severity: Severity,
  pub execute: CheckFn,
  pub service_name: Option<&'static str>,
  pub short_service_name: Option<&'static str>,
}

impl fmt::Debug for CheckMetadata {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CheckMetadata")
      .field("id", &self.id)
      .field("title", &self.title)
      .field("severity", &self.severity)
      .field("service_name", &self.service_name)
      .finish()
  }
}

/// All checks in the catalogue, in registry order
pub fn all_checks() -> Vec<CheckMetadata> {
  vec![
    checks::rds::cluster_deletion_protection(),
    checks::rds::auto_minor_version_upgrade(),
    checks::rds::event_subscription(),
    checks::cloudtrail::trail_enabled(),
    checks::cloudwatch::unauthorized_api_calls(),
    checks::ec2::restricted_ssh(),
    checks::ec2::ebs_encryption_by_default(),
    checks::s3::secure_transport(),
    checks::iam::no_kms_decrypt_wildcard(),
  ]
}

/// Look up a check descriptor by its identifier
pub fn find_check(id: &str) -> Option<CheckMetadata> {
  all_checks().into_iter().find(|c| c.id == id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn check_ids_are_unique() {
    let checks = all_checks();
    let mut ids: Vec<_> = checks.iter().map(|c| c.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), checks.len());
  }

  #[test]
  fn every_check_maps_to_a_control() {
    for check in all_checks() {
      assert!(!check.controls.is_empty(), "{} has no control mapping", check.id);
      assert!(!check.title.is_empty());
      assert!(!check.description.is_empty());
    }
  }

  #[test]
  fn find_check_matches_on_id() {
    assert!(find_check("rds-cluster-deletion-protection").is_some());
    assert!(find_check("no-such-check").is_none());
  }

  #[test]
  fn severity_serializes_uppercase() {
    assert_eq!(serde_json::to_string(&Severity::High).unwrap(), r#""HIGH""#);
    assert_eq!(serde_json::to_string(&Severity::Low).unwrap(), r#""LOW""#);
  }
}
