use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a single resource
///
/// The string forms (`PASS`, `FAIL`, `ERROR`, `NOTAPPLICABLE`) are consumed
/// by external report aggregators and must not change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
  Pass,
  Fail,
  Error,
  NotApplicable,
}

impl fmt::Display for CheckStatus {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      CheckStatus::Pass => write!(f, "PASS"),
      CheckStatus::Fail => write!(f, "FAIL"),
      CheckStatus::Error => write!(f, "ERROR"),
      CheckStatus::NotApplicable => write!(f, "NOTAPPLICABLE"),
    }
  }
}

/// Result for one evaluated resource
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
  /// Human-readable identifier of the evaluated resource
  pub resource_name: String,

  /// ARN of the resource, when one is available
  #[serde(skip_serializing_if = "Option::is_none")]
  pub resource_arn: Option<String>,

  pub status: CheckStatus,

  /// Explanation for FAIL/ERROR/NOTAPPLICABLE; never populated on PASS
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

impl CheckResult {
  pub fn pass(name: impl Into<String>, arn: Option<String>) -> Self {
    Self {
      resource_name: name.into(),
      resource_arn: arn,
      status: CheckStatus::Pass,
      message: None,
    }
  }

  pub fn fail(name: impl Into<String>, arn: Option<String>, message: impl Into<String>) -> Self {
    Self {
      resource_name: name.into(),
      resource_arn: arn,
      status: CheckStatus::Fail,
      message: Some(message.into()),
    }
  }

  pub fn error(name: impl Into<String>, arn: Option<String>, message: impl Into<String>) -> Self {
    Self {
      resource_name: name.into(),
      resource_arn: arn,
      status: CheckStatus::Error,
      message: Some(message.into()),
    }
  }

  pub fn not_applicable(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      resource_name: name.into(),
      resource_arn: None,
      status: CheckStatus::NotApplicable,
      message: Some(message.into()),
    }
  }
}

/// Report produced by a single check invocation
///
/// `checks` follows provider listing order and always contains at least one
/// entry - a sentinel result is emitted when no resources exist
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceReport {
  pub checks: Vec<CheckResult>,
}

impl ComplianceReport {
  pub fn new(checks: Vec<CheckResult>) -> Self {
    Self { checks }
  }

  /// Report for an unrecoverable failure ahead of any per-resource evaluation
  pub fn from_error(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      checks: vec![CheckResult::error(name, None, message)],
    }
  }

  pub fn count(&self, status: CheckStatus) -> usize {
    self.checks.iter().filter(|c| c.status == status).count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_strings_match_aggregator_contract() {
    assert_eq!(serde_json::to_string(&CheckStatus::Pass).unwrap(), r#""PASS""#);
    assert_eq!(serde_json::to_string(&CheckStatus::Fail).unwrap(), r#""FAIL""#);
    assert_eq!(serde_json::to_string(&CheckStatus::Error).unwrap(), r#""ERROR""#);
    assert_eq!(
      serde_json::to_string(&CheckStatus::NotApplicable).unwrap(),
      r#""NOTAPPLICABLE""#
    );
  }

  #[test]
  fn pass_result_serializes_without_message() {
    let result = CheckResult::pass("cluster-1", Some("arn:aws:rds:us-east-1:123456789012:cluster:cluster-1".into()));
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["resourceName"], "cluster-1");
    assert_eq!(
      json["resourceArn"],
      "arn:aws:rds:us-east-1:123456789012:cluster:cluster-1"
    );
    assert_eq!(json["status"], "PASS");
    assert!(json.get("message").is_none());
  }

  #[test]
  fn fail_result_carries_message() {
    let result = CheckResult::fail("bucket", None, "Bucket policy does not deny insecure transport");
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["status"], "FAIL");
    assert_eq!(json["message"], "Bucket policy does not deny insecure transport");
    assert!(json.get("resourceArn").is_none());
  }

  #[test]
  fn error_report_has_exactly_one_result() {
    let report = ComplianceReport::from_error("CloudTrail", "Error checking CloudTrail: access denied");

    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].status, CheckStatus::Error);
    assert!(report.checks[0].message.as_deref().unwrap().contains("access denied"));
  }

  #[test]
  fn counts_by_status() {
    let report = ComplianceReport::new(vec![
      CheckResult::pass("a", None),
      CheckResult::pass("b", None),
      CheckResult::fail("c", None, "nope"),
    ]);

    assert_eq!(report.count(CheckStatus::Pass), 2);
    assert_eq!(report.count(CheckStatus::Fail), 1);
    assert_eq!(report.count(CheckStatus::Error), 0);
  }
}
