use anyhow::Result;
use aws_sdk_cloudtrail::{config::retry::RetryConfig, Client};
use tracing::{debug, warn};

use crate::{
  catalog::{CheckMetadata, ComplianceControl, Severity},
  report::{CheckResult, ComplianceReport},
};

/// Get the CloudTrail client
async fn get_client(region: Option<String>) -> Result<Client> {
  let config = crate::get_sdk_config(region).await?;
  let client = Client::from_conf(
    aws_sdk_cloudtrail::config::Builder::from(&config)
      .retry_config(RetryConfig::standard().with_max_attempts(3))
      .build(),
  );
  Ok(client)
}

pub fn trail_enabled() -> CheckMetadata {
  CheckMetadata {
    id: "cloudtrail-enabled",
    title: "CloudTrail is enabled with multi-region coverage and log file validation",
    description: "Checks that at least one CloudTrail trail exists and that every trail is actively logging, spans \
                  all regions, and has log file validation enabled",
    controls: vec![
      ComplianceControl::new("3.1", "CIS-AWS-Foundations-Benchmark-v1.4"),
      ComplianceControl::new("3.2", "CIS-AWS-Foundations-Benchmark-v1.4"),
    ],
    severity: Severity::High,
    execute: |region| Box::pin(run_trail_enabled(region)),
    service_name: Some("AWS CloudTrail"),
    short_service_name: Some("cloudtrail"),
  }
}

#[derive(Debug)]
struct TrailSnapshot {
  name: Option<String>,
  arn: Option<String>,
  is_multi_region: bool,
  log_file_validation: bool,
  /// Per-trail status fetch; an Err here is isolated to this trail
  logging: std::result::Result<bool, String>,
}

pub async fn run_trail_enabled(region: Option<String>) -> ComplianceReport {
  match fetch_trails(region).await {
    Ok(trails) => evaluate_trail_enabled(&trails),
    Err(e) => ComplianceReport::from_error("CloudTrail", format!("Error checking CloudTrail: {e}")),
  }
}

async fn fetch_trails(region: Option<String>) -> Result<Vec<TrailSnapshot>> {
  let client = get_client(region).await?;
  let response = client.describe_trails().send().await?;

  let mut trails = Vec::new();
  for trail in response.trail_list() {
    let arn = trail.trail_arn().map(String::from);

    // GetTrailStatus failing for one trail must not suppress the others
    let logging = match &arn {
      Some(arn) => match client.get_trail_status().name(arn).send().await {
        Ok(status) => Ok(status.is_logging().unwrap_or(false)),
        Err(e) => {
          warn!("Failed to get trail status for {arn}: {e}");
          Err(format!("Error getting trail status: {e}"))
        }
      },
      // Evaluated later as structurally missing data
      None => Ok(false),
    };

    trails.push(TrailSnapshot {
      name: trail.name().map(String::from),
      arn,
      is_multi_region: trail.is_multi_region_trail().unwrap_or(false),
      log_file_validation: trail.log_file_validation_enabled().unwrap_or(false),
      logging,
    });
  }

  debug!("Evaluating {} CloudTrail trails", trails.len());
  Ok(trails)
}

fn evaluate_trail_enabled(trails: &[TrailSnapshot]) -> ComplianceReport {
  // CloudTrail is a mandatory control: its complete absence is a failure,
  // not a non-applicable scope
  if trails.is_empty() {
    return ComplianceReport::new(vec![CheckResult::fail(
      "CloudTrail",
      None,
      "No CloudTrail trail is configured in the region",
    )]);
  }

  let mut checks = Vec::new();
  for trail in trails {
    let name = trail.name.clone().unwrap_or_else(|| "Unknown trail".to_string());

    if trail.arn.is_none() {
      checks.push(CheckResult::error(name, None, "CloudTrail trail is missing an ARN"));
      continue;
    }

    let is_logging = match &trail.logging {
      Ok(logging) => *logging,
      Err(message) => {
        checks.push(CheckResult::error(name, trail.arn.clone(), message.clone()));
        continue;
      }
    };

    let mut reasons = Vec::new();
    if !is_logging {
      reasons.push("Trail is not actively logging");
    }
    if !trail.is_multi_region {
      reasons.push("Trail does not span all regions");
    }
    if !trail.log_file_validation {
      reasons.push("Log file validation is not enabled");
    }

    if reasons.is_empty() {
      checks.push(CheckResult::pass(name, trail.arn.clone()));
    } else {
      checks.push(CheckResult::fail(name, trail.arn.clone(), reasons.join("; ")));
    }
  }

  ComplianceReport::new(checks)
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;
  use crate::report::CheckStatus;

  fn trail(name: &str, logging: bool, multi_region: bool, validation: bool) -> TrailSnapshot {
    TrailSnapshot {
      name: Some(name.to_string()),
      arn: Some(format!("arn:aws:cloudtrail:us-east-1:123456789012:trail/{name}")),
      is_multi_region: multi_region,
      log_file_validation: validation,
      logging: Ok(logging),
    }
  }

  #[test]
  fn absent_trail_is_a_failure_not_notapplicable() {
    let report = evaluate_trail_enabled(&[]);

    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].status, CheckStatus::Fail);
    assert_eq!(
      report.checks[0].message.as_deref(),
      Some("No CloudTrail trail is configured in the region")
    );
  }

  #[test]
  fn fully_configured_trail_passes_without_message() {
    let report = evaluate_trail_enabled(&[trail("main", true, true, true)]);

    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].status, CheckStatus::Pass);
    assert_eq!(report.checks[0].message, None);
  }

  #[rstest]
  #[case(false, true, true, "Trail is not actively logging")]
  #[case(true, false, true, "Trail does not span all regions")]
  #[case(true, true, false, "Log file validation is not enabled")]
  fn single_failing_condition_is_named(
    #[case] logging: bool,
    #[case] multi_region: bool,
    #[case] validation: bool,
    #[case] expected: &str,
  ) {
    let report = evaluate_trail_enabled(&[trail("main", logging, multi_region, validation)]);

    assert_eq!(report.checks[0].status, CheckStatus::Fail);
    assert_eq!(report.checks[0].message.as_deref(), Some(expected));
  }

  #[test]
  fn all_failing_conditions_are_concatenated() {
    let report = evaluate_trail_enabled(&[trail("main", false, false, false)]);

    assert_eq!(
      report.checks[0].message.as_deref(),
      Some("Trail is not actively logging; Trail does not span all regions; Log file validation is not enabled")
    );
  }

  #[test]
  fn status_fetch_error_is_isolated_to_its_trail() {
    let trails = [
      trail("healthy", true, true, true),
      TrailSnapshot {
        name: Some("broken".to_string()),
        arn: Some("arn:aws:cloudtrail:us-east-1:123456789012:trail/broken".to_string()),
        is_multi_region: true,
        log_file_validation: true,
        logging: Err("Error getting trail status: access denied".to_string()),
      },
      trail("failing", false, true, true),
    ];

    let report = evaluate_trail_enabled(&trails);

    assert_eq!(report.checks.len(), 3);
    assert_eq!(report.checks[0].status, CheckStatus::Pass);
    assert_eq!(report.checks[1].status, CheckStatus::Error);
    assert!(report.checks[1].message.as_deref().unwrap().contains("access denied"));
    assert_eq!(report.checks[2].status, CheckStatus::Fail);
  }

  #[test]
  fn trail_without_arn_is_an_error() {
    let trails = [TrailSnapshot {
      name: None,
      arn: None,
      is_multi_region: true,
      log_file_validation: true,
      logging: Ok(true),
    }];

    let report = evaluate_trail_enabled(&trails);

    assert_eq!(report.checks[0].resource_name, "Unknown trail");
    assert_eq!(report.checks[0].status, CheckStatus::Error);
    assert_eq!(
      report.checks[0].message.as_deref(),
      Some("CloudTrail trail is missing an ARN")
    );
  }
}
