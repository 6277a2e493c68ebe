use std::collections::HashSet;

use anyhow::Result;
use aws_sdk_cloudwatch::config::retry::RetryConfig;
use tracing::{debug, warn};

use crate::{
  catalog::{CheckMetadata, ComplianceControl, Severity},
  pattern,
  report::{CheckResult, ComplianceReport},
};

/// CIS 4.1 filter pattern for unauthorized API calls
const UNAUTHORIZED_API_PATTERN: &str =
  "{ ($.errorCode = \"*UnauthorizedOperation\") || ($.errorCode = \"AccessDenied*\") }";

/// Accepted as a looser match for alternate but equivalent filter phrasings
const PATTERN_COMPONENTS: [&str; 3] = ["$.errorCode", "UnauthorizedOperation", "AccessDenied"];

pub fn unauthorized_api_calls() -> CheckMetadata {
  CheckMetadata {
    id: "cloudwatch-unauthorized-api-calls",
    title: "Unauthorized API calls are monitored through a metric filter and alarm",
    description: "Checks that CloudTrail delivers logs to a CloudWatch Logs group with a metric filter matching the \
                  unauthorized API calls pattern, and that an actionable alarm watches the filter's metric",
    controls: vec![ComplianceControl::new("4.1", "CIS-AWS-Foundations-Benchmark-v1.4")],
    severity: Severity::Medium,
    execute: |region| Box::pin(run_unauthorized_api_calls(region)),
    service_name: Some("Amazon CloudWatch"),
    short_service_name: Some("cloudwatch"),
  }
}

#[derive(Debug)]
struct FilterSnapshot {
  pattern: Option<String>,
  metric_names: Vec<String>,
}

#[derive(Debug)]
struct LogGroupSnapshot {
  name: String,
  /// Per-group metric filter fetch; an Err here is isolated to this group
  filters: std::result::Result<Vec<FilterSnapshot>, String>,
}

#[derive(Debug)]
struct AlarmSnapshot {
  metric_name: Option<String>,
  has_actions: bool,
}

pub async fn run_unauthorized_api_calls(region: Option<String>) -> ComplianceReport {
  match fetch_monitoring_state(region).await {
    Ok((groups, alarms)) => evaluate_unauthorized_api_calls(&groups, &alarms),
    Err(e) => ComplianceReport::from_error(
      "CloudWatch",
      format!("Error checking unauthorized API call monitoring: {e}"),
    ),
  }
}

/// Extract the log group name from a CloudWatch Logs ARN
/// (`arn:aws:logs:<region>:<account>:log-group:<name>:*`)
fn log_group_name_from_arn(arn: &str) -> Option<String> {
  arn.split(':').nth(6).map(String::from)
}

/// Log group names from trail ARNs, in first-seen order
///
/// Several trails may deliver to the same log group; each group is
/// evaluated once
fn unique_log_groups<'a>(arns: impl Iterator<Item = &'a str>) -> Vec<String> {
  let mut seen = HashSet::new();
  arns
    .filter_map(log_group_name_from_arn)
    .filter(|name| seen.insert(name.clone()))
    .collect()
}

async fn fetch_monitoring_state(region: Option<String>) -> Result<(Vec<LogGroupSnapshot>, Vec<AlarmSnapshot>)> {
  let config = crate::get_sdk_config(region).await?;
  let retry = RetryConfig::standard().with_max_attempts(3);

  let cloudtrail = aws_sdk_cloudtrail::Client::from_conf(
    aws_sdk_cloudtrail::config::Builder::from(&config)
      .retry_config(retry.clone())
      .build(),
  );
  let logs = aws_sdk_cloudwatchlogs::Client::from_conf(
    aws_sdk_cloudwatchlogs::config::Builder::from(&config)
      .retry_config(retry.clone())
      .build(),
  );
  let cloudwatch = aws_sdk_cloudwatch::Client::from_conf(
    aws_sdk_cloudwatch::config::Builder::from(&config)
      .retry_config(retry)
      .build(),
  );

  let trails = cloudtrail.describe_trails().send().await?;
  let group_names = unique_log_groups(
    trails
      .trail_list()
      .iter()
      .filter_map(|t| t.cloud_watch_logs_log_group_arn()),
  );

  let mut groups = Vec::new();
  for name in group_names {
    let filters = fetch_metric_filters(&logs, &name).await;
    if let Err(message) = &filters {
      warn!("Failed to list metric filters for {name}: {message}");
    }
    groups.push(LogGroupSnapshot { name, filters });
  }

  let mut alarms = Vec::new();
  let mut pages = cloudwatch.describe_alarms().into_paginator().send();
  while let Some(page) = pages.next().await {
    for alarm in page?.metric_alarms() {
      alarms.push(AlarmSnapshot {
        metric_name: alarm.metric_name().map(String::from),
        has_actions: !alarm.alarm_actions().is_empty(),
      });
    }
  }

  debug!("Evaluating {} log groups against {} alarms", groups.len(), alarms.len());
  Ok((groups, alarms))
}

async fn fetch_metric_filters(
  client: &aws_sdk_cloudwatchlogs::Client,
  group_name: &str,
) -> std::result::Result<Vec<FilterSnapshot>, String> {
  let mut filters = Vec::new();
  let mut pages = client
    .describe_metric_filters()
    .log_group_name(group_name)
    .into_paginator()
    .send();

  while let Some(page) = pages.next().await {
    let page = page.map_err(|e| format!("Error listing metric filters: {e}"))?;
    for filter in page.metric_filters() {
      filters.push(FilterSnapshot {
        pattern: filter.filter_pattern().map(String::from),
        metric_names: filter
          .metric_transformations()
          .iter()
          .map(|t| t.metric_name().to_string())
          .collect(),
      });
    }
  }

  Ok(filters)
}

/// Detective AND chain: matching metric filter, alarm on that filter's
/// metric, and at least one alarm action
fn evaluate_unauthorized_api_calls(groups: &[LogGroupSnapshot], alarms: &[AlarmSnapshot]) -> ComplianceReport {
  if groups.is_empty() {
    return ComplianceReport::new(vec![CheckResult::fail(
      "CloudTrail",
      None,
      "No CloudTrail trail delivers logs to CloudWatch Logs",
    )]);
  }

  let mut checks = Vec::new();
  for group in groups {
    let filters = match &group.filters {
      Ok(filters) => filters,
      Err(message) => {
        checks.push(CheckResult::error(group.name.clone(), None, message.clone()));
        continue;
      }
    };

    let matching = filters.iter().find(|f| {
      f.pattern
        .as_deref()
        .is_some_and(|p| pattern::matches(UNAUTHORIZED_API_PATTERN, p, &PATTERN_COMPONENTS))
    });

    let Some(filter) = matching else {
      checks.push(CheckResult::fail(
        group.name.clone(),
        None,
        "No metric filter matches the unauthorized API calls pattern",
      ));
      continue;
    };

    let watched = filter.metric_names.iter().find_map(|name| {
      alarms
        .iter()
        .find(|a| a.metric_name.as_deref() == Some(name))
        .map(|a| (name, a))
    });

    match watched {
      Some((_, alarm)) if alarm.has_actions => checks.push(CheckResult::pass(group.name.clone(), None)),
      Some((name, _)) => checks.push(CheckResult::fail(
        group.name.clone(),
        None,
        format!("Alarm for metric {name} has no actions configured"),
      )),
      None => {
        let metrics = filter.metric_names.join(", ");
        checks.push(CheckResult::fail(
          group.name.clone(),
          None,
          format!("No alarm is configured for metric {metrics}"),
        ));
      }
    }
  }

  ComplianceReport::new(checks)
}
