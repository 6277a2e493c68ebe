use anstyle::{AnsiColor, Color, Style};
use anyhow::Result;

use crate::{
  catalog::CheckMetadata,
  report::{CheckStatus, ComplianceReport},
};

fn status_style(status: CheckStatus) -> Style {
  let color = match status {
    CheckStatus::Pass => AnsiColor::Green,
    CheckStatus::Fail => AnsiColor::Red,
    CheckStatus::Error => AnsiColor::Yellow,
    CheckStatus::NotApplicable => AnsiColor::Cyan,
  };
  Style::new().bold().fg_color(Some(Color::Ansi(color)))
}

/// Render a report as a human-readable summary on stdout
pub fn print_summary(metadata: &CheckMetadata, report: &ComplianceReport) {
  println!("{} [{}] {}", metadata.id, metadata.severity, metadata.title);

  for result in &report.checks {
    let style = status_style(result.status);
    let status = result.status.to_string();
    match &result.message {
      Some(message) => println!("  {style}{status:>13}{style:#}  {}  -  {message}", result.resource_name),
      None => println!("  {style}{status:>13}{style:#}  {}", result.resource_name),
    }
  }

  println!(
    "  {} passed, {} failed, {} errors, {} not applicable",
    report.count(CheckStatus::Pass),
    report.count(CheckStatus::Fail),
    report.count(CheckStatus::Error),
    report.count(CheckStatus::NotApplicable),
  );
}

/// Render a report as pretty-printed JSON on stdout
pub fn print_json(report: &ComplianceReport) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(report)?);
  Ok(())
}
