use anyhow::{bail, Result};
use clap::Args;
use serde_json::{Map, Value};
use tracing::info;

use crate::{catalog, cli::OutputFormat, output};

#[derive(Args, Debug)]
pub struct RunInput {
  /// Identifier of the check to run (see `list`)
  pub check: String,

  /// Region to evaluate; falls back to the SDK's default resolution
  #[arg(long, env = "AWS_REGION")]
  pub region: Option<String>,

  #[arg(long, value_enum, default_value_t)]
  pub output: OutputFormat,
}

impl RunInput {
  pub async fn run(&self) -> Result<()> {
    let Some(check) = catalog::find_check(&self.check) else {
      bail!("Unknown check: {}", self.check);
    };

    info!("Running {}", check.id);
    let report = (check.execute)(self.region.clone()).await;

    match self.output {
      OutputFormat::Text => output::print_summary(&check, &report),
      OutputFormat::Json => output::print_json(&report)?,
    }

    Ok(())
  }
}

#[derive(Args, Debug)]
pub struct RunAllInput {
  /// Region to evaluate; falls back to the SDK's default resolution
  #[arg(long, env = "AWS_REGION")]
  pub region: Option<String>,

  #[arg(long, value_enum, default_value_t)]
  pub output: OutputFormat,
}

impl RunAllInput {
  pub async fn run(&self) -> Result<()> {
    let mut reports = Map::new();

    // Checks are independent; they run sequentially in registry order
    for check in catalog::all_checks() {
      info!("Running {}", check.id);
      let report = (check.execute)(self.region.clone()).await;

      match self.output {
        OutputFormat::Text => output::print_summary(&check, &report),
        OutputFormat::Json => {
          reports.insert(check.id.to_string(), serde_json::to_value(&report)?);
        }
      }
    }

    if self.output == OutputFormat::Json {
      println!("{}", serde_json::to_string_pretty(&Value::Object(reports))?);
    }

    Ok(())
  }
}
