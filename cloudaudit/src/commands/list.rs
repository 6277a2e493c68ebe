use anyhow::Result;
use clap::Args;

use crate::catalog;

#[derive(Args, Debug)]
pub struct ListInput {}

impl ListInput {
  pub async fn list(&self) -> Result<()> {
    for check in catalog::all_checks() {
      println!(
        "{:<38} {:<9} {:<12} {}",
        check.id,
        check.severity.to_string(),
        check.short_service_name.unwrap_or("-"),
        check.title
      );
    }

    Ok(())
  }
}
