pub mod catalog;
pub mod checks;
pub mod cli;
pub mod commands;
pub mod output;
pub mod pattern;
pub mod policy;
pub mod report;

use std::env;

use anyhow::Result;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, SdkConfig};
use aws_types::region::Region;
pub use cli::{Cli, Commands};

/// Region used when neither the caller nor the environment provides one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Get the configuration to authn/authz with AWS that will be used across AWS clients
///
/// Region resolution is centralized here rather than defaulted per check:
/// explicit argument, then `AWS_REGION`, then the SDK's default provider
/// chain, then the hardcoded fallback.
pub async fn get_sdk_config(region: Option<String>) -> Result<SdkConfig> {
  let aws_region = match region {
    Some(region) => Some(Region::new(region)),
    None => env::var("AWS_REGION").ok().map(Region::new),
  };

  let region_provider = RegionProviderChain::first_try(aws_region)
    .or_default_provider()
    .or_else(Region::new(DEFAULT_REGION));

  Ok(
    aws_config::defaults(BehaviorVersion::latest())
      .region(region_provider)
      .load()
      .await,
  )
}
