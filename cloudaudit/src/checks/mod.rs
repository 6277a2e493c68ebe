//! The check catalogue, one module per AWS service
//!
//! Each check is a descriptor plus an async runner. Runners fetch a
//! read-only snapshot of the relevant resources (draining all pages before
//! any evaluation), then hand it to a pure `evaluate` function that applies
//! the status decision procedure. A fetch error ahead of evaluation
//! collapses into a single ERROR result; per-resource detail errors are
//! carried in the snapshot and isolated to their own resource.

pub mod cloudtrail;
pub mod cloudwatch;
pub mod ec2;
pub mod iam;
pub mod rds;
pub mod s3;
