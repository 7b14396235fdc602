//! Commands module - service layer for migration setup

mod plan;
mod run;
pub(crate) mod service;

pub use plan::{BucketPlan, MigrationPlan};
pub use service::MigrationService;
