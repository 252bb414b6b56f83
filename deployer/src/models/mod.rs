//! Data models

pub mod build;
pub mod manifest;
pub mod record;

pub use build::{BuildHandle, BuildResult, BuildSpec, BuildStatus, BuildStep, StorageSource};
pub use manifest::{DeploymentDescriptor, RolloutStatus};
pub use record::{DeploymentRecord, DeploymentStatus, FieldTimestamp, RecordUpdate};
