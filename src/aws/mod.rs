//! AWS client modules
//!
//! Wrappers around the AWS SDK for the pieces of EC2 this tool touches:
//! - account: caller identity lookup via STS
//! - context: per-(account, region) client resolution with role assumption
//! - error: typed error classification from AWS error codes
//! - service: the image-service seam (describe/copy/share/tag/deregister)

pub mod account;
pub mod context;
pub mod error;
pub mod service;

pub use account::{get_current_account_id, AccountId};
pub use context::{AmiContext, ImageServiceResolver};
pub use error::AmiError;
pub use service::{
    Deregistration, Ec2ImageService, ImageDescription, ImageService, ImageState, ImageTag,
};
