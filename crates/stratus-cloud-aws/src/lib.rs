//! AWS provider for Stratus
//!
//! This crate implements the CloudProvider trait for AWS, provisioning the
//! whole resource graph: VPC networking, ECS on Fargate, RDS, Secrets Manager,
//! Application Load Balancers and Route 53.
//!
//! # Requirements
//!
//! - `aws` CLI v2 must be installed
//! - Credentials are resolved by the CLI (environment, profile or instance role)
//!
//! # Example
//!
//! ```ignore
//! use stratus_cloud::CloudProvider;
//! use stratus_cloud_aws::{AwsOptions, AwsProvider};
//!
//! let provider = AwsProvider::new(AwsOptions {
//!     region: Some("ap-northeast-1".to_string()),
//!     stack_id: "shop-production".to_string(),
//!     ..Default::default()
//! });
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

pub mod awscli;
mod database;
mod dns;
pub mod error;
mod network;
pub mod provider;
mod secrets;
mod service;
pub mod tags;

pub use awscli::{Args, AwsCli, CallerIdentity};
pub use error::{AwsError, Result};
pub use provider::{AwsOptions, AwsProvider};
pub use tags::ResourceTags;
