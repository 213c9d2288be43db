//! Shared AWS configuration context
//!
//! `AmiContext` replaces the process-wide singleton the tool historically
//! used: it is constructed once per invocation, captures the default account
//! identity, and hands out one memoized image-service client per
//! (account, region) pair. Cross-account clients assume a named role in the
//! target account; the default account never assumes a role.

use crate::aws::account::{get_current_account_id, AccountId};
use crate::aws::error::AmiError;
use crate::aws::service::{Ec2ImageService, ImageService};
use anyhow::{Context, Result};
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SESSION_NAME: &str = "ami-manager";

/// Resolves an image-service client scoped to a given account and region.
///
/// The replication orchestrator and retention cleaner are generic over this
/// trait so tests can substitute in-memory services.
pub trait ImageServiceResolver: Send + Sync {
    type Service: ImageService + Send + Sync + 'static;

    /// The account owning the source image (the credentials' own account).
    fn default_account(&self) -> &AccountId;

    /// The region of the loaded default configuration.
    fn default_region(&self) -> &str;

    /// Resolve the memoized client for (account, region), creating it on
    /// first access.
    fn image_service(
        &self,
        account: &AccountId,
        region: &str,
    ) -> impl Future<Output = Result<Arc<Self::Service>, AmiError>> + Send;
}

/// Per-invocation AWS context with a (account, region) client cache
pub struct AmiContext {
    default_account: AccountId,
    default_region: String,
    /// Name of the IAM role to assume in non-default accounts
    role: Option<String>,
    services: Mutex<HashMap<(AccountId, String), Arc<Ec2ImageService>>>,
}

impl AmiContext {
    /// Load the default AWS configuration and resolve the caller's account.
    ///
    /// `role` names the cross-account IAM role assumed for every account
    /// other than the default one; it may be omitted when only the default
    /// account is involved.
    pub async fn new(role: Option<String>) -> Result<Self> {
        let base = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let default_region = base
            .region()
            .map(|r| r.to_string())
            .context("No default AWS region configured - set AWS_REGION or a profile region")?;

        let default_account = get_current_account_id(&base).await?;

        info!(
            account_id = %default_account,
            region = %default_region,
            "Loaded default AWS configuration"
        );

        Ok(Self {
            default_account,
            default_region,
            role,
            services: Mutex::new(HashMap::new()),
        })
    }

    /// Load an SDK config scoped to the given account and region.
    async fn load_config(
        &self,
        account: &AccountId,
        region: &str,
    ) -> Result<aws_config::SdkConfig, AmiError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));

        if account != &self.default_account {
            let role = self.role.as_deref().ok_or_else(|| AmiError::PermissionDenied {
                message: format!(
                    "account {account} requires a cross-account role name (--role)"
                ),
            })?;
            let role_arn = cross_account_role_arn(account, role);
            debug!(role_arn = %role_arn, region = %region, "Assuming cross-account role");

            let provider = AssumeRoleProvider::builder(role_arn)
                .session_name(SESSION_NAME)
                .region(Region::new(region.to_string()))
                .build()
                .await;
            loader = loader.credentials_provider(provider);
        }

        Ok(loader.load().await)
    }
}

impl ImageServiceResolver for AmiContext {
    type Service = Ec2ImageService;

    fn default_account(&self) -> &AccountId {
        &self.default_account
    }

    fn default_region(&self) -> &str {
        &self.default_region
    }

    async fn image_service(
        &self,
        account: &AccountId,
        region: &str,
    ) -> Result<Arc<Ec2ImageService>, AmiError> {
        let key = (account.clone(), region.to_string());

        // The lock is held across client construction so concurrent first
        // access from per-region tasks builds exactly one client per key.
        let mut services = self.services.lock().await;
        if let Some(service) = services.get(&key) {
            return Ok(service.clone());
        }

        let config = self.load_config(account, region).await?;
        let service = Arc::new(Ec2ImageService::new(&config));
        services.insert(key, service.clone());
        Ok(service)
    }
}

impl std::fmt::Debug for AmiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiContext")
            .field("default_account", &self.default_account)
            .field("default_region", &self.default_region)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// ARN of the named role in the given account
fn cross_account_role_arn(account: &AccountId, role: &str) -> String {
    format!("arn:aws:iam::{account}:role/{role}")
}
