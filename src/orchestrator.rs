//! Replication orchestrator: copy-wait-propagate per target region.
//!
//! One concurrent task per target region over a shared source image. Each
//! task returns a typed per-region result; the orchestrator joins all of them
//! and applies the abort policy itself (fail-fast on the first error) rather
//! than letting a worker terminate the process.

use crate::aws::account::AccountId;
use crate::aws::context::ImageServiceResolver;
use crate::aws::error::AmiError;
use crate::aws::service::{ImageService, ImageTag};
use crate::image::Ami;
use crate::wait::{wait_for_available, PollConfig};
use std::time::Duration;
use tracing::{error, info};

/// Result of replicating into one region
#[derive(Debug, Clone)]
pub struct RegionReport {
    pub region: String,
    pub image_id: String,
    /// Time spent waiting for the copy to become available (zero for the
    /// source region, which needs no copy)
    pub waited: Duration,
}

/// Replicates one source image into a set of target regions and accounts
pub struct Replicator<'a, R: ImageServiceResolver> {
    resolver: &'a R,
    /// Accounts granted launch permission on every derived image
    accounts: &'a [AccountId],
    poll: PollConfig,
}

impl<'a, R: ImageServiceResolver> Replicator<'a, R> {
    pub fn new(resolver: &'a R, accounts: &'a [AccountId], poll: PollConfig) -> Self {
        Self {
            resolver,
            accounts,
            poll,
        }
    }

    /// Copy the source image to every target region, grant launch
    /// permissions, and propagate tags.
    ///
    /// The source metadata fetch happens once, up front; any failure there is
    /// fatal before a single region task starts. Region tasks then run
    /// concurrently with no ordering guarantees across regions. All tasks are
    /// joined before returning; if any failed, the first error (in region
    /// order) is returned and successful regions are not rolled back.
    pub async fn replicate(&self, source: &mut Ami) -> Result<Vec<RegionReport>, AmiError> {
        let default_account = self.resolver.default_account().clone();

        let service = self
            .resolver
            .image_service(&default_account, source.region())
            .await?;
        source.fetch_metadata(service.as_ref()).await?;

        let source_id = source
            .id()
            .ok_or_else(|| AmiError::internal("source image id not bound"))?
            .to_string();
        let source_region = source.region().to_string();
        let source_name = source.name().unwrap_or_default().to_string();
        let source_tags: Vec<ImageTag> = source.tags().unwrap_or_default().to_vec();

        info!(
            image_id = %source_id,
            region = %source_region,
            name = %source_name,
            "Replicating image"
        );

        let tasks = source.take_replicas().into_iter().map(|(region, replica)| {
            self.replicate_region(
                region,
                replica,
                default_account.clone(),
                source_id.clone(),
                source_region.clone(),
                source_name.clone(),
                source_tags.clone(),
            )
        });

        let results = futures::future::join_all(tasks).await;

        let mut reports = Vec::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(error = %e, "Region replication failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    /// Replicate into a single region: copy (skipped for the source region),
    /// wait for availability, grant permissions, then propagate tags.
    async fn replicate_region(
        &self,
        region: String,
        mut replica: Ami,
        default_account: AccountId,
        source_id: String,
        source_region: String,
        source_name: String,
        source_tags: Vec<ImageTag>,
    ) -> Result<RegionReport, AmiError> {
        let service = self
            .resolver
            .image_service(&default_account, &region)
            .await?;

        let (image_id, waited) = if region == source_region {
            // The image already exists here; reuse it directly.
            (source_id.clone(), Duration::ZERO)
        } else {
            info!(region = %region, source_image_id = %source_id, "Copying image to region");
            let new_id = service
                .copy_image(&source_name, &source_region, &source_id)
                .await?;
            replica.bind_id(new_id.clone());

            let waited = wait_for_available(service.as_ref(), &mut replica, &self.poll).await?;
            info!(region = %region, image_id = %new_id, waited = ?waited, "Copy available");
            (new_id, waited)
        };

        if !self.accounts.is_empty() {
            service
                .grant_launch_permissions(&image_id, self.accounts)
                .await?;
            info!(region = %region, image_id = %image_id, "Launch permissions granted");
        }

        // The owning account already sees the source tags; every other
        // account writes its own view of the shared image with its own
        // credentials.
        for account in self.accounts.iter().filter(|a| **a != default_account) {
            let account_service = self.resolver.image_service(account, &region).await?;
            account_service
                .create_tags(&image_id, &source_tags)
                .await?;
            info!(region = %region, image_id = %image_id, account = %account, "Tags propagated");
        }

        Ok(RegionReport {
            region,
            image_id,
            waited,
        })
    }
}
