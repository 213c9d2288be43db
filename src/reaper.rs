//! Image removal: deregister an AMI and delete its backing snapshots.
//!
//! Deregistering an already-absent image is a logged no-op. Snapshot
//! deletions are attempted for every block-device mapping even when an
//! earlier one fails; the first error is reported to the caller only after
//! all mappings have been tried.

use crate::aws::error::AmiError;
use crate::aws::service::{Deregistration, ImageDescription, ImageService};
use tracing::{debug, info, warn};

/// Deregister the image and delete every snapshot it references.
pub async fn remove_image<S: ImageService>(
    service: &S,
    image: &ImageDescription,
) -> Result<(), AmiError> {
    match service.deregister_image(&image.id).await? {
        Deregistration::Deregistered => {
            info!(image_id = %image.id, "Image deregistered");
        }
        Deregistration::AlreadyGone => {
            warn!(image_id = %image.id, "Image was already deregistered");
        }
    }

    let mut first_error = None;
    for snapshot_id in &image.snapshot_ids {
        match service.delete_snapshot(snapshot_id).await {
            Ok(()) => debug!(snapshot_id = %snapshot_id, "Snapshot deleted"),
            Err(e) => {
                warn!(snapshot_id = %snapshot_id, error = %e, "Failed to delete snapshot");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(
                image_id = %image.id,
                snapshots = image.snapshot_ids.len(),
                "Image and snapshots removed"
            );
            Ok(())
        }
    }
}
