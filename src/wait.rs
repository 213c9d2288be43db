//! Waiting for a copied image to become available.
//!
//! Cross-region AMI copies settle on AWS's schedule, so the poll interval is
//! flat rather than exponential: a 5 second cadence keeps the logs readable
//! and the API call volume trivial. The maximum wait bounds the loop with a
//! dedicated timeout error instead of spinning forever.

use crate::aws::error::AmiError;
use crate::aws::service::ImageService;
use crate::image::Ami;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the availability poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between status checks
    pub interval: Duration,
    /// Maximum total time to wait before timing out
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(30 * 60),
        }
    }
}

/// Poll until the image reaches the `available` state.
///
/// Each attempt refreshes the image's metadata and checks its state. Returns
/// the total elapsed wait on success; `AmiError::Timeout` once the elapsed
/// wait reaches `max_wait` without the image becoming available.
pub async fn wait_for_available<S: ImageService>(
    service: &S,
    image: &mut Ami,
    config: &PollConfig,
) -> Result<Duration, AmiError> {
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        image.fetch_metadata(service).await?;

        if image.is_available(service).await? {
            let waited = start.elapsed();
            info!(
                image_id = image.id().unwrap_or_default(),
                region = %image.region(),
                attempts,
                waited = ?waited,
                "Image is available"
            );
            return Ok(waited);
        }

        if start.elapsed() >= config.max_wait {
            return Err(AmiError::Timeout {
                resource: format!(
                    "image {} in {}",
                    image.id().unwrap_or_default(),
                    image.region()
                ),
                waited: start.elapsed(),
            });
        }

        debug!(
            image_id = image.id().unwrap_or_default(),
            region = %image.region(),
            attempt = attempts,
            interval = ?config.interval,
            "Image not yet available, waiting"
        );
        tokio::time::sleep(config.interval).await;
    }
}
