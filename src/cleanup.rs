//! Retention-based cleanup of old image generations.
//!
//! Images are matched per region by the source image's own tag values for the
//! requested keys, ranked by creation timestamp, and every generation beyond
//! the retention count is deregistered together with its backing snapshots.

use crate::aws::account::AccountId;
use crate::aws::context::ImageServiceResolver;
use crate::aws::error::AmiError;
use crate::aws::service::{ImageDescription, ImageService, ImageTag};
use crate::image::Ami;
use crate::reaper;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// Result of cleaning one region
#[derive(Debug, Clone)]
pub struct RegionCleanupReport {
    pub region: String,
    /// Number of images matching the tag filter
    pub matched: usize,
    /// Image ids that were reaped, oldest last
    pub reaped: Vec<String>,
}

/// Prunes old image generations per region
pub struct RetentionCleaner<'a, R: ImageServiceResolver> {
    resolver: &'a R,
}

impl<'a, R: ImageServiceResolver> RetentionCleaner<'a, R> {
    pub fn new(resolver: &'a R) -> Self {
        Self { resolver }
    }

    /// Keep the newest `versions_to_keep` images matching the source's tags
    /// in each region and reap the rest.
    ///
    /// The match filter is built from the source image's own tag values for
    /// `tag_keys`; requested keys absent from the source are silently
    /// skipped. An empty resulting filter would match every image in the
    /// region, so it is rejected as an error instead. Regions are processed
    /// sequentially and independently; any reap failure aborts the run.
    pub async fn cleanup(
        &self,
        source: &mut Ami,
        regions: &[String],
        tag_keys: &[String],
        versions_to_keep: usize,
    ) -> Result<Vec<RegionCleanupReport>, AmiError> {
        let default_account = self.resolver.default_account().clone();

        let service = self
            .resolver
            .image_service(&default_account, source.region())
            .await?;
        source.fetch_metadata(service.as_ref()).await?;

        let match_tags = select_match_tags(source.tags().unwrap_or_default(), tag_keys);
        if match_tags.is_empty() {
            return Err(AmiError::MissingTagFilter);
        }
        debug!(tags = ?match_tags, "Cleanup tag filter");

        let mut reports = Vec::with_capacity(regions.len());
        for region in regions {
            let report = self
                .cleanup_region(&default_account, region, &match_tags, versions_to_keep)
                .await?;
            reports.push(report);
        }

        Ok(reports)
    }

    async fn cleanup_region(
        &self,
        account: &AccountId,
        region: &str,
        match_tags: &[ImageTag],
        versions_to_keep: usize,
    ) -> Result<RegionCleanupReport, AmiError> {
        let service = self.resolver.image_service(account, region).await?;

        let images = service.list_images_by_tags(match_tags).await?;
        let matched = images.len();
        let ranked = rank_newest_first(images)?;

        let mut reaped = Vec::new();
        for image in ranked.iter().skip(versions_to_keep) {
            info!(region = %region, image_id = %image.id, "Reaping old image generation");
            reaper::remove_image(service.as_ref(), image).await?;
            reaped.push(image.id.clone());
        }

        info!(
            region = %region,
            matched,
            kept = matched - reaped.len(),
            reaped = reaped.len(),
            "Region cleanup complete"
        );

        Ok(RegionCleanupReport {
            region: region.to_string(),
            matched,
            reaped,
        })
    }
}

/// Pick the (key, value) pairs to match on: the source's own value for every
/// requested key that exists on the source image.
fn select_match_tags(source_tags: &[ImageTag], tag_keys: &[String]) -> Vec<ImageTag> {
    let by_key: HashMap<&str, &ImageTag> = source_tags
        .iter()
        .map(|t| (t.key.as_str(), t))
        .collect();

    tag_keys
        .iter()
        .filter_map(|key| by_key.get(key.as_str()).map(|t| (*t).clone()))
        .collect()
}

/// Sort images newest-first by creation timestamp.
///
/// A missing or unparseable timestamp on any image aborts the run: ranking
/// with a bad clock could reap the wrong generations.
fn rank_newest_first(
    images: Vec<ImageDescription>,
) -> Result<Vec<ImageDescription>, AmiError> {
    let mut keyed: Vec<(DateTime<Utc>, ImageDescription)> = images
        .into_iter()
        .map(|image| {
            let raw = image.creation_date.clone().unwrap_or_default();
            let parsed = DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| AmiError::InvalidTimestamp {
                    image_id: image.id.clone(),
                    value: raw,
                })?;
            Ok((parsed, image))
        })
        .collect::<Result<_, AmiError>>()?;

    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(keyed.into_iter().map(|(_, image)| image).collect())
}
