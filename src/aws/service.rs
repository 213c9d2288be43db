//! Image-service seam over the EC2 API
//!
//! `ImageService` abstracts the handful of EC2 calls this tool makes so the
//! replication and cleanup logic can be unit tested without hitting AWS.
//! `Ec2ImageService` is the real implementation, one instance per
//! (account, region) client configuration.

use crate::aws::error::{classify_sdk_error, AmiError};
use crate::aws::AccountId;
use aws_sdk_ec2::types::{Filter, LaunchPermission, LaunchPermissionModifications, Tag};
use std::future::Future;
use tracing::{debug, info};

/// Immutable key/value pair sourced from the origin image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    pub key: String,
    pub value: String,
}

impl ImageTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Lifecycle state of an AMI as reported by DescribeImages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    Available,
    Pending,
    Other(String),
}

impl ImageState {
    pub fn is_available(&self) -> bool {
        matches!(self, ImageState::Available)
    }
}

impl std::fmt::Display for ImageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageState::Available => f.write_str("available"),
            ImageState::Pending => f.write_str("pending"),
            ImageState::Other(s) => f.write_str(s),
        }
    }
}

impl From<&aws_sdk_ec2::types::ImageState> for ImageState {
    fn from(state: &aws_sdk_ec2::types::ImageState) -> Self {
        match state.as_str() {
            "available" => ImageState::Available,
            "pending" => ImageState::Pending,
            other => ImageState::Other(other.to_string()),
        }
    }
}

/// One image as described by the image service
#[derive(Debug, Clone)]
pub struct ImageDescription {
    pub id: String,
    pub name: Option<String>,
    pub state: ImageState,
    pub creation_date: Option<String>,
    pub tags: Vec<ImageTag>,
    /// Snapshot IDs referenced by the image's block-device mappings
    pub snapshot_ids: Vec<String>,
}

/// Outcome of a deregistration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deregistration {
    Deregistered,
    /// The image id no longer existed; deregistration is a no-op
    AlreadyGone,
}

/// The EC2 image operations the core depends on.
///
/// Implemented by `Ec2ImageService` for real AWS and by an in-memory fake in
/// tests.
pub trait ImageService: Send + Sync {
    /// Describe a single image by id. Zero results is a `NotFound` error.
    fn describe_image(
        &self,
        image_id: &str,
    ) -> impl Future<Output = Result<ImageDescription, AmiError>> + Send;

    /// List all images whose tags match every given (key, value) pair.
    fn list_images_by_tags(
        &self,
        tags: &[ImageTag],
    ) -> impl Future<Output = Result<Vec<ImageDescription>, AmiError>> + Send;

    /// Start a cross-region copy of the named source image into this
    /// service's region, returning the new image id.
    fn copy_image(
        &self,
        name: &str,
        source_region: &str,
        source_image_id: &str,
    ) -> impl Future<Output = Result<String, AmiError>> + Send;

    /// Add launch permission for every given account in a single call.
    fn grant_launch_permissions(
        &self,
        image_id: &str,
        accounts: &[AccountId],
    ) -> impl Future<Output = Result<(), AmiError>> + Send;

    /// Apply tags to an image. With a client scoped to a non-owning account
    /// this writes that account's own view of a shared image.
    fn create_tags(
        &self,
        image_id: &str,
        tags: &[ImageTag],
    ) -> impl Future<Output = Result<(), AmiError>> + Send;

    /// Deregister an image. An already-absent id is reported as
    /// `Deregistration::AlreadyGone`, not an error.
    fn deregister_image(
        &self,
        image_id: &str,
    ) -> impl Future<Output = Result<Deregistration, AmiError>> + Send;

    /// Delete a backing snapshot.
    fn delete_snapshot(
        &self,
        snapshot_id: &str,
    ) -> impl Future<Output = Result<(), AmiError>> + Send;
}

/// Real image service backed by an `aws_sdk_ec2::Client`
pub struct Ec2ImageService {
    client: aws_sdk_ec2::Client,
}

impl Ec2ImageService {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(config),
        }
    }
}

impl ImageService for Ec2ImageService {
    async fn describe_image(&self, image_id: &str) -> Result<ImageDescription, AmiError> {
        let response = self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(image_id, &e))?;

        let image = response.images().first().ok_or_else(|| AmiError::NotFound {
            resource_id: image_id.to_string(),
        })?;

        Ok(convert_image(image))
    }

    async fn list_images_by_tags(
        &self,
        tags: &[ImageTag],
    ) -> Result<Vec<ImageDescription>, AmiError> {
        let filters: Vec<Filter> = tags.iter().map(tag_filter).collect();

        let response = self
            .client
            .describe_images()
            .set_filters(Some(filters))
            .send()
            .await
            .map_err(|e| classify_sdk_error("tag filter", &e))?;

        let images = response.images().iter().map(convert_image).collect();
        Ok(images)
    }

    async fn copy_image(
        &self,
        name: &str,
        source_region: &str,
        source_image_id: &str,
    ) -> Result<String, AmiError> {
        let response = self
            .client
            .copy_image()
            .name(name)
            .source_region(source_region)
            .source_image_id(source_image_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(source_image_id, &e))?;

        let new_id = response
            .image_id()
            .ok_or_else(|| AmiError::internal("CopyImage returned no image id"))?
            .to_string();

        info!(source_image_id = %source_image_id, new_image_id = %new_id, "Image copy started");
        Ok(new_id)
    }

    async fn grant_launch_permissions(
        &self,
        image_id: &str,
        accounts: &[AccountId],
    ) -> Result<(), AmiError> {
        let additions = accounts
            .iter()
            .fold(LaunchPermissionModifications::builder(), |b, account| {
                b.add(
                    LaunchPermission::builder()
                        .user_id(account.as_str())
                        .build(),
                )
            })
            .build();

        self.client
            .modify_image_attribute()
            .image_id(image_id)
            .launch_permission(additions)
            .send()
            .await
            .map_err(|e| classify_sdk_error(image_id, &e))?;

        debug!(image_id = %image_id, accounts = accounts.len(), "Launch permissions granted");
        Ok(())
    }

    async fn create_tags(&self, image_id: &str, tags: &[ImageTag]) -> Result<(), AmiError> {
        let mut request = self.client.create_tags().resources(image_id);
        for tag in tags {
            request = request.tags(Tag::builder().key(&tag.key).value(&tag.value).build());
        }

        request
            .send()
            .await
            .map_err(|e| classify_sdk_error(image_id, &e))?;

        debug!(image_id = %image_id, tags = tags.len(), "Tags created");
        Ok(())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<Deregistration, AmiError> {
        let result = self
            .client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(image_id = %image_id, "Image deregistered");
                Ok(Deregistration::Deregistered)
            }
            Err(e) => {
                let err = classify_sdk_error(image_id, &e);
                if err.is_not_found() {
                    Ok(Deregistration::AlreadyGone)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), AmiError> {
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(snapshot_id, &e))?;

        debug!(snapshot_id = %snapshot_id, "Snapshot deleted");
        Ok(())
    }
}

/// Build a `tag:<key> = <value>` equality filter for DescribeImages
fn tag_filter(tag: &ImageTag) -> Filter {
    Filter::builder()
        .name(format!("tag:{}", tag.key))
        .values(&tag.value)
        .build()
}

fn convert_image(image: &aws_sdk_ec2::types::Image) -> ImageDescription {
    let tags = image
        .tags()
        .iter()
        .filter_map(|t| match (t.key(), t.value()) {
            (Some(k), Some(v)) => Some(ImageTag::new(k, v)),
            _ => None,
        })
        .collect();

    let snapshot_ids = image
        .block_device_mappings()
        .iter()
        .filter_map(|m| m.ebs())
        .filter_map(|ebs| ebs.snapshot_id())
        .map(|s| s.to_string())
        .collect();

    ImageDescription {
        id: image.image_id().unwrap_or_default().to_string(),
        name: image.name().map(|s| s.to_string()),
        state: image
            .state()
            .map(ImageState::from)
            .unwrap_or(ImageState::Other("unknown".to_string())),
        creation_date: image.creation_date().map(|s| s.to_string()),
        tags,
        snapshot_ids,
    }
}
