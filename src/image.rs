//! In-memory representation of one AMI and its per-region replicas
//!
//! Name, tags, and state are resolved lazily from DescribeImages. Name and
//! tags are set at most once and never overwritten - a freshly copied image
//! can report an empty name and no tags, and a later refresh must not clobber
//! values that were already resolved. State is refreshed on every fetch.

use crate::aws::error::AmiError;
use crate::aws::service::{ImageService, ImageState, ImageTag};
use std::collections::BTreeMap;
use tracing::debug;

/// One AMI identity in one region.
///
/// The source image owns a map of region -> replica. Replicas are created
/// eagerly from the requested target-region list before any network call;
/// each replica's id is bound exactly once after its copy succeeds.
#[derive(Debug)]
pub struct Ami {
    id: Option<String>,
    region: String,
    name: Option<String>,
    tags: Option<Vec<ImageTag>>,
    state: Option<ImageState>,
    replicas: BTreeMap<String, Ami>,
}

impl Ami {
    /// An image known by id in the given region.
    pub fn new(id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            region: region.into(),
            name: None,
            tags: None,
            state: None,
            replicas: BTreeMap::new(),
        }
    }

    /// A source image plus one unbound replica per requested target region.
    pub fn with_target_regions(
        id: impl Into<String>,
        region: impl Into<String>,
        target_regions: &[String],
    ) -> Self {
        let mut ami = Ami::new(id, region);
        ami.replicas = target_regions
            .iter()
            .map(|r| (r.clone(), Ami::unbound(r)))
            .collect();
        ami
    }

    /// A replica that only knows its region; its id is bound after the copy.
    fn unbound(region: impl Into<String>) -> Self {
        Self {
            id: None,
            region: region.into(),
            name: None,
            tags: None,
            state: None,
            replicas: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tags(&self) -> Option<&[ImageTag]> {
        self.tags.as_deref()
    }

    pub fn state(&self) -> Option<&ImageState> {
        self.state.as_ref()
    }

    /// Bind the replica to its newly copied image id. Called exactly once
    /// per replica, after which the entity is read-only apart from state.
    pub fn bind_id(&mut self, id: impl Into<String>) {
        debug_assert!(self.id.is_none(), "image id bound twice");
        self.id = Some(id.into());
    }

    /// Move the replicas out for per-region processing.
    pub fn take_replicas(&mut self) -> BTreeMap<String, Ami> {
        std::mem::take(&mut self.replicas)
    }

    fn bound_id(&self) -> Result<&str, AmiError> {
        self.id
            .as_deref()
            .ok_or_else(|| AmiError::internal("image id not bound before metadata fetch"))
    }

    /// Look up this image in its region and cache the result.
    ///
    /// Fails with `NotFound` when the describe returns zero images. Safe to
    /// repeat: name and tags are only cached while unset, state is refreshed
    /// on every call.
    pub async fn fetch_metadata<S: ImageService>(&mut self, service: &S) -> Result<(), AmiError> {
        let id = self.bound_id()?.to_string();
        debug!(image_id = %id, region = %self.region, "Fetching image metadata");

        let description = service.describe_image(&id).await?;

        if self.name.is_none() {
            if let Some(name) = description.name {
                debug!(image_id = %id, name = %name, "Resolved image name");
                self.name = Some(name);
            }
        }

        if self.tags.is_none() && !description.tags.is_empty() {
            debug!(image_id = %id, tags = description.tags.len(), "Resolved image tags");
            self.tags = Some(description.tags);
        }

        self.state = Some(description.state);
        Ok(())
    }

    /// Whether the image is in the `available` state, fetching metadata
    /// first if the state has never been resolved.
    pub async fn is_available<S: ImageService>(&mut self, service: &S) -> Result<bool, AmiError> {
        if self.state.is_none() {
            self.fetch_metadata(service).await?;
        }
        Ok(self
            .state
            .as_ref()
            .is_some_and(ImageState::is_available))
    }
}
