//! Centralized test doubles for the replication and cleanup core.
//!
//! `FakeImageService` is an in-memory `ImageService` that records every call
//! so tests can assert on copy/permission/tag ordering, scripted state
//! sequences, and snapshot deletion attempts without touching AWS.

use crate::aws::account::AccountId;
use crate::aws::context::ImageServiceResolver;
use crate::aws::error::AmiError;
use crate::aws::service::{
    Deregistration, ImageDescription, ImageService, ImageState, ImageTag,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// One recorded CopyImage call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCall {
    pub name: String,
    pub source_region: String,
    pub source_image_id: String,
    pub new_image_id: String,
}

/// In-memory image service recording all interactions
#[derive(Default)]
pub struct FakeImageService {
    images: Mutex<BTreeMap<String, ImageDescription>>,
    /// Per image id: states returned by successive describes
    state_scripts: Mutex<HashMap<String, VecDeque<ImageState>>>,
    describe_counts: Mutex<HashMap<String, usize>>,
    last_tag_filter: Mutex<Option<Vec<ImageTag>>>,
    copy_calls: Mutex<Vec<CopyCall>>,
    next_copy_ids: Mutex<VecDeque<String>>,
    grant_calls: Mutex<Vec<(String, Vec<AccountId>)>>,
    tag_calls: Mutex<Vec<(String, Vec<ImageTag>)>>,
    deregistered: Mutex<Vec<String>>,
    snapshot_deletions: Mutex<Vec<String>>,
    failing_snapshots: Mutex<HashSet<String>>,
    /// Flat call order across copy/grant/tags, for ordering assertions
    op_log: Mutex<Vec<String>>,
}

impl FakeImageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&self, image: ImageDescription) {
        self.images.lock().unwrap().insert(image.id.clone(), image);
    }

    /// Script the states returned by successive describes of `image_id`.
    pub fn script_states(&self, image_id: &str, states: impl IntoIterator<Item = ImageState>) {
        self.state_scripts
            .lock()
            .unwrap()
            .insert(image_id.to_string(), states.into_iter().collect());
    }

    /// The next CopyImage calls return these ids, in order.
    pub fn queue_copy_ids(&self, ids: impl IntoIterator<Item = &'static str>) {
        self.next_copy_ids
            .lock()
            .unwrap()
            .extend(ids.into_iter().map(String::from));
    }

    pub fn fail_snapshot(&self, snapshot_id: &str) {
        self.failing_snapshots
            .lock()
            .unwrap()
            .insert(snapshot_id.to_string());
    }

    pub fn describe_count(&self, image_id: &str) -> usize {
        *self
            .describe_counts
            .lock()
            .unwrap()
            .get(image_id)
            .unwrap_or(&0)
    }

    pub fn copy_calls(&self) -> Vec<CopyCall> {
        self.copy_calls.lock().unwrap().clone()
    }

    pub fn grant_calls(&self) -> Vec<(String, Vec<AccountId>)> {
        self.grant_calls.lock().unwrap().clone()
    }

    pub fn tag_calls(&self) -> Vec<(String, Vec<ImageTag>)> {
        self.tag_calls.lock().unwrap().clone()
    }

    pub fn deregistered(&self) -> Vec<String> {
        self.deregistered.lock().unwrap().clone()
    }

    pub fn snapshot_deletions(&self) -> Vec<String> {
        self.snapshot_deletions.lock().unwrap().clone()
    }

    pub fn last_tag_filter(&self) -> Option<Vec<ImageTag>> {
        self.last_tag_filter.lock().unwrap().clone()
    }

    pub fn op_log(&self) -> Vec<String> {
        self.op_log.lock().unwrap().clone()
    }

    pub fn image_ids(&self) -> Vec<String> {
        self.images.lock().unwrap().keys().cloned().collect()
    }
}

impl ImageService for FakeImageService {
    async fn describe_image(&self, image_id: &str) -> Result<ImageDescription, AmiError> {
        *self
            .describe_counts
            .lock()
            .unwrap()
            .entry(image_id.to_string())
            .or_insert(0) += 1;

        if let Some(script) = self.state_scripts.lock().unwrap().get_mut(image_id) {
            if let Some(state) = script.pop_front() {
                if let Some(image) = self.images.lock().unwrap().get_mut(image_id) {
                    image.state = state;
                }
            }
        }

        self.images
            .lock()
            .unwrap()
            .get(image_id)
            .cloned()
            .ok_or_else(|| AmiError::NotFound {
                resource_id: image_id.to_string(),
            })
    }

    async fn list_images_by_tags(
        &self,
        tags: &[ImageTag],
    ) -> Result<Vec<ImageDescription>, AmiError> {
        *self.last_tag_filter.lock().unwrap() = Some(tags.to_vec());

        let images = self.images.lock().unwrap();
        Ok(images
            .values()
            .filter(|image| tags.iter().all(|t| image.tags.contains(t)))
            .cloned()
            .collect())
    }

    async fn copy_image(
        &self,
        name: &str,
        source_region: &str,
        source_image_id: &str,
    ) -> Result<String, AmiError> {
        let new_id = self
            .next_copy_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("ami-copy-{}", self.copy_calls.lock().unwrap().len()));

        self.copy_calls.lock().unwrap().push(CopyCall {
            name: name.to_string(),
            source_region: source_region.to_string(),
            source_image_id: source_image_id.to_string(),
            new_image_id: new_id.clone(),
        });
        self.op_log
            .lock()
            .unwrap()
            .push(format!("copy {source_image_id} -> {new_id}"));

        // A copy target appears immediately available unless the test
        // pre-inserted a pending image with a scripted state sequence.
        let mut images = self.images.lock().unwrap();
        images.entry(new_id.clone()).or_insert(ImageDescription {
            id: new_id.clone(),
            name: Some(name.to_string()),
            state: ImageState::Available,
            creation_date: None,
            tags: vec![],
            snapshot_ids: vec![],
        });

        Ok(new_id)
    }

    async fn grant_launch_permissions(
        &self,
        image_id: &str,
        accounts: &[AccountId],
    ) -> Result<(), AmiError> {
        self.grant_calls
            .lock()
            .unwrap()
            .push((image_id.to_string(), accounts.to_vec()));
        self.op_log.lock().unwrap().push(format!("grant {image_id}"));
        Ok(())
    }

    async fn create_tags(&self, image_id: &str, tags: &[ImageTag]) -> Result<(), AmiError> {
        self.tag_calls
            .lock()
            .unwrap()
            .push((image_id.to_string(), tags.to_vec()));
        self.op_log.lock().unwrap().push(format!("tags {image_id}"));
        Ok(())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<Deregistration, AmiError> {
        self.deregistered.lock().unwrap().push(image_id.to_string());
        match self.images.lock().unwrap().remove(image_id) {
            Some(_) => Ok(Deregistration::Deregistered),
            None => Ok(Deregistration::AlreadyGone),
        }
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), AmiError> {
        self.snapshot_deletions
            .lock()
            .unwrap()
            .push(snapshot_id.to_string());
        if self.failing_snapshots.lock().unwrap().contains(snapshot_id) {
            return Err(AmiError::Sdk {
                code: Some("InvalidSnapshot.InUse".to_string()),
                message: format!("snapshot {snapshot_id} is in use"),
            });
        }
        Ok(())
    }
}

/// Resolver over a fixed set of fake services
pub struct FakeResolver {
    default_account: AccountId,
    default_region: String,
    services: HashMap<(AccountId, String), Arc<FakeImageService>>,
}

impl FakeResolver {
    pub fn new(default_account: &str, default_region: &str) -> Self {
        Self {
            default_account: AccountId::new(default_account),
            default_region: default_region.to_string(),
            services: HashMap::new(),
        }
    }

    /// Register an empty fake service for (account, region) and return it.
    pub fn add_service(&mut self, account: &str, region: &str) -> Arc<FakeImageService> {
        let service = Arc::new(FakeImageService::new());
        self.services.insert(
            (AccountId::new(account), region.to_string()),
            service.clone(),
        );
        service
    }

    pub fn service(&self, account: &str, region: &str) -> Arc<FakeImageService> {
        self.services[&(AccountId::new(account), region.to_string())].clone()
    }
}

impl ImageServiceResolver for FakeResolver {
    type Service = FakeImageService;

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
    ) -> Result<Arc<FakeImageService>, AmiError> {
        self.services
            .get(&(account.clone(), region.to_string()))
            .cloned()
            .ok_or_else(|| {
                AmiError::internal(format!("no fake service registered for {account}/{region}"))
            })
    }
}
