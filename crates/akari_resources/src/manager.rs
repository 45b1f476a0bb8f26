use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use akari_queue::{ChannelId, Outcome, RequestId, Response, ResponseHandler, WorkQueue};
use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    path::normalize, Error, LoadRequestHandler, LoadState, MetadataStore, Resource,
    ResourceHandle, ResourceRequest, ResourceResponse, ResourcesConfig, Result, Serializer,
};

pub const RESOURCES_CHANNEL: &str = "Resources";

const ASYNC_PRIORITY: u8 = 0;
const SYNC_PRIORITY: u8 = 1;

struct InProgress {
    handle: ResourceHandle,
    request: RequestId,
}

/// Everything the response side mutates, split from the queue so both can be borrowed at once
struct ResourceState {
    meta: MetadataStore,
    loaded: HashMap<PathBuf, ResourceHandle, fxhash::FxBuildHasher>,
    in_progress: HashMap<PathBuf, InProgress, fxhash::FxBuildHasher>,
}

impl ResourceState {
    fn heal_metadata(&mut self, uuid: Uuid, path: &Path) {
        if self.meta.contains_uuid(&uuid) {
            return;
        }

        log::warn!(
            "Loaded resource {} from {:?} without metadata, registering it",
            uuid,
            path
        );

        if let Some(stale) = self.meta.uuid_for(path) {
            if let Err(err) = self.meta.remove(&stale) {
                log::error!("Failed to remove stale metadata of {}: {}", stale, err);
                return;
            }
        }
        if let Err(err) = self.meta.add(uuid, path) {
            log::error!("Failed to register {} at {:?}: {}", uuid, path, err);
        }
    }
}

impl ResponseHandler<ResourceRequest, ResourceResponse> for ResourceState {
    fn handle_response(&mut self, response: Response<ResourceRequest, ResourceResponse>) {
        let id = response.id();
        let aborted = response.is_aborted();
        let (request, outcome) = response.into_parts();
        let ResourceRequest::Load { path: source } = request.into_payload();

        // Found by request id, the entry follows its record when the path changes
        let path = self
            .in_progress
            .iter()
            .find(|(_, entry)| entry.request == id)
            .map(|(path, _)| path.clone());
        let Some(path) = path else {
            log::debug!("Dropping superseded response {} for {:?}", id, source);
            return;
        };
        let Some(InProgress { handle, .. }) = self.in_progress.remove(&path) else {
            return;
        };

        if aborted {
            return;
        }

        match outcome {
            Outcome::Completed(ResourceResponse::Loaded(mut resource)) => {
                resource.initialize();
                let uuid = resource.uuid();
                if uuid != handle.uuid() {
                    log::warn!(
                        "{:?} holds resource {} but its handles were issued as {}",
                        path,
                        uuid,
                        handle.uuid()
                    );
                }
                handle.resolve(Arc::from(resource));

                self.heal_metadata(uuid, &path);

                log::debug!("Loaded {:?}", path);
                self.loaded.insert(path, handle);
            }
            Outcome::Failed(err) => {
                log::error!("Failed to load {:?}: {:#}", path, err);
                handle.fail(format!("{:#}", err));
            }
            Outcome::Aborted => {}
        }
    }
}

/// Loads, caches and saves resources.
///
/// Every path has at most one live load. Asynchronous loads are decoded on the work queue and
/// resolved on the next [`Resources::update`]; a synchronous load of a path that is still
/// loading asynchronously takes over the pending handle.
pub struct Resources {
    state: ResourceState,
    queue: WorkQueue<ResourceRequest, ResourceResponse>,
    channel: ChannelId,
    serializer: Arc<dyn Serializer>,
    response_budget: Option<Duration>,
}

impl Resources {
    pub fn new(config: &ResourcesConfig, serializer: impl Serializer) -> Result<Self> {
        Self::with_serializer(config, Arc::new(serializer))
    }
    pub fn with_serializer(
        config: &ResourcesConfig,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        let meta = MetadataStore::load(&config.metadata_dir)?;

        let mut queue = WorkQueue::new(&config.queue_config())?;
        let channel = queue.channel(RESOURCES_CHANNEL)?;
        queue.add_request_handler(
            channel,
            Arc::new(LoadRequestHandler::new(serializer.clone())),
        )?;

        Ok(Self {
            state: ResourceState {
                meta,
                loaded: HashMap::default(),
                in_progress: HashMap::default(),
            },
            queue,
            channel,
            serializer,
            response_budget: config.response_budget(),
        })
    }
    /// Loads `path` on the calling thread, returns a resolved handle or the decode error
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<ResourceHandle> {
        self.load_internal(path.as_ref(), true)
    }
    /// Returns immediately, the handle resolves during a later [`Resources::update`]
    pub fn load_async(&mut self, path: impl AsRef<Path>) -> Result<ResourceHandle> {
        self.load_internal(path.as_ref(), false)
    }
    pub fn load_from_uuid(&mut self, uuid: &Uuid) -> Result<ResourceHandle> {
        let path = self.registered_path(uuid)?;
        self.load_internal(&path, true)
    }
    pub fn load_from_uuid_async(&mut self, uuid: &Uuid) -> Result<ResourceHandle> {
        let path = self.registered_path(uuid)?;
        self.load_internal(&path, false)
    }
    fn registered_path(&self, uuid: &Uuid) -> Result<PathBuf> {
        match self.state.meta.path_for(uuid) {
            Some(path) => Ok(path.to_owned()),
            None => {
                log::warn!("Cannot load {}: no metadata registered", uuid);
                Err(Error::UnknownUuid(*uuid))
            }
        }
    }
    fn load_internal(&mut self, path: &Path, synchronous: bool) -> Result<ResourceHandle> {
        let path = normalize(path);

        // An invalidated cache entry is reloaded into the same slot
        let stale = match self.state.loaded.get(&path) {
            Some(handle) if handle.is_resolved() => return Ok(handle.clone()),
            Some(handle) => Some(handle.clone()),
            None => None,
        };

        let pending = match self.state.in_progress.get(&path) {
            Some(entry) if !synchronous => return Ok(entry.handle.clone()),
            Some(entry) => Some((entry.handle.clone(), entry.request)),
            None => None,
        };

        let uuid = self
            .state
            .meta
            .uuid_for(&path)
            .ok_or_else(|| Error::NotRegistered(path.clone()))?;
        if !path.is_file() {
            return Err(Error::NotFound(path));
        }

        let handle = match (pending, stale) {
            (Some((handle, request)), _) => {
                log::debug!("Forcing synchronous load of {:?}", path);
                self.queue.abort(request);
                handle
            }
            (None, Some(handle)) => {
                log::debug!("Reloading invalidated {:?}", path);
                self.state.loaded.remove(&path);
                handle
            }
            (None, None) => ResourceHandle::unresolved(uuid),
        };
        let request = self.queue.peek_next_request_id();
        self.state.in_progress.insert(
            path.clone(),
            InProgress {
                handle: handle.clone(),
                request,
            },
        );

        let payload = ResourceRequest::Load { path: path.clone() };
        let submitted = if synchronous {
            self.queue
                .submit_blocking(self.channel, payload, SYNC_PRIORITY, &mut self.state)
        } else {
            self.queue.submit(self.channel, payload, ASYNC_PRIORITY)
        };

        if let Err(err) = submitted {
            self.state.in_progress.remove(&path);
            handle.fail(err.to_string());
            return Err(err.into());
        }

        if synchronous && handle.state() == LoadState::Failed {
            return Err(Error::Decode {
                message: handle.error().unwrap_or_default(),
                path,
            });
        }

        Ok(handle)
    }
    /// Registers `resource` at `path` and writes it there.
    ///
    /// Metadata of a different resource at `path` is replaced. An existing file is only
    /// replaced with `overwrite`.
    pub fn create(
        &mut self,
        resource: &dyn Resource,
        path: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<()> {
        let path = normalize(path);
        let uuid = resource.uuid();

        if self.state.meta.contains_uuid(&uuid) {
            return Err(Error::AlreadyRegistered(uuid));
        }

        if path.exists() {
            if !overwrite {
                return Err(Error::FileExists(path));
            }
            std::fs::remove_file(&path)?;
        }

        if let Some(stale) = self.state.meta.uuid_for(&path) {
            log::warn!("Replacing metadata of {} at {:?}", stale, path);
            self.state.meta.remove(&stale)?;
        }

        self.state.meta.add(uuid, &path)?;
        self.save(resource)
    }
    /// Writes `resource` to the path it is registered at
    pub fn save(&self, resource: &dyn Resource) -> Result<()> {
        let uuid = resource.uuid();
        let path = self
            .state
            .meta
            .path_for(&uuid)
            .ok_or(Error::UnknownUuid(uuid))?;

        self.serializer
            .encode(resource, path)
            .map_err(|err| Error::Encode {
                path: path.to_owned(),
                message: format!("{:#}", err),
            })?;

        log::debug!("Saved {} to {:?}", uuid, path);
        Ok(())
    }
    /// Applies finished asynchronous loads, returns how many responses were handled
    pub fn update(&mut self) -> usize {
        let processed = match self.response_budget {
            Some(budget) => self.queue.process_responses_with_budget(
                self.channel,
                &mut self.state,
                budget,
            ),
            None => self.queue.process_responses(self.channel, &mut self.state),
        };

        processed.unwrap_or_else(|err| {
            log::error!("Failed to process resource responses: {}", err);
            0
        })
    }
    /// Blocks until every submitted load has finished and applies all of them
    pub fn flush(&mut self) -> usize {
        self.queue.wait_idle();

        self.queue
            .process_responses(self.channel, &mut self.state)
            .unwrap_or_else(|err| {
                log::error!("Failed to process resource responses: {}", err);
                0
            })
    }
    pub fn wait_for_load(&mut self, handle: &ResourceHandle) -> LoadState {
        let pending = self
            .state
            .in_progress
            .values()
            .any(|entry| entry.handle.same_slot(handle));
        if pending {
            self.flush();
        }

        handle.state()
    }
    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.state.loaded.contains_key(&normalize(path))
    }
    pub fn is_loading(&self, path: impl AsRef<Path>) -> bool {
        self.state.in_progress.contains_key(&normalize(path))
    }
    pub fn loaded_count(&self) -> usize {
        self.state.loaded.len()
    }
    pub fn pending_count(&self) -> usize {
        self.state.in_progress.len()
    }
    pub fn path_for(&self, uuid: &Uuid) -> Option<&Path> {
        self.state.meta.path_for(uuid)
    }
    pub fn uuid_for(&self, path: impl AsRef<Path>) -> Option<Uuid> {
        self.state.meta.uuid_for(path)
    }
    pub fn metadata(&self) -> &MetadataStore {
        &self.state.meta
    }
    pub fn add_metadata(&mut self, uuid: Uuid, path: impl AsRef<Path>) -> Result<()> {
        self.state.meta.add(uuid, path)
    }
    /// Returns false if `uuid` wasn't registered
    pub fn remove_metadata(&mut self, uuid: &Uuid) -> Result<bool> {
        self.state.meta.remove(uuid)
    }
    /// Moves the record of `uuid`, a cached or loading resource follows its record
    pub fn update_metadata(&mut self, uuid: &Uuid, new_path: impl AsRef<Path>) -> Result<()> {
        let new_path = normalize(new_path);
        let old_path = self.state.meta.path_for(uuid).map(Path::to_owned);

        self.state.meta.update(uuid, &new_path)?;

        let Some(old_path) = old_path else {
            return Ok(());
        };
        if let Some(handle) = self.state.loaded.remove(&old_path) {
            self.state.loaded.insert(new_path.clone(), handle);
        }
        if let Some(entry) = self.state.in_progress.remove(&old_path) {
            self.state.in_progress.insert(new_path, entry);
        }

        Ok(())
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.queue.shutdown();
        self.flush();
    }
}

/// Shareable front of [`Resources`], every call holds the lock for its whole duration
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<Mutex<Resources>>,
}

impl ResourceManager {
    pub fn new(config: &ResourcesConfig, serializer: impl Serializer) -> Result<Self> {
        Ok(Self::from(Resources::new(config, serializer)?))
    }
    pub fn lock(&self) -> MutexGuard<'_, Resources> {
        self.inner.lock()
    }
    pub fn load(&self, path: impl AsRef<Path>) -> Result<ResourceHandle> {
        self.inner.lock().load(path)
    }
    pub fn load_async(&self, path: impl AsRef<Path>) -> Result<ResourceHandle> {
        self.inner.lock().load_async(path)
    }
    pub fn load_from_uuid(&self, uuid: &Uuid) -> Result<ResourceHandle> {
        self.inner.lock().load_from_uuid(uuid)
    }
    pub fn load_from_uuid_async(&self, uuid: &Uuid) -> Result<ResourceHandle> {
        self.inner.lock().load_from_uuid_async(uuid)
    }
    pub fn create(
        &self,
        resource: &dyn Resource,
        path: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<()> {
        self.inner.lock().create(resource, path, overwrite)
    }
    pub fn save(&self, resource: &dyn Resource) -> Result<()> {
        self.inner.lock().save(resource)
    }
    pub fn update(&self) -> usize {
        self.inner.lock().update()
    }
    pub fn flush(&self) -> usize {
        self.inner.lock().flush()
    }
    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.inner.lock().is_loaded(path)
    }
    pub fn is_loading(&self, path: impl AsRef<Path>) -> bool {
        self.inner.lock().is_loading(path)
    }
    pub fn path_for(&self, uuid: &Uuid) -> Option<PathBuf> {
        self.inner.lock().path_for(uuid).map(Path::to_owned)
    }
    pub fn uuid_for(&self, path: impl AsRef<Path>) -> Option<Uuid> {
        self.inner.lock().uuid_for(path)
    }
    pub fn add_metadata(&self, uuid: Uuid, path: impl AsRef<Path>) -> Result<()> {
        self.inner.lock().add_metadata(uuid, path)
    }
    pub fn remove_metadata(&self, uuid: &Uuid) -> Result<bool> {
        self.inner.lock().remove_metadata(uuid)
    }
    pub fn update_metadata(&self, uuid: &Uuid, new_path: impl AsRef<Path>) -> Result<()> {
        self.inner.lock().update_metadata(uuid, new_path)
    }
}

impl From<Resources> for ResourceManager {
    fn from(resources: Resources) -> Self {
        Self {
            inner: Arc::new(Mutex::new(resources)),
        }
    }
}
