//! The [ResourceCache] ties everything together: names go through sanitization and the routers, files are found by
//! the [SearchEngine], bytes go through a type's [ResourceLoader], and the result is kept in the [ResourceRegistry]
//! under the type's memory budget.
//!
//! The thread which constructs the cache is its main thread.  Files may be opened from anywhere, but anything which
//! changes the registry must happen on the main thread and otherwise fails with [ResourceError::NotMainThread].
//! Background loads run their first phase on worker threads and are finished by [ResourceCache::update].
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use relative_path::RelativePathBuf;

use crate::*;

type PlaceholderMap =
    std::collections::HashMap<ResourceType, Arc<dyn Resource>, ahash::RandomState>;

pub const DEFAULT_FINISH_BACKGROUND_RESOURCES_MS: u64 = 5;
pub const DEFAULT_WORKER_THREADS: usize = 2;
pub const DEFAULT_FINISHED_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Debug, derive_builder::Builder)]
pub struct ResourceCacheConfig {
    /// Search packages before loose directories.
    #[builder(default = "true")]
    pub search_packages_first: bool,
    /// Hand back the type's registered placeholder instead of an error when a load fails.
    #[builder(default = "false")]
    pub return_failed_resources: bool,
    /// How long each [ResourceCache::update] may spend finishing background loads.
    #[builder(default = "DEFAULT_FINISH_BACKGROUND_RESOURCES_MS")]
    pub finish_background_resources_ms: u64,
    #[builder(default = "DEFAULT_WORKER_THREADS")]
    pub worker_threads: usize,
    /// Loads which have finished phase one but not yet been finalized.  Workers block when this is full.
    #[builder(default = "DEFAULT_FINISHED_QUEUE_CAPACITY")]
    pub finished_queue_capacity: usize,
    #[builder(default)]
    pub package_name_case: NameCase,
    /// Relative resource directories resolve against this.  Defaults to the executable's directory.
    #[builder(setter(into, strip_option), default)]
    pub base_dir: Option<PathBuf>,
}

impl Default for ResourceCacheConfig {
    fn default() -> ResourceCacheConfig {
        ResourceCacheConfig {
            search_packages_first: true,
            return_failed_resources: false,
            finish_background_resources_ms: DEFAULT_FINISH_BACKGROUND_RESOURCES_MS,
            worker_threads: DEFAULT_WORKER_THREADS,
            finished_queue_capacity: DEFAULT_FINISHED_QUEUE_CAPACITY,
            package_name_case: NameCase::default(),
            base_dir: None,
        }
    }
}

fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_default()
}

pub struct ResourceCache {
    base_dir: PathBuf,
    package_name_case: NameCase,
    return_failed: AtomicBool,
    finish_ms: AtomicU64,
    search: Arc<SearchEngine>,
    routers: RouterChain,
    loaders: SharedLoaders,
    registry: Mutex<ResourceRegistry>,
    placeholders: RwLock<PlaceholderMap>,
    events: EventDispatcher,
    // Last, so the workers are joined before anything they might still be reading goes away.
    background: BackgroundLoader,
}

impl ResourceCache {
    /// A cache which drops its events, allows every path and uses the system clock.
    pub fn new(config: ResourceCacheConfig) -> Result<ResourceCache, ResourceError> {
        ResourceCache::with_collaborators(
            config,
            Arc::new(NullSink),
            Arc::new(AllowedPaths::new()),
            Arc::new(SystemClock::default()),
        )
    }

    pub fn with_collaborators(
        config: ResourceCacheConfig,
        sink: Arc<dyn EventSink>,
        access: Arc<dyn PathAccess>,
        clock: Arc<dyn Clock>,
    ) -> Result<ResourceCache, ResourceError> {
        let search = Arc::new(SearchEngine::new(access, config.search_packages_first));
        let loaders: SharedLoaders = Default::default();
        let background = BackgroundLoader::new(
            config.worker_threads,
            config.finished_queue_capacity,
            search.clone(),
            loaders.clone(),
        )?;

        Ok(ResourceCache {
            base_dir: config.base_dir.unwrap_or_else(executable_dir),
            package_name_case: config.package_name_case,
            return_failed: AtomicBool::new(config.return_failed_resources),
            finish_ms: AtomicU64::new(config.finish_background_resources_ms),
            search,
            routers: RouterChain::new(),
            loaders,
            registry: Mutex::new(ResourceRegistry::new(clock)),
            placeholders: Default::default(),
            events: EventDispatcher::new(sink),
            background,
        })
    }

    fn require_main_thread(&self) -> Result<(), ResourceError> {
        if self.events.is_main_thread() {
            Ok(())
        } else {
            Err(ResourceError::NotMainThread)
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Register the loader for its resource type, replacing any previous loader for that type.
    pub fn add_loader<L: ResourceLoader>(&self, loader: L) {
        let ty = loader.resource_type();
        tracing::debug!(resource_type = %ty, "Registered loader");
        self.loaders.write().insert(ty, Arc::new(loader));
    }

    fn loader(&self, ty: ResourceType) -> Result<Arc<dyn ErasedLoader>, ResourceError> {
        self.loaders
            .read()
            .get(&ty)
            .cloned()
            .ok_or(ResourceError::UnknownType(ty))
    }

    /// The object handed back for failed loads of `ty` when failed resources are returned.
    pub fn register_failed_placeholder(&self, ty: ResourceType, placeholder: Arc<dyn Resource>) {
        self.placeholders.write().insert(ty, placeholder);
    }

    pub fn set_search_packages_first(&self, value: bool) {
        self.search.set_packages_first(value);
    }

    pub fn search_packages_first(&self) -> bool {
        self.search.packages_first()
    }

    pub fn set_return_failed_resources(&self, value: bool) {
        self.return_failed.store(value, Ordering::Relaxed);
    }

    pub fn return_failed_resources(&self) -> bool {
        self.return_failed.load(Ordering::Relaxed)
    }

    pub fn set_finish_background_resources_ms(&self, ms: u64) {
        self.finish_ms.store(ms, Ordering::Relaxed);
    }

    pub fn finish_background_resources_ms(&self) -> u64 {
        self.finish_ms.load(Ordering::Relaxed)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        RelativePathBuf::from_path(path)
            .map(|r| r.to_logical_path(&self.base_dir))
            .unwrap_or_else(|_| self.base_dir.join(path))
    }

    /// Add a directory to search.  Relative paths are resolved against the base directory.  Adding a directory which
    /// is already registered does nothing.
    pub fn add_resource_dir(&self, path: &Path, priority: Priority) -> Result<(), ResourceError> {
        let absolute = self.resolve_path(path);
        if !self.search.check_access(&absolute) {
            tracing::warn!("Access denied to resource directory {}", absolute.display());
            return Err(ResourceError::AccessDenied(absolute));
        }
        if !absolute.is_dir() {
            return Err(ResourceError::NotFound(absolute.display().to_string()));
        }

        if self
            .search
            .add_dir(ResourceDir::new(&absolute, &self.base_dir), priority)
        {
            tracing::info!("Added resource path {}", absolute.display());
        }
        Ok(())
    }

    pub fn remove_resource_dir(&self, path: &Path) -> bool {
        let dir = ResourceDir::new(&self.resolve_path(path), &self.base_dir);
        let removed = self.search.remove_dir(dir.as_str());
        if removed {
            tracing::info!("Removed resource path {}", dir.as_str());
        }
        removed
    }

    pub fn resource_dirs(&self) -> Vec<PathBuf> {
        self.search.dirs().iter().map(ResourceDir::path).collect()
    }

    /// Open and register a package file.  An archive which fails to parse is not registered.
    pub fn add_package_file(
        &self,
        path: &Path,
        priority: Priority,
    ) -> Result<Arc<PackageArchive>, ResourceError> {
        let path = self.resolve_path(path);
        if !self.search.check_access(&path) {
            tracing::warn!("Access denied to package file {}", path.display());
            return Err(ResourceError::AccessDenied(path));
        }
        let package = Arc::new(PackageArchive::open_with(
            &path,
            self.package_name_case,
            Arc::new(DeflateCodec),
        )?);
        self.add_package(package.clone(), priority);
        Ok(package)
    }

    pub fn add_package(&self, package: Arc<PackageArchive>, priority: Priority) {
        tracing::info!(
            entries = package.num_entries(),
            "Added resource package {}",
            package.name()
        );
        self.search.add_package(package, priority);
    }

    /// Remove a package by full name or file name.  Optionally releases every cached resource named by one of its
    /// entries, which requires the main thread.  Returns whether a package was removed.
    pub fn remove_package_file(
        &self,
        name: &str,
        release_resources: bool,
        force: bool,
    ) -> Result<bool, ResourceError> {
        if release_resources {
            self.require_main_thread()?;
        }
        let package = match self.search.remove_package(name) {
            Some(p) => p,
            None => return Ok(false),
        };
        tracing::info!("Removed resource package {}", package.name());

        if release_resources {
            let mut registry = self.registry.lock();
            for entry in package.entry_names() {
                for ty in registry.types_with(entry) {
                    registry.release(ty, entry, force);
                }
            }
        }
        Ok(true)
    }

    pub fn packages(&self) -> Vec<Arc<PackageArchive>> {
        self.search.packages()
    }

    pub fn add_resource_router(&self, router: Arc<dyn ResourceRouter>, add_first: bool) {
        self.routers.add(router, add_first);
    }

    pub fn remove_resource_router(&self, router: &Arc<dyn ResourceRouter>) -> bool {
        self.routers.remove(router)
    }

    pub fn sanitize_name(&self, name: &str) -> String {
        crate::sanitize_name(name, &self.search.dirs())
    }

    /// Sanitize, route, and sanitize again.
    fn route(&self, name: &str, kind: RouteKind) -> Result<String, ResourceError> {
        let sanitized = self.sanitize_name(name);
        if sanitized.is_empty() {
            return Err(ResourceError::EmptyName);
        }
        let routed = self
            .routers
            .route(sanitized.clone(), kind)
            .map(|r| self.sanitize_name(&r))
            .filter(|r| !r.is_empty());
        match routed {
            Some(r) => Ok(r),
            None => {
                tracing::debug!("Resource router denied {}", sanitized);
                Err(ResourceError::RouterDenied(sanitized))
            }
        }
    }

    /// Log a failed request and raise the matching event if asked to.
    fn report_failure(&self, ty: ResourceType, name: &str, error: &ResourceError, notify: bool) {
        match error {
            ResourceError::NotFound(_) => {
                if notify {
                    tracing::error!("Could not find resource {}", name);
                    self.events.send(ResourceEvent::ResourceNotFound {
                        name: name.to_string(),
                    });
                } else {
                    tracing::debug!("Could not find resource {}", name);
                }
            }
            ResourceError::AccessDenied(path) => {
                tracing::warn!("Access denied to {}", path.display());
            }
            ResourceError::UnknownType(_) => {
                tracing::error!("Could not load unknown resource type {}", ty);
                if notify {
                    self.events.send(ResourceEvent::UnknownResourceType {
                        resource_type: ty,
                        name: name.to_string(),
                    });
                }
            }
            ResourceError::ParseFailure { source, .. } => {
                tracing::error!(
                    resource_type = %ty,
                    "Failed to load resource {}: {}",
                    name,
                    source
                );
                if notify {
                    self.events.send(ResourceEvent::LoadFailed {
                        resource_type: ty,
                        name: name.to_string(),
                    });
                }
            }
            other => {
                tracing::error!(resource_type = %ty, "Failed to load resource {}: {}", name, other);
                if notify {
                    self.events.send(ResourceEvent::LoadFailed {
                        resource_type: ty,
                        name: name.to_string(),
                    });
                }
            }
        }
    }

    /// Open a file by name.  Works from any thread.
    pub fn get_file(&self, name: &str, notify: bool) -> Result<FileStream, ResourceError> {
        let name = self.route(name, RouteKind::GetFile)?;
        self.search.find(&name).map_err(|e| {
            if let ResourceError::NotFound(_) = e {
                if notify {
                    tracing::error!("Could not find resource {}", name);
                    self.events.send(ResourceEvent::ResourceNotFound { name: name.clone() });
                }
            }
            e
        })
    }

    pub fn exists(&self, name: &str) -> bool {
        match self.route(name, RouteKind::CheckExists) {
            Ok(name) => self.search.exists(&name),
            Err(_) => false,
        }
    }

    /// Full filesystem path of the loose file backing `name`, if there is one.
    pub fn resource_file_name(&self, name: &str) -> Option<PathBuf> {
        let name = self.sanitize_name(name);
        if name.is_empty() {
            return None;
        }
        self.search.loose_file_path(&name)
    }

    /// Both phases of a load, on this thread, without touching the registry.
    fn load(&self, ty: ResourceType, name: &str) -> Result<Arc<dyn Resource>, ResourceError> {
        let loader = self.loader(ty)?;
        let key = (ty, name.to_string());
        let staged = crate::background::begin_load(&self.search, &self.loaders, &key)?;
        loader
            .end_load(name, staged)
            .map_err(|source| ResourceError::ParseFailure {
                name: name.to_string(),
                source,
            })
    }

    fn failed(
        &self,
        ty: ResourceType,
        name: &str,
        error: ResourceError,
        notify: bool,
    ) -> Result<Arc<dyn Resource>, ResourceError> {
        self.report_failure(ty, name, &error, notify);
        self.placeholder_or(ty, error)
    }

    fn placeholder_or(
        &self,
        ty: ResourceType,
        error: ResourceError,
    ) -> Result<Arc<dyn Resource>, ResourceError> {
        if self.return_failed_resources() {
            if let Some(placeholder) = self.placeholders.read().get(&ty) {
                return Ok(placeholder.clone());
            }
        }
        Err(error)
    }

    /// Finish a background job on the main thread.  Returns the error if it failed; it has already been reported.
    fn finalize_background(&self, item: Finished, job: InFlight) -> Option<ResourceError> {
        let Finished { key, result } = item;
        let (ty, name) = key;
        let result = result.and_then(|staged| {
            self.loader(ty)?
                .end_load(&name, staged)
                .map_err(|source| ResourceError::ParseFailure {
                    name: name.clone(),
                    source,
                })
        });

        let (resource, error) = match result {
            Ok(resource) => {
                tracing::debug!(resource_type = %ty, "Finished background load of {}", name);
                let mut registry = self.registry.lock();
                registry.insert(ty, &name, resource.clone());
                registry.update_group(ty);
                (Some(resource), None)
            }
            Err(e) => {
                self.report_failure(ty, &name, &e, job.notify);
                (None, Some(e))
            }
        };

        for caller in job.callers {
            self.events.send(ResourceEvent::BackgroundLoadFinished {
                resource_type: ty,
                name: name.clone(),
                success: resource.is_some(),
                resource: resource.clone(),
                caller,
            });
        }
        error
    }

    /// Get a resource, loading it if it isn't cached.
    ///
    /// If a background load of the same resource is in flight, this waits for it rather than loading twice.
    pub fn get_resource(
        &self,
        ty: ResourceType,
        name: &str,
        notify: bool,
    ) -> Result<Arc<dyn Resource>, ResourceError> {
        self.require_main_thread()?;
        let name = self.route(name, RouteKind::GetFile)?;
        let key = (ty, name);

        if self.background.is_loading(&key) {
            tracing::debug!("Waiting for background load of {}", key.1);
            let mut waited_error = None;
            self.background.wait_for_resource(&key, |item, job| {
                let ours = item.key == key;
                let error = self.finalize_background(item, job);
                if ours {
                    waited_error = error;
                }
            });
            // Already reported when the job finished.
            if let Some(e) = waited_error {
                return self.placeholder_or(ty, e);
            }
        }

        if let Some(existing) = self.registry.lock().get(ty, &key.1) {
            return Ok(existing);
        }

        tracing::debug!(resource_type = %ty, "Loading resource {}", key.1);
        match self.load(ty, &key.1) {
            Ok(resource) => {
                let mut registry = self.registry.lock();
                registry.insert(ty, &key.1, resource.clone());
                registry.update_group(ty);
                Ok(resource)
            }
            Err(e) => self.failed(ty, &key.1, e, notify),
        }
    }

    /// [ResourceCache::get_resource], downcast to the concrete type.
    pub fn get_typed<T: TypedResource>(
        &self,
        name: &str,
        notify: bool,
    ) -> Result<Arc<T>, ResourceError> {
        self.get_resource(T::TYPE, name, notify)?
            .into_any_arc()
            .downcast::<T>()
            .map_err(|_| ResourceError::TypeMismatch {
                name: name.to_string(),
            })
    }

    /// Get a resource only if it's already cached.  Off the main thread this always returns `None`.
    pub fn get_existing_resource(&self, ty: ResourceType, name: &str) -> Option<Arc<dyn Resource>> {
        if !self.events.is_main_thread() {
            tracing::error!("Attempted to get a resource from outside the main thread");
            return None;
        }
        let name = self.route(name, RouteKind::GetFile).ok()?;
        self.registry.lock().get(ty, &name)
    }

    /// Load a resource without caching it.
    pub fn get_temp_resource(
        &self,
        ty: ResourceType,
        name: &str,
        notify: bool,
    ) -> Result<Arc<dyn Resource>, ResourceError> {
        self.require_main_thread()?;
        let name = self.route(name, RouteKind::GetFile)?;
        self.load(ty, &name).map_err(|e| {
            self.report_failure(ty, &name, &e, notify);
            e
        })
    }

    /// Queue a resource for loading on a worker thread.  Returns `Ok(false)` if it is already cached.
    ///
    /// A request for a resource already being loaded joins that load.  Every request gets its own
    /// [ResourceEvent::BackgroundLoadFinished], tagged with its `caller`, once [ResourceCache::update] finishes the load.
    /// Fails with [ResourceError::LoaderShutDown] if the workers are gone.
    pub fn background_load_resource(
        &self,
        ty: ResourceType,
        name: &str,
        notify: bool,
        caller: Option<CallerId>,
    ) -> Result<bool, ResourceError> {
        self.require_main_thread()?;
        let name = self.route(name, RouteKind::GetFile)?;
        if self.registry.lock().contains(ty, &name) {
            return Ok(false);
        }
        if let Err(e) = self.loader(ty) {
            self.report_failure(ty, &name, &e, notify);
            return Err(e);
        }
        self.background.queue((ty, name), caller, notify)?;
        Ok(true)
    }

    pub fn num_background_load_resources(&self) -> usize {
        self.background.num_pending()
    }

    /// Finish background loads for up to the configured time, then deliver any events raised off the main thread.
    /// Returns how many loads were finished.
    pub fn update(&self) -> usize {
        if !self.events.is_main_thread() {
            tracing::error!("ResourceCache::update called from outside the main thread");
            return 0;
        }
        let budget = Duration::from_millis(self.finish_background_resources_ms());
        let done = self
            .background
            .finish_resources(budget, |item, job| {
                self.finalize_background(item, job);
            });
        self.events.flush();
        done
    }

    /// Block until every queued background load is finished.
    pub fn wait_for_background_loads(&self) -> Result<(), ResourceError> {
        self.require_main_thread()?;
        self.background
            .wait_for_all(|item, job| {
                self.finalize_background(item, job);
            });
        self.events.flush();
        Ok(())
    }

    /// Register a resource created outside the cache.
    pub fn add_manual_resource(
        &self,
        ty: ResourceType,
        name: &str,
        resource: Arc<dyn Resource>,
    ) -> Result<EvictionOutcome, ResourceError> {
        self.require_main_thread()?;
        let name = self.sanitize_name(name);
        self.registry.lock().add_manual(ty, &name, resource)
    }

    pub fn release_resource(
        &self,
        ty: ResourceType,
        name: &str,
        force: bool,
    ) -> Result<bool, ResourceError> {
        self.require_main_thread()?;
        let name = self.sanitize_name(name);
        Ok(self.registry.lock().release(ty, &name, force))
    }

    pub fn release_resources(&self, ty: ResourceType, force: bool) -> Result<usize, ResourceError> {
        self.require_main_thread()?;
        Ok(self.registry.lock().release_type(ty, force))
    }

    /// Release resources of any type whose name contains `partial`.
    pub fn release_resources_by_name(
        &self,
        partial: &str,
        force: bool,
    ) -> Result<usize, ResourceError> {
        self.require_main_thread()?;
        Ok(self.registry.lock().release_partial(None, partial, force))
    }

    /// Release resources of `ty` whose name contains `partial`.
    pub fn release_type_by_name(
        &self,
        ty: ResourceType,
        partial: &str,
        force: bool,
    ) -> Result<usize, ResourceError> {
        self.require_main_thread()?;
        Ok(self.registry.lock().release_partial(Some(ty), partial, force))
    }

    pub fn release_all_resources(&self, force: bool) -> Result<usize, ResourceError> {
        self.require_main_thread()?;
        Ok(self.registry.lock().release_all(force))
    }

    /// Load a cached resource again from its file, replacing the cached handle.  Holders of the old handle keep the
    /// old object.  On failure the old handle stays cached.
    pub fn reload_resource(&self, ty: ResourceType, name: &str) -> Result<(), ResourceError> {
        self.require_main_thread()?;
        let name = self.route(name, RouteKind::GetFile)?;
        self.reload_key(ty, &name)
    }

    fn reload_key(&self, ty: ResourceType, name: &str) -> Result<(), ResourceError> {
        self.events.send(ResourceEvent::ReloadStarted {
            resource_type: ty,
            name: name.to_string(),
        });

        // Otherwise the queued load would land on top of the reloaded one.
        let key = (ty, name.to_string());
        if self.background.is_loading(&key) {
            self.background.wait_for_resource(&key, |item, job| {
                self.finalize_background(item, job);
            });
        }

        match self.load(ty, name) {
            Ok(resource) => {
                {
                    let mut registry = self.registry.lock();
                    registry.insert(ty, name, resource.clone());
                    registry.update_group(ty);
                }
                tracing::debug!(resource_type = %ty, "Reloaded {}", name);
                self.events.send(ResourceEvent::ReloadFinished {
                    resource_type: ty,
                    name: name.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.report_failure(ty, name, &e, true);
                self.events.send(ResourceEvent::ReloadFailed {
                    resource_type: ty,
                    name: name.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Record that the resource `(ty, resource_name)` was built from the file `dependency`, so that
    /// [ResourceCache::reload_resource_with_dependencies] reloads it when that file changes.
    pub fn store_resource_dependency(
        &self,
        ty: ResourceType,
        resource_name: &str,
        dependency: &str,
    ) {
        let resource_name = self.sanitize_name(resource_name);
        let dependency = self.sanitize_name(dependency);
        if resource_name.is_empty() || dependency.is_empty() {
            return;
        }
        self.search
            .lock()
            .dependencies
            .entry(dependency)
            .or_default()
            .insert((ty, resource_name));
    }

    /// Forget every dependency recorded for a resource.
    pub fn reset_dependencies(&self, ty: ResourceType, resource_name: &str) {
        let key = (ty, self.sanitize_name(resource_name));
        let mut lists = self.search.lock();
        for dependents in lists.dependencies.values_mut() {
            dependents.remove(&key);
        }
        lists.dependencies.retain(|_, d| !d.is_empty());
    }

    /// React to a changed file: reload every cached resource with that name, then every cached resource recorded as
    /// depending on it.  Returns how many reloads succeeded.
    pub fn reload_resource_with_dependencies(
        &self,
        file_name: &str,
    ) -> Result<usize, ResourceError> {
        self.require_main_thread()?;
        let name = self.sanitize_name(file_name);
        if name.is_empty() {
            return Err(ResourceError::EmptyName);
        }

        let mut targets: Vec<ResourceKey> = self
            .registry
            .lock()
            .types_with(&name)
            .into_iter()
            .map(|ty| (ty, name.clone()))
            .collect();
        let dependents: Vec<ResourceKey> = self
            .search
            .lock()
            .dependencies
            .get(&name)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        {
            let registry = self.registry.lock();
            targets.extend(
                dependents
                    .into_iter()
                    .filter(|(ty, n)| registry.contains(*ty, n) && *n != name),
            );
        }

        let mut reloaded = 0;
        for (ty, n) in targets {
            if self.reload_key(ty, &n).is_ok() {
                reloaded += 1;
            }
        }
        Ok(reloaded)
    }

    /// Set a type's memory budget in bytes, 0 for unlimited, and evict down to it.
    pub fn set_memory_budget(
        &self,
        ty: ResourceType,
        budget: u64,
    ) -> Result<EvictionOutcome, ResourceError> {
        self.require_main_thread()?;
        Ok(self.registry.lock().set_memory_budget(ty, budget))
    }

    pub fn memory_budget(&self, ty: ResourceType) -> u64 {
        self.registry.lock().memory_budget(ty)
    }

    pub fn memory_use(&self, ty: ResourceType) -> u64 {
        self.registry.lock().memory_use(ty)
    }

    pub fn total_memory_use(&self) -> u64 {
        self.registry.lock().total_memory_use()
    }

    pub fn memory_report(&self) -> String {
        self.registry.lock().memory_report()
    }

    /// Every cached resource of a type.
    pub fn resources(&self, ty: ResourceType) -> Vec<Arc<dyn Resource>> {
        self.registry.lock().resources(ty)
    }

    pub fn resource_names(&self, ty: ResourceType) -> Vec<String> {
        self.registry.lock().names(ty)
    }
}
