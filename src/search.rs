//! Finding the backing source for a sanitized name among registered directories and packages.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use relative_path::RelativePath;

use crate::*;

type DependencyMap = std::collections::HashMap<String, BTreeSet<ResourceKey>, ahash::RandomState>;

/// Where a directory or package goes in the search order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// Searched after everything registered so far.
    Last,
    /// Inserted at this index, clamped to the current length.
    At(usize),
}

impl Default for Priority {
    fn default() -> Priority {
        Priority::Last
    }
}

fn insert_at<T>(list: &mut Vec<T>, item: T, priority: Priority) {
    match priority {
        Priority::Last => list.push(item),
        Priority::At(i) => list.insert(i.min(list.len()), item),
    }
}

/// The lists background threads read while the main thread may be changing them.  All behind one mutex.
#[derive(Default)]
pub(crate) struct SharedLists {
    pub(crate) dirs: Vec<ResourceDir>,
    pub(crate) packages: Vec<Arc<PackageArchive>>,
    /// Dependency file name to the resources which depend on it.
    pub(crate) dependencies: DependencyMap,
}

pub struct SearchEngine {
    lists: Mutex<SharedLists>,
    access: Arc<dyn PathAccess>,
    packages_first: AtomicBool,
}

/// Join a directory-relative name onto a root, refusing names that would escape it.
fn join_under(root: &Path, name: &str) -> Option<PathBuf> {
    let joined = RelativePath::new(name).to_logical_path(root);
    if joined.starts_with(root) {
        Some(joined)
    } else {
        None
    }
}

impl SearchEngine {
    pub fn new(access: Arc<dyn PathAccess>, packages_first: bool) -> SearchEngine {
        SearchEngine {
            lists: Default::default(),
            access,
            packages_first: AtomicBool::new(packages_first),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedLists> {
        self.lists.lock()
    }

    pub fn check_access(&self, path: &Path) -> bool {
        self.access.check_access(path)
    }

    pub fn packages_first(&self) -> bool {
        self.packages_first.load(Ordering::Relaxed)
    }

    pub fn set_packages_first(&self, value: bool) {
        self.packages_first.store(value, Ordering::Relaxed);
    }

    /// Register a directory.  Returns false if it was already registered.
    pub fn add_dir(&self, dir: ResourceDir, priority: Priority) -> bool {
        let mut lists = self.lock();
        if lists.dirs.contains(&dir) {
            return false;
        }
        insert_at(&mut lists.dirs, dir, priority);
        true
    }

    pub fn remove_dir(&self, absolute: &str) -> bool {
        let mut lists = self.lock();
        let before = lists.dirs.len();
        lists.dirs.retain(|d| d.as_str() != absolute);
        lists.dirs.len() != before
    }

    pub fn dirs(&self) -> Vec<ResourceDir> {
        self.lock().dirs.clone()
    }

    /// Register a package, replacing any package already registered under the same name.
    pub fn add_package(&self, package: Arc<PackageArchive>, priority: Priority) {
        let mut lists = self.lock();
        lists.packages.retain(|p| p.name() != package.name());
        insert_at(&mut lists.packages, package, priority);
    }

    /// Remove a package by its full name or by its file name alone.
    pub fn remove_package(&self, name: &str) -> Option<Arc<PackageArchive>> {
        let name = name.replace('\\', "/");
        let mut lists = self.lock();
        let index = lists.packages.iter().position(|p| {
            p.name() == name || p.name().rsplit('/').next() == Some(name.as_str())
        })?;
        Some(lists.packages.remove(index))
    }

    pub fn packages(&self) -> Vec<Arc<PackageArchive>> {
        self.lock().packages.clone()
    }

    /// Take copies of the lists so that no lock is held while touching the filesystem.
    fn snapshot(&self) -> (Vec<ResourceDir>, Vec<Arc<PackageArchive>>) {
        let lists = self.lock();
        (lists.dirs.clone(), lists.packages.clone())
    }

    fn search_packages(packages: &[Arc<PackageArchive>], name: &str) -> Option<Result<FileStream, ResourceError>> {
        let package = packages.iter().find(|p| p.exists(name))?;
        Some(
            FileStream::from_package(package, name)
                .map(|mut s| {
                    s.set_name(name);
                    s
                })
                .map_err(ResourceError::Io),
        )
    }

    fn search_dirs(dirs: &[ResourceDir], name: &str) -> Option<Result<FileStream, ResourceError>> {
        let path = dirs
            .iter()
            .filter_map(|d| join_under(&d.path(), name))
            .find(|p| p.is_file())?;
        Some(
            FileStream::open(&path, FileMode::Read)
                .map(|mut s| {
                    s.set_name(name);
                    s
                })
                .map_err(ResourceError::Io),
        )
    }

    /// Find `name` in the registered packages and directories, in the order the precedence flag says, falling back to
    /// treating it as an absolute path.
    pub fn find(&self, name: &str) -> Result<FileStream, ResourceError> {
        let (dirs, packages) = self.snapshot();
        let found = if self.packages_first() {
            Self::search_packages(&packages, name).or_else(|| Self::search_dirs(&dirs, name))
        } else {
            Self::search_dirs(&dirs, name).or_else(|| Self::search_packages(&packages, name))
        };
        if let Some(found) = found {
            return found;
        }

        let path = Path::new(name);
        if path.is_absolute() && path.is_file() {
            if !self.check_access(path) {
                return Err(ResourceError::AccessDenied(path.to_path_buf()));
            }
            return FileStream::open(path, FileMode::Read).map_err(ResourceError::Io);
        }

        Err(ResourceError::NotFound(name.to_string()))
    }

    pub fn exists(&self, name: &str) -> bool {
        let (dirs, packages) = self.snapshot();
        if packages.iter().any(|p| p.exists(name)) {
            return true;
        }
        if dirs
            .iter()
            .filter_map(|d| join_under(&d.path(), name))
            .any(|p| p.is_file())
        {
            return true;
        }
        let path = Path::new(name);
        path.is_absolute() && path.is_file() && self.check_access(path)
    }

    /// Full path of a loose file backing `name`, ignoring packages.
    pub fn loose_file_path(&self, name: &str) -> Option<PathBuf> {
        let dirs = self.lock().dirs.clone();
        if let Some(p) = dirs
            .iter()
            .filter_map(|d| join_under(&d.path(), name))
            .find(|p| p.is_file())
        {
            return Some(p);
        }
        let path = Path::new(name);
        if path.is_absolute() && path.is_file() && self.check_access(path) {
            Some(path.to_path_buf())
        } else {
            None
        }
    }
}
