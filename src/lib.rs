//! A resource cache which finds files in loose directories and package archives, loads them through per-type
//! loaders, and keeps the results around under per-type memory budgets.
//!
//! Games and similar programs refer to their data by names like `Textures/Stone.png`.  Where the bytes actually come
//! from is a deployment detail: during development it's a directory on disk, in a shipped build it's usually a
//! package file, and sometimes both, with one overriding the other.  This crate hides that behind a few pieces:
//!
//! - Names are normalized by [sanitize_name], so `Data\Textures\Stone.png`, `./Textures/Stone.png` and an absolute
//!   path under a registered directory all mean the same thing.
//! - [ResourceRouter]s may rewrite or deny a name before it is looked up.
//! - The [SearchEngine] looks through [PackageArchive]s and resource directories in registration order, packages or
//!   directories first as configured, and hands back a [FileStream].  Package entries may be block compressed.
//! - A [ResourceLoader] turns a stream into a [Resource] in two phases.  The first may run on a background thread; the
//!   second always runs on the main thread.
//! - The [ResourceRegistry] keeps one `Arc` per (type, name).  While anything outside the registry holds that `Arc`
//!   the resource counts as in use and is never evicted; otherwise the least recently used resources are evicted
//!   first when a type goes over its memory budget.
//!
//! To use this crate, implement [Resource] and [ResourceLoader] for your types, build a [ResourceCacheConfig], and
//! construct a [ResourceCache] on the thread that will drive it.  Call [ResourceCache::update] once per frame to finish
//! background loads.
mod archive;
mod background;
mod codec;
mod error;
mod events;
mod name;
mod registry;
mod resource_cache;
mod router;
mod search;
mod stream;
mod traits;

#[cfg(test)]
mod test_support;

pub use archive::*;
pub use background::*;
pub use codec::*;
pub use error::*;
pub use events::*;
pub use name::*;
pub use registry::*;
pub use resource_cache::*;
pub use router::*;
pub use search::*;
pub use stream::*;
pub use traits::*;
