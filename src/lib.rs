//! imgcache - A two-tier memory and disk cache for remotely fetched images.
//!
//! Images are looked up in an in-memory LRU first, then in a directory of
//! files keyed by a hash of their URL, and finally downloaded. Disk writes are
//! serialized on a single background queue and download start/stop events are
//! broadcast to any subscribed observer.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the cache tiers and their adapters.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgcache";
