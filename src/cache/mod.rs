//! In-process mirror of cluster objects
//!
//! The registry holds the latest snapshot of every mirrored object and the
//! synchronizer keeps it, and the advertised resource list, in step with the
//! cluster watch stream.

pub mod key;
pub mod registry;
pub mod sync;

pub use key::ResourceKey;
pub use registry::{ResourceRegistry, Snapshot};
pub use sync::{EventHandler, ExposureSurface, LookupFn, Mirrored, Synchronizer};
