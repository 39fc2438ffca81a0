//! zori-store: where packs live
//!
//! Packs are write-once objects addressed by `(bucket, object)`, where the
//! object name is the pack's content address. Stores are registered on an
//! explicit [`StoreRegistry`] handed to whoever writes packs; there is no
//! process-wide store table.

pub mod backend;
pub mod local;
pub mod naming;
pub mod registry;

pub use backend::PackStore;
pub use local::LocalPackStore;
pub use naming::{generate_bucket_name, installation_id, local_installation_id};
pub use registry::{build_registry, StoreRegistry};
