pub mod backend;
mod error;
pub mod local;
pub mod sidecar;
pub mod sqlite_store;
pub mod store;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use local::LocalStorage;
pub use sidecar::SidecarStore;
pub use sqlite_store::SqliteStore;
pub use store::MetadataStore;
