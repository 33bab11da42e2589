//! Persistence: object store gateway, metadata DB, and the conversion queue

pub mod database;
pub mod object_store;
pub mod queue;

pub use database::MetadataDb;
pub use object_store::{document_key, markdown_key, safe_filename, FsObjectStore, GcsObjectStore, ObjectStore};
pub use queue::ConversionJob;
