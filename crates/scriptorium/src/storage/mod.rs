//! Blob storage: the temporary OCR bucket and the uploaded originals.

pub mod gcs;
pub mod object_store;
pub mod upload;

pub use gcs::GcsObjectStore;
pub use object_store::{stream_from_bytes, ByteStream, InMemoryObjectStore, ObjectStore};
pub use upload::{FsUploadSource, SourceReference, UploadSource};
