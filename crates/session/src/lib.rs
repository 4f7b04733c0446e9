pub mod blob;
pub mod config;
pub mod service;
pub mod store;

pub use blob::{content_key, BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::{BlobConfig, ConfigError, RecognizerConfig, ServiceConfig};
pub use service::{AddImageOutcome, CompleteOutcome, SessionService, SUPPORTED_MEDIA_TYPES};
pub use store::{MemoryStore, SessionStore};
