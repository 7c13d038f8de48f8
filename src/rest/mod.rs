//! HTTP clients for external services: object storage and error reporting

pub mod object_store;
pub mod reporter;
pub mod signing;

pub use object_store::{ObjectStore, ObjectStoreError, S3Client};
pub use reporter::{ErrorReporter, ReporterError, SentryClient};
pub use signing::RequestSigner;
