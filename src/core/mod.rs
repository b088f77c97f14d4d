mod content;
mod errors;
mod traits;
mod types;

pub use content::{FileContent, MemoryContent};
pub use errors::{ErrorResponse, RequestError, Result, ServiceError, UploadError};
pub use traits::{
    AlwaysOnline, ConflictResolver, Connectivity, DataRequest, DataRequestor, RequestBody,
    RequestType, Sleeper, TokioSleeper, UploadContent, UploadProgressCallback,
};
pub use types::{
    ByteRange, ConflictBehavior, ProgressCallback, UploadConfiguration, UploadId, UploadProgress,
    UploadState, UploadedItem,
};
