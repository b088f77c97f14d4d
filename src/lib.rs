pub mod core;
pub mod transport;
pub mod upload;
pub mod utils;
pub mod config;

// 重新导出核心类型
pub use self::core::{
    ConflictBehavior,
    DataRequest,
    DataRequestor,
    FileContent,
    MemoryContent,
    UploadConfiguration,
    UploadError,
    UploadProgress,
    UploadState,
    UploadedItem,
    Result,
};

pub use transport::HttpRequestor;
pub use upload::{BandwidthVerifier, UploadService, UploadStateMachine, Uploader};
