pub mod bandwidth;
pub mod constants;
pub mod service;
pub mod state_machine;
mod uploader;

pub use bandwidth::BandwidthVerifier;
pub use service::{FragmentOutcome, UploadService, UploadSession, UploadSessionStatus};
pub use state_machine::{ErrorSite, Recovery, UploadStateMachine};
pub use uploader::Uploader;
