pub mod progress;
pub mod retry;

pub use progress::{format_bytes, format_progress};
pub use retry::RetryStrategy;
