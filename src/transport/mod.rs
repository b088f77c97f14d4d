mod progress_stream;
mod requestor;

pub use progress_stream::{pieces, ProgressStream, PROGRESS_PIECE_SIZE};
pub use requestor::HttpRequestor;
