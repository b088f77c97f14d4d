use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::UploadProgressCallback;

/// Piece size the request body is cut into; one progress tick per piece.
pub const PROGRESS_PIECE_SIZE: usize = 64 * 1024;

pin_project! {
    /// Reports the running total of bytes pulled out of the inner stream.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        bytes_sent: u64,
        callback: UploadProgressCallback,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, callback: UploadProgressCallback) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            callback,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    (this.callback)(*this.bytes_sent);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// Splits `data` into [`PROGRESS_PIECE_SIZE`] pieces without copying.
pub fn pieces(data: Bytes) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let mut chunks = Vec::with_capacity(data.len().div_ceil(PROGRESS_PIECE_SIZE));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + PROGRESS_PIECE_SIZE).min(data.len());
        chunks.push(Ok(data.slice(offset..end)));
        offset = end;
    }

    futures::stream::iter(chunks)
}
