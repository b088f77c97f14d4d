use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use super::errors::{Result, UploadError};
use super::traits::UploadContent;

fn check_range(start: u64, end: u64, size: u64) -> Result<()> {
    if start > end || end > size {
        return Err(UploadError::param_error(format!(
            "Range {}-{} is outside of content of {} bytes",
            start, end, size
        )));
    }
    Ok(())
}

/// Content already held in memory
#[derive(Debug, Clone)]
pub struct MemoryContent {
    data: Bytes,
}

impl MemoryContent {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl UploadContent for MemoryContent {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn slice(&self, start: u64, end: u64) -> Result<Bytes> {
        check_range(start, end, self.size())?;
        Ok(self.data.slice(start as usize..end as usize))
    }
}

/// Content read from disk on demand, one fragment at a time.
#[derive(Debug, Clone)]
pub struct FileContent {
    path: PathBuf,
    size: u64,
}

impl FileContent {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = tokio::fs::metadata(&path).await?.len();

        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadContent for FileContent {
    fn size(&self) -> u64 {
        self.size
    }

    async fn slice(&self, start: u64, end: u64) -> Result<Bytes> {
        check_range(start, end, self.size)?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }
}
