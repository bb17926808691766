// Where ingestion input comes from: a file on disk or a buffer in memory

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::Result;

#[derive(Debug, Clone)]
pub enum ByteSource {
    Path(PathBuf),
    Memory(Bytes),
}

impl ByteSource {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        ByteSource::Path(path.as_ref().to_path_buf())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        ByteSource::Memory(bytes.into())
    }

    /// Diagnostic tag recorded in the ingestion stats.
    pub fn kind(&self) -> &'static str {
        match self {
            ByteSource::Path(_) => "file",
            ByteSource::Memory(_) => "memory",
        }
    }

    /// Whole content. In-memory buffers are shared, not copied.
    pub fn load(&self) -> Result<Bytes> {
        match self {
            ByteSource::Path(path) => Ok(Bytes::from(fs::read(path)?)),
            ByteSource::Memory(bytes) => Ok(bytes.clone()),
        }
    }

    /// At most the first `max` bytes.
    pub fn sample(&self, max: usize) -> Result<Bytes> {
        match self {
            ByteSource::Path(path) => {
                let mut buf = Vec::with_capacity(max.min(1 << 20));
                File::open(path)?.take(max as u64).read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
            ByteSource::Memory(bytes) => Ok(bytes.slice(..max.min(bytes.len()))),
        }
    }
}

impl From<Bytes> for ByteSource {
    fn from(bytes: Bytes) -> Self {
        ByteSource::Memory(bytes)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Memory(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for ByteSource {
    fn from(bytes: &'static [u8]) -> Self {
        ByteSource::Memory(Bytes::from_static(bytes))
    }
}

impl From<PathBuf> for ByteSource {
    fn from(path: PathBuf) -> Self {
        ByteSource::Path(path)
    }
}

impl From<&Path> for ByteSource {
    fn from(path: &Path) -> Self {
        ByteSource::Path(path.to_path_buf())
    }
}
