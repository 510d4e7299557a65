//! Source assets: name resolution and sequential readers.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};

/// Boxed async byte producer. Both the direct source and the mixer output are
/// handed to the pacer behind this type.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Resolve `name` inside `audio_dir`, failing with `SourceNotFound` when the
/// file is missing.
pub async fn resolve(audio_dir: &Path, name: &str) -> Result<PathBuf> {
    let path = audio_dir.join(name);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        Ok(_) => Err(Error::SourceNotFound(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::SourceNotFound(path)),
        Err(e) => Err(e.into()),
    }
}

/// Open a resolved asset as a sequential byte producer.
pub async fn open(path: &Path) -> Result<ByteSource> {
    match File::open(path).await {
        Ok(file) => Ok(Box::new(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::SourceNotFound(path.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn resolves_and_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"ID3-bytes").unwrap();

        let path = resolve(dir.path(), "song.mp3").await.unwrap();
        assert_eq!(path, dir.path().join("song.mp3"));

        let mut reader = open(&path).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"ID3-bytes");
    }

    #[tokio::test]
    async fn missing_or_directory_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("fx")).unwrap();

        assert!(matches!(resolve(dir.path(), "nope.mp3").await, Err(Error::SourceNotFound(_))));
        assert!(matches!(resolve(dir.path(), "fx").await, Err(Error::SourceNotFound(_))));
        assert!(matches!(open(&dir.path().join("nope.mp3")).await, Err(Error::SourceNotFound(_))));
    }
}
