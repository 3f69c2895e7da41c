//! Temporary entry file written beside the source being transformed.

use std::io;
use std::path::{Path, PathBuf};

use crate::bundler::STAGED_SUFFIX;

/// Path of the staged copy of `file`: `<dir>/<basename>.tmp`, made absolute.
pub fn staged_path(file: &Path) -> io::Result<PathBuf> {
    let file = std::path::absolute(file)?;
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", file.display()),
        )
    })?;
    let mut staged_name = name.to_os_string();
    staged_name.push(STAGED_SUFFIX);
    Ok(file.with_file_name(staged_name))
}

/// Owns a staged file from before it is written until it is removed.
///
/// [`StagedFile::remove`] is the normal release. If the guard is dropped
/// without it (an error while writing, or the owning future being dropped),
/// the file is removed synchronously.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    pub async fn stage(path: PathBuf, contents: &[u8]) -> io::Result<Self> {
        let staged = StagedFile { path, armed: true };
        tokio::fs::write(&staged.path, contents).await?;
        log::debug!("Staged {} ({} bytes)", staged.path.display(), contents.len());
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file. Called at most once; the guard is disarmed either way.
    pub async fn remove(mut self) -> io::Result<()> {
        self.armed = false;
        tokio::fs::remove_file(&self.path).await?;
        log::debug!("Removed {}", self.path.display());
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed abandoned {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Unable to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_path_is_beside_source() {
        let staged = staged_path(Path::new("/pkg/src/index.es6")).unwrap();
        assert_eq!(staged, Path::new("/pkg/src/index.es6.tmp"));
    }

    #[test]
    fn test_staged_path_is_absolute() {
        let staged = staged_path(Path::new("index.js")).unwrap();
        assert!(staged.is_absolute());
        assert!(staged.ends_with("index.js.tmp"));
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.js.tmp");
        let staged = StagedFile::stage(path.clone(), b"let a;").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"let a;");
        staged.remove().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.js.tmp");
        let staged = StagedFile::stage(path.clone(), b"let a;").await.unwrap();
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("a.js.tmp");
        assert!(StagedFile::stage(path.clone(), b"let a;").await.is_err());
        assert!(!path.exists());
    }
}
