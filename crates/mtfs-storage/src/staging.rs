//! Stage, transfer and cleanup
//!
//! Every remote transfer goes through a staging file under the backend's
//! staging directory. The file name is unique per call and the file is
//! removed when the transfer finishes, whatever its outcome.

use crate::object_store::ObjectStore;
use mtfs_common::{BlockType, Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Key of the allocator state document
pub const IDS_KEY: &str = "ids.json";

/// Key of the superblock record
pub const SUPERBLOCK_KEY: &str = "superblock";

/// Prefix selecting the metadata twin of a block
pub const META_PREFIX: &str = "metas/";

/// Key prefix of a block type
pub fn key_prefix(block_type: BlockType) -> Result<&'static str> {
    match block_type {
        BlockType::Inode => Ok("inodes/"),
        BlockType::DirectoryBlock => Ok("directories/"),
        BlockType::DataBlock => Ok("datas/"),
        BlockType::Superblock => Err(Error::UnsupportedBlockType(block_type)),
    }
}

/// Remote key of a block or of its metadata
pub fn object_key(id: u64, block_type: BlockType, metadata: bool) -> Result<String> {
    let prefix = key_prefix(block_type)?;
    let meta = if metadata { META_PREFIX } else { "" };
    Ok(format!("{meta}{prefix}{id}"))
}

/// A staging file removed on drop
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => trace!(path = %self.path.display(), "Removed staging file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %self.path.display(), "Failed to remove staging file: {}", e),
        }
    }
}

/// Local directory holding in-flight transfers
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Use `dir` for staging, creating it if needed
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a fresh staging file for `key`
    fn open(&self, key: &str) -> Result<(StagingFile, File)> {
        let name = format!("{}-{}", key.replace('/', "_"), uuid::Uuid::new_v4().simple());
        let path = self.dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok((StagingFile { path }, file))
    }

    /// Stage `contents` and upload them under `key`
    pub fn upload(&self, store: &dyn ObjectStore, key: &str, contents: &[u8]) -> Result<()> {
        let (staged, mut file) = self.open(key)?;
        file.write_all(contents)?;
        file.flush()?;
        file.rewind()?;

        trace!(key, path = %staged.path().display(), bytes = contents.len(), "Uploading");
        store.put_object(key, &mut file)
    }

    /// Download `key` into a staging file and return its contents
    pub fn download(&self, store: &dyn ObjectStore, key: &str) -> Result<Vec<u8>> {
        let (staged, mut file) = self.open(key)?;
        store.get_object(key, &mut file)?;

        file.rewind()?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        trace!(key, path = %staged.path().display(), bytes = contents.len(), "Downloaded");
        Ok(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use tempfile::tempdir;

    fn staged_files(area: &StagingArea) -> usize {
        fs::read_dir(area.dir()).unwrap().count()
    }

    #[test]
    fn test_object_keys() {
        assert_eq!(object_key(5, BlockType::Inode, false).unwrap(), "inodes/5");
        assert_eq!(
            object_key(0, BlockType::DirectoryBlock, false).unwrap(),
            "directories/0"
        );
        assert_eq!(object_key(12, BlockType::DataBlock, false).unwrap(), "datas/12");
        assert_eq!(object_key(5, BlockType::Inode, true).unwrap(), "metas/inodes/5");
        assert!(matches!(
            object_key(1, BlockType::Superblock, false),
            Err(Error::UnsupportedBlockType(_))
        ));
    }

    #[test]
    fn test_upload_download_cleans_up() {
        let dir = tempdir().unwrap();
        let area = StagingArea::create(dir.path().join("bucket")).unwrap();
        let store = MemoryObjectStore::new();

        area.upload(&store, "inodes/3", b"{}\n").unwrap();
        assert_eq!(store.object("inodes/3").unwrap().as_ref(), b"{}\n");
        assert_eq!(area.download(&store, "inodes/3").unwrap(), b"{}\n");
        assert_eq!(staged_files(&area), 0);
    }

    #[test]
    fn test_failed_download_cleans_up() {
        let dir = tempdir().unwrap();
        let area = StagingArea::create(dir.path()).unwrap();
        let store = MemoryObjectStore::new();

        let err = area.download(&store, "datas/9").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(staged_files(&area), 0);
    }

    #[test]
    fn test_staging_names_are_unique() {
        let dir = tempdir().unwrap();
        let area = StagingArea::create(dir.path()).unwrap();
        let (a, _) = area.open("inodes/1").unwrap();
        let (b, _) = area.open("inodes/1").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(staged_files(&area), 2);

        drop(a);
        drop(b);
        assert_eq!(staged_files(&area), 0);
    }

    #[test]
    fn test_missing_staging_dir_is_io_failure() {
        let dir = tempdir().unwrap();
        let area = StagingArea::create(dir.path().join("staging")).unwrap();
        fs::remove_dir(area.dir()).unwrap();

        let err = area.upload(&MemoryObjectStore::new(), "inodes/1", b"x").unwrap_err();
        assert_eq!(err.kind(), mtfs_common::ErrorKind::IoFailure);
    }
}
