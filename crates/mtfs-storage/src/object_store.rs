//! Object store capability
//!
//! The persistence engine only needs a bucket that can store, fetch and
//! delete byte streams by key. [`LocalObjectStore`] maps a bucket onto a
//! directory and [`MemoryObjectStore`] keeps it in process memory. A network
//! client plugs in by implementing [`ObjectStore`] and [`ObjectStoreConnector`].

use bytes::Bytes;
use mtfs_common::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A bucket of byte-stream objects addressed by key
///
/// Failures talking to the medium are [`Error::Backend`]; a missing object
/// on read is [`Error::NotFound`]. Failures of the caller's reader or writer
/// come back as [`Error::Io`].
pub trait ObjectStore: Send + Sync {
    /// Store the whole stream under `key`, replacing any previous object
    fn put_object(&self, key: &str, reader: &mut dyn Read) -> Result<()>;

    /// Stream the object stored under `key` into `writer`
    fn get_object(&self, key: &str, writer: &mut dyn Write) -> Result<()>;

    /// Delete the object under `key`; deleting an absent object succeeds
    fn delete_object(&self, key: &str) -> Result<()>;
}

/// Opens a bucket at attach time
pub trait ObjectStoreConnector: Send + Sync {
    /// Connect to `bucket` in `region`
    fn connect(&self, region: &str, bucket: &str) -> Result<Arc<dyn ObjectStore>>;
}

fn transfer_error(key: &str, op: &str, err: &io::Error) -> Error {
    Error::backend(format!("{op} {key}: {err}"))
}

/// Local end of a transfer
///
/// Keeps the first error raised by the wrapped reader or writer so it can be
/// told apart from a failure of the remote end.
struct Staged<T> {
    inner: T,
    failure: Option<io::Error>,
}

impl<T> Staged<T> {
    const fn new(inner: T) -> Self {
        Self {
            inner,
            failure: None,
        }
    }

    fn record(&mut self, err: io::Error) -> io::Error {
        if err.kind() == io::ErrorKind::Interrupted {
            return err;
        }
        let reported = io::Error::new(err.kind(), err.to_string());
        self.failure.get_or_insert(err);
        reported
    }

    fn into_error(self, key: &str, op: &str, err: &io::Error) -> Error {
        self.failure
            .map_or_else(|| transfer_error(key, op, err), Error::Io)
    }
}

impl<R: Read> Read for Staged<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| self.record(e))
    }
}

impl<W: Write> Write for Staged<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(|e| self.record(e))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| self.record(e))
    }
}

fn write_then_rename<R: Read>(reader: &mut R, partial: &Path, path: &Path) -> io::Result<()> {
    let mut file = fs::File::create(partial)?;
    io::copy(reader, &mut file)?;
    file.sync_all()?;
    fs::rename(partial, path)
}

/// Bucket backed by a local directory
///
/// Keys map to paths relative to the bucket root; `/` separates directories.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open a bucket rooted at `root`, creating the directory if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| Error::backend(format!("create bucket {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::invalid_argument(format!("invalid object key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_object(&self, key: &str, reader: &mut dyn Read) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| transfer_error(key, "put", &e))?;
        }

        // Write beside the target and rename so readers never see a partial object
        let partial = path.with_file_name(format!(
            ".{}.{}",
            path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
            uuid::Uuid::new_v4().simple()
        ));
        let mut reader = Staged::new(reader);
        if let Err(e) = write_then_rename(&mut reader, &partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(reader.into_error(key, "put", &e));
        }
        Ok(())
    }

    fn get_object(&self, key: &str, writer: &mut dyn Write) -> Result<()> {
        let path = self.path_for(key)?;
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::not_found(key)),
            Err(e) => return Err(transfer_error(key, "get", &e)),
        };
        let mut writer = Staged::new(writer);
        match io::copy(&mut file, &mut writer) {
            Ok(_) => Ok(()),
            Err(e) => Err(writer.into_error(key, "get", &e)),
        }
    }

    fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(transfer_error(key, "delete", &e)),
        }
    }
}

/// Connector placing each bucket in a directory under a common root
#[derive(Clone, Debug)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStoreConnector for LocalConnector {
    fn connect(&self, region: &str, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        debug!(region, bucket, root = %self.root.display(), "Opening local bucket");
        Ok(Arc::new(LocalObjectStore::open(self.root.join(bucket))?))
    }
}

/// Bucket held in memory; clones share the same objects
#[derive(Clone, Debug, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys in order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Raw object contents
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).cloned()
    }

    /// Number of stored objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put_object(&self, key: &str, reader: &mut dyn Read) -> Result<()> {
        let mut buf = Vec::new();
        let mut reader = Staged::new(reader);
        if let Err(e) = reader.read_to_end(&mut buf) {
            return Err(reader.into_error(key, "put", &e));
        }
        self.objects.write().insert(key.to_string(), Bytes::from(buf));
        Ok(())
    }

    fn get_object(&self, key: &str, writer: &mut dyn Write) -> Result<()> {
        let data = self.object(key).ok_or_else(|| Error::not_found(key))?;
        let mut writer = Staged::new(writer);
        match writer.write_all(&data) {
            Ok(()) => Ok(()),
            Err(e) => Err(writer.into_error(key, "get", &e)),
        }
    }

    fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }
}

/// Connector handing out in-memory buckets by name
///
/// Connecting twice to the same bucket yields the same objects, so state
/// survives a detach/attach cycle within one process.
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    buckets: Arc<Mutex<HashMap<String, MemoryObjectStore>>>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on a bucket, created empty if needed
    #[must_use]
    pub fn bucket(&self, bucket: &str) -> MemoryObjectStore {
        self.buckets
            .lock()
            .entry(bucket.to_string())
            .or_default()
            .clone()
    }
}

impl ObjectStoreConnector for MemoryConnector {
    fn connect(&self, region: &str, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        debug!(region, bucket, "Opening in-memory bucket");
        Ok(Arc::new(self.bucket(bucket)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtfs_common::ErrorKind;
    use tempfile::tempdir;

    fn exercise(store: &dyn ObjectStore) {
        assert!(store.get_object("inodes/1", &mut Vec::new()).unwrap_err().is_not_found());

        store.put_object("inodes/1", &mut &b"first"[..]).unwrap();
        store.put_object("inodes/1", &mut &b"second"[..]).unwrap();

        let mut out = Vec::new();
        store.get_object("inodes/1", &mut out).unwrap();
        assert_eq!(out, b"second");

        store.delete_object("inodes/1").unwrap();
        store.delete_object("inodes/1").unwrap();
        let err = store.get_object("inodes/1", &mut Vec::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_local_store() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path().join("bucket")).unwrap();
        exercise(&store);

        store.put_object("metas/datas/7", &mut &[0u8; 16][..]).unwrap();
        assert!(dir.path().join("bucket/metas/datas/7").is_file());
    }

    #[test]
    fn test_local_store_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();
        for key in ["", "../x", "/etc/passwd", "a/../../b"] {
            assert!(store.put_object(key, &mut &b""[..]).is_err(), "{key}");
        }
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryObjectStore::new();
        exercise(&store);
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_connector_shares_buckets() {
        let connector = MemoryConnector::new();
        let a = connector.connect("eu-west-3", "mtfs").unwrap();
        a.put_object("ids.json", &mut &b"{}"[..]).unwrap();

        let b = connector.connect("eu-west-3", "mtfs").unwrap();
        let mut out = Vec::new();
        b.get_object("ids.json", &mut out).unwrap();
        assert_eq!(out, b"{}");
        assert!(connector.bucket("other").object("ids.json").is_none());
    }

    #[test]
    fn test_local_connector() {
        let dir = tempdir().unwrap();
        let connector = LocalConnector::new(dir.path());
        let store = connector.connect("local", "mtfs").unwrap();
        store.put_object("superblock", &mut &b"sb"[..]).unwrap();
        assert!(dir.path().join("mtfs/superblock").is_file());
    }

    /// Writer standing in for a staging file on a full disk
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("No space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Reader standing in for an unreadable staging file
    struct BadSector;

    impl Read for BadSector {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("Input/output error"))
        }
    }

    fn assert_staging_failures_are_io(store: &dyn ObjectStore) {
        store.put_object("datas/3", &mut &b"block"[..]).unwrap();

        let err = store.get_object("datas/3", &mut FullDisk).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure, "{err}");

        let err = store.put_object("datas/4", &mut BadSector).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure, "{err}");
        assert!(store.get_object("datas/4", &mut Vec::new()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_local_staging_failures_are_io() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path().join("bucket")).unwrap();
        assert_staging_failures_are_io(&store);
    }

    #[test]
    fn test_memory_staging_failures_are_io() {
        assert_staging_failures_are_io(&MemoryObjectStore::new());
    }

    #[test]
    fn test_local_bucket_failure_is_backend() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();
        // A directory where the object should be cannot be read as one
        fs::create_dir_all(dir.path().join("inodes/1")).unwrap();

        let err = store.get_object("inodes/1", &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendFailure, "{err}");
    }
}
