//! Block storage providers.
//!
//! A provider stores named files of fixed-length records. Each record is exactly
//! [`BLOCK_SZ`] bytes and is keyed by a 1-based [`BlockId`]. Heap files are the only
//! consumers; they never see paths or file handles, only the [`BlockStore`] and
//! [`BlockFile`] traits.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;
use tracing::debug;

use crate::page::{BlockId, BLOCK_SZ};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("block file not found: {0}")]
    NotFound(String),

    #[error("block file already exists: {0}")]
    AlreadyExists(String),

    #[error("block {block_id} not found in {name}")]
    BlockNotFound { name: String, block_id: BlockId },

    #[error("invalid block size: expected {expected}, got {actual}")]
    InvalidBlockSize { expected: usize, actual: usize },

    #[error("block file {0} is not open")]
    NotOpen(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("block store lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// Map an I/O error on the named file, keeping not-found/already-exists distinguishable
    fn from_io(err: io::Error, name: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(name.to_string()),
            _ => StorageError::Io(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    fn check_block_size(bytes: &[u8]) -> Result<(), StorageError> {
        if bytes.len() != BLOCK_SZ {
            return Err(StorageError::InvalidBlockSize {
                expected: BLOCK_SZ,
                actual: bytes.len(),
            });
        }
        Ok(())
    }
}

/// How a block file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// The file must already exist
    Existing,
    /// Create the file if it is missing
    Create,
    /// Create the file, failing if it already exists
    CreateExclusive,
}

/// A provider of named block files
pub trait BlockStore: Send + Sync {
    fn open(&self, name: &str, mode: OpenMode) -> Result<Box<dyn BlockFile>, StorageError>;

    /// Permanently remove the named file
    fn remove(&self, name: &str) -> Result<(), StorageError>;

    fn exists(&self, name: &str) -> bool;
}

/// An open block file. Reads hand back owned copies; writes take whole blocks.
pub trait BlockFile: Send {
    fn get(&mut self, block_id: BlockId) -> Result<Vec<u8>, StorageError>;

    /// Write a whole block. `block_count() + 1` appends, anything further out is rejected.
    fn put(&mut self, block_id: BlockId, bytes: &[u8]) -> Result<(), StorageError>;

    fn block_count(&mut self) -> Result<u32, StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;
}

/// A directory of block files, one `<name>.db` file per heap file
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    db_directory: PathBuf,
}

impl FileBlockStore {
    pub fn new<P>(db_directory: &P) -> Result<Self, StorageError>
    where
        P: AsRef<Path> + ?Sized,
    {
        let db_path = db_directory.as_ref().to_path_buf();
        fs::create_dir_all(&db_path)?;
        Ok(Self {
            db_directory: db_path,
        })
    }

    pub fn db_directory(&self) -> &Path {
        &self.db_directory
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.db_directory.join(format!("{name}.db"))
    }
}

impl BlockStore for FileBlockStore {
    fn open(&self, name: &str, mode: OpenMode) -> Result<Box<dyn BlockFile>, StorageError> {
        let path = self.path_for(name);
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        match mode {
            OpenMode::Existing => {}
            OpenMode::Create => {
                options.create(true);
            }
            OpenMode::CreateExclusive => {
                options.create_new(true);
            }
        }
        let file = options
            .open(&path)
            .map_err(|e| StorageError::from_io(e, name))?;
        debug!(file = %path.display(), ?mode, "opened block file");
        Ok(Box::new(FileBlocks {
            name: name.to_string(),
            file: Some(file),
        }))
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name);
        fs::remove_file(&path).map_err(|e| StorageError::from_io(e, name))?;
        debug!(file = %path.display(), "removed block file");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }
}

struct FileBlocks {
    name: String,
    file: Option<File>,
}

impl FileBlocks {
    fn file(&mut self) -> Result<&mut File, StorageError> {
        let name = &self.name;
        self.file
            .as_mut()
            .ok_or_else(|| StorageError::NotOpen(name.clone()))
    }

    fn offset(block_id: BlockId) -> u64 {
        (block_id as u64 - 1) * BLOCK_SZ as u64
    }

    fn block_not_found(&self, block_id: BlockId) -> StorageError {
        StorageError::BlockNotFound {
            name: self.name.clone(),
            block_id,
        }
    }
}

impl BlockFile for FileBlocks {
    fn get(&mut self, block_id: BlockId) -> Result<Vec<u8>, StorageError> {
        let count = self.block_count()?;
        if block_id == 0 || block_id > count {
            return Err(self.block_not_found(block_id));
        }
        let file = self.file()?;
        file.seek(SeekFrom::Start(Self::offset(block_id)))?;
        let mut contents = vec![0; BLOCK_SZ];
        file.read_exact(&mut contents)?;
        Ok(contents)
    }

    fn put(&mut self, block_id: BlockId, bytes: &[u8]) -> Result<(), StorageError> {
        StorageError::check_block_size(bytes)?;
        let count = self.block_count()?;
        if block_id == 0 || block_id > count + 1 {
            return Err(self.block_not_found(block_id));
        }
        let file = self.file()?;
        file.seek(SeekFrom::Start(Self::offset(block_id)))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn block_count(&mut self) -> Result<u32, StorageError> {
        let len = self.file()?.metadata()?.len();
        Ok((len / BLOCK_SZ as u64) as u32)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

type MemoryFiles = HashMap<String, Vec<Vec<u8>>>;

/// An in-process block store. Clones share the same set of files.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    files: Arc<Mutex<MemoryFiles>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every file currently in the store, sorted
    pub fn file_names(&self) -> Result<Vec<String>, StorageError> {
        let files = lock_files(&self.files)?;
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

fn lock_files(files: &Mutex<MemoryFiles>) -> Result<MutexGuard<'_, MemoryFiles>, StorageError> {
    files.lock().map_err(|_| StorageError::Poisoned)
}

impl BlockStore for MemoryBlockStore {
    fn open(&self, name: &str, mode: OpenMode) -> Result<Box<dyn BlockFile>, StorageError> {
        let mut files = lock_files(&self.files)?;
        let exists = files.contains_key(name);
        match mode {
            OpenMode::Existing if !exists => return Err(StorageError::NotFound(name.to_string())),
            OpenMode::CreateExclusive if exists => {
                return Err(StorageError::AlreadyExists(name.to_string()))
            }
            _ => {
                files.entry(name.to_string()).or_default();
            }
        }
        Ok(Box::new(MemoryBlocks {
            name: name.to_string(),
            files: Arc::clone(&self.files),
            open: true,
        }))
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let mut files = lock_files(&self.files)?;
        files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        lock_files(&self.files)
            .map(|files| files.contains_key(name))
            .unwrap_or(false)
    }
}

struct MemoryBlocks {
    name: String,
    files: Arc<Mutex<MemoryFiles>>,
    open: bool,
}

impl MemoryBlocks {
    fn with_blocks<T>(
        &self,
        f: impl FnOnce(&mut Vec<Vec<u8>>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        if !self.open {
            return Err(StorageError::NotOpen(self.name.clone()));
        }
        let mut files = lock_files(&self.files)?;
        let blocks = files
            .get_mut(&self.name)
            .ok_or_else(|| StorageError::NotFound(self.name.clone()))?;
        f(blocks)
    }
}

impl BlockFile for MemoryBlocks {
    fn get(&mut self, block_id: BlockId) -> Result<Vec<u8>, StorageError> {
        let name = self.name.clone();
        self.with_blocks(|blocks| {
            block_id
                .checked_sub(1)
                .and_then(|idx| blocks.get(idx as usize))
                .cloned()
                .ok_or(StorageError::BlockNotFound { name, block_id })
        })
    }

    fn put(&mut self, block_id: BlockId, bytes: &[u8]) -> Result<(), StorageError> {
        StorageError::check_block_size(bytes)?;
        let name = self.name.clone();
        self.with_blocks(|blocks| {
            let count = blocks.len() as u32;
            if block_id == 0 || block_id > count + 1 {
                return Err(StorageError::BlockNotFound { name, block_id });
            }
            if block_id == count + 1 {
                blocks.push(bytes.to_vec());
            } else {
                blocks[block_id as usize - 1].copy_from_slice(bytes);
            }
            Ok(())
        })
    }

    fn block_count(&mut self) -> Result<u32, StorageError> {
        self.with_blocks(|blocks| Ok(blocks.len() as u32))
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod storage_tests {
    use super::*;
    use crate::test_utils::TestDir;

    fn setup() -> (TestDir, FileBlockStore) {
        let dir = TestDir::unique("storage");
        let store = FileBlockStore::new(&dir).unwrap();
        (dir, store)
    }

    fn block_of(byte: u8) -> Vec<u8> {
        vec![byte; BLOCK_SZ]
    }

    fn exercise_store(store: &dyn BlockStore) {
        let mut file = store.open("testfile", OpenMode::CreateExclusive).unwrap();
        assert_eq!(file.block_count().unwrap(), 0);

        file.put(1, &block_of(1)).unwrap();
        file.put(2, &block_of(2)).unwrap();
        assert_eq!(file.block_count().unwrap(), 2);
        assert_eq!(file.get(2).unwrap(), block_of(2));

        file.put(1, &block_of(7)).unwrap();
        assert_eq!(file.get(1).unwrap(), block_of(7));
        assert_eq!(file.block_count().unwrap(), 2);

        assert!(matches!(
            file.get(3),
            Err(StorageError::BlockNotFound { block_id: 3, .. })
        ));
        assert!(matches!(
            file.put(5, &block_of(5)),
            Err(StorageError::BlockNotFound { block_id: 5, .. })
        ));
        assert!(matches!(
            file.put(3, &[0u8; 10]),
            Err(StorageError::InvalidBlockSize { actual: 10, .. })
        ));
        file.close().unwrap();

        let mut reopened = store.open("testfile", OpenMode::Existing).unwrap();
        assert_eq!(reopened.block_count().unwrap(), 2);
        assert_eq!(reopened.get(1).unwrap(), block_of(7));
        reopened.close().unwrap();
    }

    #[test]
    fn test_file_store_blocks() {
        let (_dir, store) = setup();
        exercise_store(&store);
    }

    #[test]
    fn test_memory_store_blocks() {
        let store = MemoryBlockStore::new();
        exercise_store(&store);
    }

    #[test]
    fn test_open_modes() {
        let (_dir, store) = setup();
        assert!(store
            .open("missing", OpenMode::Existing)
            .err()
            .unwrap()
            .is_not_found());

        let mut file = store.open("present", OpenMode::Create).unwrap();
        file.close().unwrap();
        assert!(store.exists("present"));
        assert!(matches!(
            store.open("present", OpenMode::CreateExclusive),
            Err(StorageError::AlreadyExists(_))
        ));

        store.remove("present").unwrap();
        assert!(!store.exists("present"));
        assert!(matches!(
            store.remove("present"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_memory_store_remove_invalidates_open_file() {
        let store = MemoryBlockStore::new();
        let mut file = store.open("gone", OpenMode::Create).unwrap();
        file.put(1, &block_of(3)).unwrap();
        store.remove("gone").unwrap();
        assert!(file.get(1).err().unwrap().is_not_found());
        assert!(store.file_names().unwrap().is_empty());
    }

    #[test]
    fn test_closed_file_rejects_io() {
        let store = MemoryBlockStore::new();
        let mut file = store.open("closed", OpenMode::Create).unwrap();
        file.close().unwrap();
        assert!(matches!(file.get(1), Err(StorageError::NotOpen(_))));
    }
}
