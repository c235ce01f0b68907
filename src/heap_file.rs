use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::{DbError, Result},
    page::{BlockId, SlottedPage},
    storage::{BlockFile, BlockStore, OpenMode, StorageError},
};

/// A named, ordered sequence of slotted blocks kept in a [`BlockStore`].
///
/// Block ids run from 1 to [`HeapFile::last_block_id`]. Blocks are only ever appended;
/// the file as a whole is removed with [`HeapFile::drop`].
pub struct HeapFile {
    name: String,
    store: Arc<dyn BlockStore>,
    file: Option<Box<dyn BlockFile>>,
    last: BlockId,
}

impl HeapFile {
    pub fn new(name: &str, store: Arc<dyn BlockStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
            file: None,
            last: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn last_block_id(&self) -> BlockId {
        self.last
    }

    /// Create the backing file, which must not exist yet, with one empty block in it
    pub fn create(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(StorageError::AlreadyExists(self.name.clone()).into());
        }
        self.db_open(OpenMode::CreateExclusive)?;
        if let Err(e) = self.get_new() {
            let cleanup = self
                .close()
                .and_then(|_| self.store.remove(&self.name).map_err(DbError::from));
            if let Err(cleanup_err) = cleanup {
                warn!(file = %self.name, error = %cleanup_err, "could not remove partial file");
            }
            self.last = 0;
            return Err(e);
        }
        Ok(())
    }

    pub fn create_if_not_exists(&mut self) -> Result<()> {
        match self.open() {
            Err(DbError::Storage(e)) if e.is_not_found() => self.create(),
            other => other,
        }
    }

    pub fn open(&mut self) -> Result<()> {
        self.db_open(OpenMode::Existing)
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.close()?;
            debug!(file = %self.name, "closed heap file");
        }
        Ok(())
    }

    /// Close the file and permanently remove it from the store
    pub fn drop(&mut self) -> Result<()> {
        self.close()?;
        self.store.remove(&self.name)?;
        self.last = 0;
        debug!(file = %self.name, "dropped heap file");
        Ok(())
    }

    /// Append a new, empty block and return it
    pub fn get_new(&mut self) -> Result<SlottedPage> {
        let block_id = self.last + 1;
        let file = self.file()?;
        let page = SlottedPage::new(block_id);
        file.put(block_id, page.as_bytes())?;
        let bytes = file.get(block_id)?;
        self.last = block_id;
        debug!(file = %self.name, block_id, "allocated block");
        SlottedPage::from_bytes(block_id, bytes)
    }

    pub fn get(&mut self, block_id: BlockId) -> Result<SlottedPage> {
        let bytes = self.file()?.get(block_id)?;
        SlottedPage::from_bytes(block_id, bytes)
    }

    pub fn put(&mut self, block: &SlottedPage) -> Result<()> {
        self.file()?.put(block.block_id(), block.as_bytes())?;
        Ok(())
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        1..=self.last
    }

    fn db_open(&mut self, mode: OpenMode) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let mut file = self.store.open(&self.name, mode)?;
        self.last = file.block_count()?;
        self.file = Some(file);
        Ok(())
    }

    fn file(&mut self) -> std::result::Result<&mut Box<dyn BlockFile>, StorageError> {
        let name = &self.name;
        self.file
            .as_mut()
            .ok_or_else(|| StorageError::NotOpen(name.clone()))
    }
}
