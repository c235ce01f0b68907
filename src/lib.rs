use std::{path::Path, sync::Arc};

pub mod catalog;
pub mod error;
pub mod exec;
pub mod heap_file;
pub mod heap_table;
pub mod index;
pub mod page;
pub mod parser;
pub mod storage;
#[cfg(test)]
mod test_utils;

pub use catalog::Catalog;
pub use error::{DbError, Result};
pub use exec::QueryResult;
pub use heap_table::{ColumnDefinition, DataType, DbRelation, Handle, HeapTable, Row, Value};
pub use index::{DbIndex, HeapIndex, IndexType};
pub use storage::{BlockStore, FileBlockStore, MemoryBlockStore, StorageError};

/// The database handle: a catalog over one block store plus the SQL entry point
pub struct HeapDB {
    catalog: Catalog,
}

impl HeapDB {
    /// Open (or start) a database whose heap files live in `db_directory`
    pub fn open<P>(db_directory: &P) -> Result<Self>
    where
        P: AsRef<Path> + ?Sized,
    {
        Self::with_store(Arc::new(FileBlockStore::new(db_directory)?))
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_store(Arc::new(MemoryBlockStore::new()))
    }

    pub fn with_store(store: Arc<dyn BlockStore>) -> Result<Self> {
        Ok(Self {
            catalog: Catalog::new(store)?,
        })
    }

    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        let statement = parser::parse(sql)?;
        exec::execute(&mut self.catalog, &statement)
    }

    pub fn catalog(&mut self) -> &mut Catalog {
        &mut self.catalog
    }
}
