use std::{fmt::Display, str::FromStr, sync::Arc};

use tracing::{debug, warn};

use crate::{
    error::{DbError, Result},
    heap_table::{ColumnDefinition, DbRelation, Handle, HeapTable, Row, Value},
    storage::BlockStore,
};

const BLOCK_ID_COLUMN: &str = "_block_id";
const RECORD_ID_COLUMN: &str = "_record_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    #[default]
    Btree,
    Hash,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Btree => "BTREE",
            IndexType::Hash => "HASH",
        }
    }

    /// BTREE indices enforce unique keys, HASH indices do not
    pub fn is_unique(&self) -> bool {
        matches!(self, IndexType::Btree)
    }
}

impl Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BTREE" => Ok(IndexType::Btree),
            "HASH" => Ok(IndexType::Hash),
            other => Err(DbError::schema(format!("unknown index type {other}"))),
        }
    }
}

/// Secondary access path from key column values to row handles of one table
pub trait DbIndex {
    fn index_name(&self) -> &str;

    /// Create the index storage and fill it from a full scan of `table`
    fn create(&mut self, table: &mut dyn DbRelation) -> Result<()>;

    fn drop(&mut self) -> Result<()>;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Handles whose key columns equal the values in `key`. Key columns left out of
    /// `key` match anything.
    fn lookup(&mut self, key: &Row) -> Result<Vec<Handle>>;

    fn insert(&mut self, handle: Handle, row: &Row) -> Result<()>;

    fn del(&mut self, handle: Handle) -> Result<()>;
}

/// An index kept as a heap file named `<table>-<index>`.
///
/// Each entry holds the key column values followed by the handle of the indexed row.
/// Lookups scan the whole file.
pub struct HeapIndex {
    table_name: String,
    index_name: String,
    key_columns: Vec<String>,
    unique: bool,
    entries: HeapTable,
}

impl HeapIndex {
    pub fn new(
        table_name: &str,
        index_name: &str,
        key_columns: Vec<String>,
        table_columns: &[ColumnDefinition],
        unique: bool,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self> {
        if key_columns.is_empty() {
            return Err(DbError::schema(format!(
                "index {index_name} needs at least one column"
            )));
        }
        let mut entry_columns = Vec::with_capacity(key_columns.len() + 2);
        for name in &key_columns {
            let column = table_columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| {
                    DbError::schema(format!(
                        "table {table_name} does not have column named '{name}'"
                    ))
                })?;
            if entry_columns.contains(column) {
                return Err(DbError::schema(format!(
                    "column '{name}' appears twice in index {index_name}"
                )));
            }
            entry_columns.push(column.clone());
        }
        entry_columns.push(ColumnDefinition::int(BLOCK_ID_COLUMN));
        entry_columns.push(ColumnDefinition::int(RECORD_ID_COLUMN));

        Ok(Self {
            table_name: table_name.to_string(),
            index_name: index_name.to_string(),
            entries: HeapTable::new(&Self::file_name(table_name, index_name), entry_columns, store),
            key_columns,
            unique,
        })
    }

    pub fn file_name(table_name: &str, index_name: &str) -> String {
        format!("{table_name}-{index_name}")
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    fn key_of(&self, row: &Row) -> Result<Row> {
        self.key_columns
            .iter()
            .map(|name| {
                row.get(name)
                    .map(|value| (name.clone(), value.clone()))
                    .ok_or_else(|| {
                        DbError::schema(format!(
                            "row for index {} is missing column '{name}'",
                            self.index_name
                        ))
                    })
            })
            .collect()
    }

    fn handle_of(entry: &Row) -> Result<Handle> {
        let field = |name: &str| {
            entry
                .get(name)
                .and_then(Value::as_int)
                .ok_or_else(|| DbError::Corrupted(format!("index entry without {name}")))
        };
        let block_id = u32::try_from(field(BLOCK_ID_COLUMN)?)
            .map_err(|e| DbError::Corrupted(format!("{BLOCK_ID_COLUMN}: {e}")))?;
        let record_id = u16::try_from(field(RECORD_ID_COLUMN)?)
            .map_err(|e| DbError::Corrupted(format!("{RECORD_ID_COLUMN}: {e}")))?;
        Ok(Handle::new(block_id, record_id))
    }

    /// Every (entry handle, indexed row handle) pair satisfying `filter`
    fn scan(&mut self, filter: impl Fn(&Row) -> bool) -> Result<Vec<(Handle, Handle)>> {
        let mut found = Vec::new();
        for entry_handle in self.entries.select()? {
            let entry = self.entries.project(entry_handle)?;
            if filter(&entry) {
                found.push((entry_handle, Self::handle_of(&entry)?));
            }
        }
        Ok(found)
    }

    fn build(&mut self, table: &mut dyn DbRelation) -> Result<()> {
        for handle in table.select()? {
            let row = table.project(handle)?;
            self.insert(handle, &row)?;
        }
        Ok(())
    }
}

impl DbIndex for HeapIndex {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    fn create(&mut self, table: &mut dyn DbRelation) -> Result<()> {
        self.entries.create()?;
        if let Err(e) = self.build(table) {
            if let Err(drop_err) = self.entries.drop() {
                warn!(index = %self.index_name, error = %drop_err, "failed to remove partially built index");
            }
            return Err(e);
        }
        debug!(table = %self.table_name, index = %self.index_name, "built index");
        Ok(())
    }

    fn drop(&mut self) -> Result<()> {
        self.entries.drop()
    }

    fn open(&mut self) -> Result<()> {
        self.entries.open()
    }

    fn close(&mut self) -> Result<()> {
        self.entries.close()
    }

    fn lookup(&mut self, key: &Row) -> Result<Vec<Handle>> {
        if let Some(name) = key.keys().find(|name| !self.key_columns.contains(name)) {
            return Err(DbError::schema(format!(
                "column '{name}' is not part of index {}",
                self.index_name
            )));
        }
        let found = self.scan(|entry| key_matches(entry, key))?;
        Ok(found.into_iter().map(|(_, handle)| handle).collect())
    }

    fn insert(&mut self, handle: Handle, row: &Row) -> Result<()> {
        let key = self.key_of(row)?;
        if self.unique && !self.lookup(&key)?.is_empty() {
            return Err(DbError::schema(format!(
                "duplicate key {} in unique index {}",
                key.values()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.index_name
            )));
        }
        let block_id = i32::try_from(handle.block_id)
            .map_err(|_| DbError::schema(format!("block {} cannot be indexed", handle.block_id)))?;
        let mut entry = key;
        entry.insert(BLOCK_ID_COLUMN.to_string(), Value::Int(block_id));
        entry.insert(RECORD_ID_COLUMN.to_string(), Value::Int(handle.record_id.into()));
        self.entries.insert(&entry)?;
        Ok(())
    }

    fn del(&mut self, handle: Handle) -> Result<()> {
        let found = self.scan(|_| true)?;
        for (entry_handle, _) in found.into_iter().filter(|(_, h)| *h == handle) {
            self.entries.del(entry_handle)?;
        }
        Ok(())
    }
}

fn key_matches(entry: &Row, key: &Row) -> bool {
    key.iter().all(|(name, value)| entry.get(name) == Some(value))
}
