use std::{fmt::Display, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    error::{DbError, Result},
    heap_file::HeapFile,
    page::{BlockId, RecordId, SlottedPage},
    storage::BlockStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Text,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Int => "INT",
            DataType::Text => "TEXT",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" => Ok(DataType::Int),
            "TEXT" => Ok(DataType::Text),
            other => Err(DbError::schema(format!("unsupported data type {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, DataType::Int)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, DataType::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i32),
    Text(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::Text(_) => DataType::Text,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Int(_) => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Column name to value. Rows handed out by a relation follow its schema order.
pub type Row = IndexMap<String, Value>;

/// Location of a row: the block it lives in and its slot within that block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    pub block_id: BlockId,
    pub record_id: RecordId,
}

impl Handle {
    pub fn new(block_id: BlockId, record_id: RecordId) -> Self {
        Self {
            block_id,
            record_id,
        }
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.block_id, self.record_id)
    }
}

/// The relation contract the catalog, indices and the executor program against
pub trait DbRelation {
    fn table_name(&self) -> &str;

    fn create(&mut self) -> Result<()>;

    fn create_if_not_exists(&mut self) -> Result<()>;

    /// Remove the relation's storage. The relation is closed afterwards.
    fn drop(&mut self) -> Result<()>;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn insert(&mut self, row: &Row) -> Result<Handle>;

    fn update(&mut self, handle: Handle, new_values: &Row) -> Result<()>;

    fn del(&mut self, handle: Handle) -> Result<()>;

    /// Every live row, in block and slot order
    fn select(&mut self) -> Result<Vec<Handle>>;

    /// Candidate handles for `predicate`. No filtering happens here: the caller checks
    /// each candidate, so this is every live row.
    fn select_where(&mut self, predicate: &Row) -> Result<Vec<Handle>>;

    fn project(&mut self, handle: Handle) -> Result<Row>;

    /// Project only `column_names`, in the order given. An empty list means every column.
    fn project_columns(&mut self, handle: Handle, column_names: &[String]) -> Result<Row>;

    fn column_names(&self) -> Vec<String>;

    fn column_attributes(&self) -> &[ColumnDefinition];
}

/// A relation stored as unordered records in a [`HeapFile`] of the same name
pub struct HeapTable {
    table_name: String,
    columns: Vec<ColumnDefinition>,
    file: HeapFile,
}

impl HeapTable {
    pub fn new(table_name: &str, columns: Vec<ColumnDefinition>, store: Arc<dyn BlockStore>) -> Self {
        Self {
            table_name: table_name.to_string(),
            file: HeapFile::new(table_name, store),
            columns,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }

    /// Encode a full row in schema order: INT as a 4 byte big-endian i32, TEXT as a
    /// 2 byte big-endian length followed by the raw bytes
    pub fn marshal(&self, row: &Row) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for column in &self.columns {
            let value = row.get(&column.name).ok_or_else(|| {
                DbError::schema(format!(
                    "row for {} is missing column '{}'",
                    self.table_name, column.name
                ))
            })?;
            match (column.data_type, value) {
                (DataType::Int, Value::Int(n)) => bytes.extend_from_slice(&n.to_be_bytes()),
                (DataType::Text, Value::Text(s)) => {
                    let len = u16::try_from(s.len()).map_err(|_| {
                        DbError::schema(format!(
                            "text for column '{}' is {} bytes, at most {} fit",
                            column.name,
                            s.len(),
                            u16::MAX
                        ))
                    })?;
                    bytes.extend_from_slice(&len.to_be_bytes());
                    bytes.extend_from_slice(s.as_bytes());
                }
                (expected, value) => {
                    return Err(DbError::schema(format!(
                        "column '{}' holds {expected}, got {}",
                        column.name,
                        value.data_type()
                    )))
                }
            }
        }
        Ok(bytes)
    }

    pub fn unmarshal(&self, data: &[u8]) -> Result<Row> {
        let mut row = Row::with_capacity(self.columns.len());
        let mut offset = 0;
        for column in &self.columns {
            let value = match column.data_type {
                DataType::Int => {
                    let bytes = take(data, &mut offset, 4)?;
                    Value::Int(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                }
                DataType::Text => {
                    let len = take(data, &mut offset, 2)?;
                    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
                    let text = take(data, &mut offset, len)?;
                    let text = String::from_utf8(text.to_vec()).map_err(|e| {
                        DbError::Corrupted(format!("column '{}': {e}", column.name))
                    })?;
                    Value::Text(text)
                }
            };
            row.insert(column.name.clone(), value);
        }
        if offset != data.len() {
            return Err(DbError::Corrupted(format!(
                "{} trailing bytes after last column of {}",
                data.len() - offset,
                self.table_name
            )));
        }
        Ok(row)
    }

    /// Check every schema column is present and return the row in schema order
    fn validate(&self, row: &Row) -> Result<Row> {
        self.columns
            .iter()
            .map(|column| match row.get(&column.name) {
                Some(value) => Ok((column.name.clone(), value.clone())),
                None => Err(DbError::schema(format!(
                    "no value for column '{}' of {}: NULLs and defaults are not supported",
                    column.name, self.table_name
                ))),
            })
            .collect()
    }

    /// Add the row to the last block, moving on to a fresh block when it is full
    fn append(&mut self, row: &Row) -> Result<Handle> {
        let data = self.marshal(row)?;
        if data.len() > SlottedPage::max_payload() {
            return Err(DbError::schema(format!(
                "row of {} bytes does not fit in a block of {}",
                data.len(),
                self.table_name
            )));
        }
        let mut block = match self.file.last_block_id() {
            0 => self.file.get_new()?,
            last => self.file.get(last)?,
        };
        let record_id = match block.add(&data) {
            Ok(record_id) => record_id,
            Err(e) if e.is_no_room() => {
                block = self.file.get_new()?;
                block.add(&data)?
            }
            Err(e) => return Err(e),
        };
        self.file.put(&block)?;
        Ok(Handle::new(block.block_id(), record_id))
    }
}

fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let bytes = data.get(*offset..*offset + len).ok_or_else(|| {
        DbError::Corrupted(format!(
            "record of {} bytes ends before offset {}",
            data.len(),
            *offset + len
        ))
    })?;
    *offset += len;
    Ok(bytes)
}

impl DbRelation for HeapTable {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn create(&mut self) -> Result<()> {
        self.file.create()?;
        debug!(table = %self.table_name, "created heap table");
        Ok(())
    }

    fn create_if_not_exists(&mut self) -> Result<()> {
        self.file.create_if_not_exists()
    }

    fn drop(&mut self) -> Result<()> {
        self.file.drop()
    }

    fn open(&mut self) -> Result<()> {
        self.file.open()
    }

    fn close(&mut self) -> Result<()> {
        self.file.close()
    }

    fn insert(&mut self, row: &Row) -> Result<Handle> {
        self.open()?;
        let full_row = self.validate(row)?;
        self.append(&full_row)
    }

    fn update(&mut self, _handle: Handle, _new_values: &Row) -> Result<()> {
        Err(DbError::Unsupported("update of heap table rows"))
    }

    fn del(&mut self, handle: Handle) -> Result<()> {
        self.open()?;
        let mut block = self.file.get(handle.block_id)?;
        block.del(handle.record_id)?;
        self.file.put(&block)
    }

    fn select(&mut self) -> Result<Vec<Handle>> {
        self.open()?;
        let mut handles = Vec::new();
        let block_ids: Vec<BlockId> = self.file.block_ids().collect();
        for block_id in block_ids {
            let block = self.file.get(block_id)?;
            handles.extend(
                block
                    .ids()
                    .into_iter()
                    .map(|record_id| Handle::new(block_id, record_id)),
            );
        }
        Ok(handles)
    }

    fn select_where(&mut self, _predicate: &Row) -> Result<Vec<Handle>> {
        self.select()
    }

    fn project(&mut self, handle: Handle) -> Result<Row> {
        self.open()?;
        let block = self.file.get(handle.block_id)?;
        let data = block
            .get(handle.record_id)
            .ok_or(DbError::NoSuchRecord {
                block_id: handle.block_id,
                record_id: handle.record_id,
            })?;
        self.unmarshal(&data)
    }

    fn project_columns(&mut self, handle: Handle, column_names: &[String]) -> Result<Row> {
        let row = self.project(handle)?;
        if column_names.is_empty() {
            return Ok(row);
        }
        column_names
            .iter()
            .map(|name| {
                row.get(name)
                    .map(|value| (name.clone(), value.clone()))
                    .ok_or_else(|| {
                        DbError::schema(format!(
                            "table {} does not have column named '{name}'",
                            self.table_name
                        ))
                    })
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn column_attributes(&self) -> &[ColumnDefinition] {
        &self.columns
    }
}

#[cfg(test)]
mod heap_table_tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        storage::{FileBlockStore, MemoryBlockStore, StorageError},
        test_utils::TestDir,
    };

    fn schema() -> Vec<ColumnDefinition> {
        vec![ColumnDefinition::int("a"), ColumnDefinition::text("b")]
    }

    fn row(a: i32, b: &str) -> Row {
        Row::from([("a".to_string(), Value::from(a)), ("b".to_string(), Value::from(b))])
    }

    fn memory_table(name: &str) -> HeapTable {
        HeapTable::new(name, schema(), Arc::new(MemoryBlockStore::new()))
    }

    #[test]
    fn test_insert_select_project() {
        let mut table = memory_table("_test_data");
        table.create_if_not_exists().unwrap();

        table.insert(&row(12, "Hello!")).unwrap();
        let handles = table.select().unwrap();
        assert_eq!(handles.len(), 1);

        let result = table.project(handles[0]).unwrap();
        assert_eq!(result, row(12, "Hello!"));
        assert_eq!(result["a"], Value::Int(12));
        assert_eq!(result["b"], Value::Text("Hello!".to_string()));
        table.drop().unwrap();
    }

    #[test]
    fn test_create_then_drop() {
        let store = MemoryBlockStore::new();
        let mut table = HeapTable::new("_test_create_drop", schema(), Arc::new(store.clone()));
        table.create().unwrap();
        assert!(store.exists("_test_create_drop"));
        table.drop().unwrap();
        assert!(!store.exists("_test_create_drop"));
        assert!(!table.is_open());

        let err = table.insert(&row(1, "x")).unwrap_err();
        assert!(matches!(err, DbError::Storage(StorageError::NotFound(_))));
    }

    #[test]
    fn test_row_comes_back_in_schema_order() {
        let mut table = memory_table("ordered");
        table.create().unwrap();
        let reversed = Row::from([
            ("b".to_string(), Value::from("second")),
            ("a".to_string(), Value::from(1)),
        ]);
        let handle = table.insert(&reversed).unwrap();
        let result = table.project(handle).unwrap();
        assert_eq!(
            result.keys().cloned().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_insert_missing_column_is_schema_violation() {
        let mut table = memory_table("partial");
        table.create().unwrap();
        let partial = Row::from([("a".to_string(), Value::from(1))]);
        assert!(table.insert(&partial).unwrap_err().is_schema_violation());
        assert!(table.select().unwrap().is_empty());
    }

    #[test]
    fn test_insert_wrong_type_is_schema_violation() {
        let mut table = memory_table("typed");
        table.create().unwrap();
        let wrong = Row::from([
            ("a".to_string(), Value::from("not a number")),
            ("b".to_string(), Value::from("fine")),
        ]);
        assert!(table.insert(&wrong).unwrap_err().is_schema_violation());
    }

    #[test]
    fn test_insert_row_larger_than_a_block_is_rejected() {
        let mut table = memory_table("wide");
        table.create().unwrap();
        let huge = "x".repeat(crate::page::BLOCK_SZ);
        assert!(table.insert(&row(1, &huge)).unwrap_err().is_schema_violation());
        assert!(table.select().unwrap().is_empty());
    }

    #[test]
    fn test_project_columns() {
        let mut table = memory_table("narrow");
        table.create().unwrap();
        let handle = table.insert(&row(7, "seven")).unwrap();

        let only_b = table.project_columns(handle, &["b".to_string()]).unwrap();
        assert_eq!(only_b, Row::from([("b".to_string(), Value::from("seven"))]));

        let swapped = table
            .project_columns(handle, &["b".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(swapped.keys().collect::<Vec<_>>(), vec!["b", "a"]);

        assert_eq!(table.project_columns(handle, &[]).unwrap(), row(7, "seven"));

        let repeated = table
            .project_columns(handle, &["a".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(repeated, Row::from([("a".to_string(), Value::Int(7))]));

        let err = table
            .project_columns(handle, &["z".to_string()])
            .unwrap_err();
        assert!(err.is_schema_violation());
    }

    #[test]
    fn test_rows_spill_into_new_blocks() {
        let mut table = memory_table("spill");
        table.create().unwrap();
        let text = "y".repeat(100);
        let mut inserted = Vec::new();
        for i in 0..100 {
            inserted.push(table.insert(&row(i, &text)).unwrap());
        }

        let handles = table.select().unwrap();
        assert_eq!(handles, inserted);
        let unique: HashSet<Handle> = handles.iter().copied().collect();
        assert_eq!(unique.len(), 100);
        let blocks: HashSet<BlockId> = handles.iter().map(|h| h.block_id).collect();
        assert!(blocks.len() >= 2, "expected several blocks, got {blocks:?}");
        assert!(blocks.contains(&1));

        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(table.project(*handle).unwrap(), row(i as i32, &text));
        }
    }

    #[test]
    fn test_del_removes_row_from_select() {
        let mut table = memory_table("deletions");
        table.create().unwrap();
        let first = table.insert(&row(1, "one")).unwrap();
        let second = table.insert(&row(2, "two")).unwrap();
        let third = table.insert(&row(3, "three")).unwrap();

        table.del(second).unwrap();
        assert_eq!(table.select().unwrap(), vec![first, third]);
        assert_eq!(table.project(third).unwrap(), row(3, "three"));
        assert!(matches!(
            table.project(second),
            Err(DbError::NoSuchRecord { .. })
        ));
    }

    #[test]
    fn test_update_is_unsupported() {
        let mut table = memory_table("frozen");
        table.create().unwrap();
        let handle = table.insert(&row(1, "one")).unwrap();
        assert!(matches!(
            table.update(handle, &row(2, "two")),
            Err(DbError::Unsupported(_))
        ));
    }

    #[test]
    fn test_select_where_leaves_filtering_to_caller() {
        let mut table = memory_table("unfiltered");
        table.create().unwrap();
        table.insert(&row(1, "one")).unwrap();
        table.insert(&row(2, "two")).unwrap();
        let predicate = Row::from([("a".to_string(), Value::from(1))]);
        assert_eq!(table.select_where(&predicate).unwrap().len(), 2);
    }

    #[test]
    fn test_marshal_layout() {
        let table = memory_table("layout");
        let bytes = table.marshal(&row(-2, "hi")).unwrap();
        assert_eq!(bytes, vec![0xff, 0xff, 0xff, 0xfe, 0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_marshal_unmarshal_round_trip() {
        let table = memory_table("round_trip");
        for original in [
            row(0, ""),
            row(i32::MIN, "with spaces and 'quotes'"),
            row(i32::MAX, &"z".repeat(1000)),
        ] {
            let bytes = table.marshal(&original).unwrap();
            assert_eq!(table.unmarshal(&bytes).unwrap(), original);
        }
    }

    #[test]
    fn test_unmarshal_rejects_truncated_records() {
        let table = memory_table("truncated");
        let bytes = table.marshal(&row(5, "hello")).unwrap();
        assert!(matches!(
            table.unmarshal(&bytes[..bytes.len() - 1]),
            Err(DbError::Corrupted(_))
        ));
        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(
            table.unmarshal(&padded),
            Err(DbError::Corrupted(_))
        ));
    }

    #[test]
    fn test_rows_survive_reopen_on_disk() {
        let dir = TestDir::unique("heap_table");
        let store: Arc<dyn BlockStore> = Arc::new(FileBlockStore::new(&dir).unwrap());
        let handle = {
            let mut table = HeapTable::new("durable", schema(), Arc::clone(&store));
            table.create().unwrap();
            let handle = table.insert(&row(42, "answer")).unwrap();
            table.close().unwrap();
            handle
        };

        let mut table = HeapTable::new("durable", schema(), store);
        assert_eq!(table.select().unwrap(), vec![handle]);
        assert_eq!(table.project(handle).unwrap(), row(42, "answer"));
    }

    #[test]
    fn test_column_metadata() {
        let table = memory_table("meta");
        assert_eq!(table.column_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.column_attributes(), schema().as_slice());
        assert_eq!(table.table_name(), "meta");
    }

    #[test]
    fn test_data_type_parsing() {
        assert_eq!("int".parse::<DataType>().unwrap(), DataType::Int);
        assert_eq!("INTEGER".parse::<DataType>().unwrap(), DataType::Int);
        assert_eq!("Text".parse::<DataType>().unwrap(), DataType::Text);
        assert!("BOOLEAN".parse::<DataType>().unwrap_err().is_schema_violation());
    }
}
