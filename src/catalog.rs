//! The schema catalog. Tables, columns and indices are described by rows in three
//! heap tables that are stored (and describe themselves) through the same machinery
//! as user tables.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    error::{DbError, Result},
    heap_table::{ColumnDefinition, DbRelation, Handle, HeapTable, Row, Value},
    index::{DbIndex, HeapIndex, IndexType},
    storage::BlockStore,
};

pub const TABLES: &str = "_tables";
pub const COLUMNS: &str = "_columns";
pub const INDICES: &str = "_indices";

pub fn is_catalog_table(name: &str) -> bool {
    matches!(name, TABLES | COLUMNS | INDICES)
}

fn catalog_schema(name: &str) -> Vec<ColumnDefinition> {
    match name {
        TABLES => vec![ColumnDefinition::text("table_name")],
        COLUMNS => vec![
            ColumnDefinition::text("table_name"),
            ColumnDefinition::text("column_name"),
            ColumnDefinition::text("data_type"),
        ],
        _ => vec![
            ColumnDefinition::text("table_name"),
            ColumnDefinition::text("index_name"),
            ColumnDefinition::int("seq_in_index"),
            ColumnDefinition::text("column_name"),
            ColumnDefinition::text("index_type"),
            ColumnDefinition::int("is_unique"),
        ],
    }
}

fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Handles of the rows of `relation` whose columns equal every value in `predicate`.
///
/// The relation hands back candidates; the comparison happens here.
pub fn filter_handles(relation: &mut dyn DbRelation, predicate: &Row) -> Result<Vec<Handle>> {
    let column_names = relation.column_names();
    if let Some(name) = predicate.keys().find(|name| !column_names.contains(name)) {
        return Err(DbError::schema(format!(
            "table {} does not have column named '{name}'",
            relation.table_name()
        )));
    }
    let mut handles = Vec::new();
    for handle in relation.select_where(predicate)? {
        let candidate = relation.project(handle)?;
        if predicate
            .iter()
            .all(|(name, value)| candidate.get(name) == Some(value))
        {
            handles.push(handle);
        }
    }
    Ok(handles)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogRelation {
    Tables,
    Columns,
    Indices,
}

/// An action undoing one step of a catalog change that already went through
#[derive(Debug)]
enum Compensation {
    DeleteRow {
        relation: CatalogRelation,
        handle: Handle,
    },
}

#[derive(Debug, Default)]
struct Undo {
    steps: Vec<Compensation>,
}

impl Undo {
    fn delete_row(&mut self, relation: CatalogRelation, handle: Handle) {
        self.steps.push(Compensation::DeleteRow { relation, handle });
    }
}

pub struct Catalog {
    store: Arc<dyn BlockStore>,
    tables: HeapTable,
    columns: HeapTable,
    indices: HeapTable,
    cache: HashMap<String, HeapTable>,
}

impl Catalog {
    /// Open the catalog relations in `store`, creating and seeding them on first use
    pub fn new(store: Arc<dyn BlockStore>) -> Result<Self> {
        let relation = |name| HeapTable::new(name, catalog_schema(name), Arc::clone(&store));
        let (tables, columns, indices) = (relation(TABLES), relation(COLUMNS), relation(INDICES));
        let mut catalog = Self {
            store,
            tables,
            columns,
            indices,
            cache: HashMap::new(),
        };
        catalog.tables.create_if_not_exists()?;
        catalog.columns.create_if_not_exists()?;
        catalog.indices.create_if_not_exists()?;
        if catalog.tables.select()?.is_empty() {
            catalog.seed()?;
        }
        Ok(catalog)
    }

    pub fn store(&self) -> Arc<dyn BlockStore> {
        Arc::clone(&self.store)
    }

    fn seed(&mut self) -> Result<()> {
        for name in [TABLES, COLUMNS, INDICES] {
            self.tables
                .insert(&row([("table_name", Value::from(name))]))?;
            for column in catalog_schema(name) {
                self.columns.insert(&row([
                    ("table_name", Value::from(name)),
                    ("column_name", Value::from(column.name.as_str())),
                    ("data_type", Value::from(column.data_type.as_str())),
                ]))?;
            }
        }
        info!("seeded catalog");
        Ok(())
    }

    fn relation(&mut self, relation: CatalogRelation) -> &mut HeapTable {
        match relation {
            CatalogRelation::Tables => &mut self.tables,
            CatalogRelation::Columns => &mut self.columns,
            CatalogRelation::Indices => &mut self.indices,
        }
    }

    /// Run `work`, and if it fails undo whatever it recorded in reverse order.
    ///
    /// Failures while undoing are logged and dropped so `work`'s error is the one returned.
    fn with_compensation<T>(
        &mut self,
        work: impl FnOnce(&mut Self, &mut Undo) -> Result<T>,
    ) -> Result<T> {
        let mut undo = Undo::default();
        let result = work(self, &mut undo);
        if let Err(e) = &result {
            debug!(error = %e, steps = undo.steps.len(), "rolling back catalog change");
            for step in undo.steps.into_iter().rev() {
                let Compensation::DeleteRow { relation, handle } = step;
                if let Err(undo_err) = self.relation(relation).del(handle) {
                    warn!(?relation, %handle, error = %undo_err, "compensation failed");
                }
            }
        }
        result
    }

    fn rows_where(&mut self, relation: CatalogRelation, predicate: &Row) -> Result<Vec<Row>> {
        let relation = self.relation(relation);
        filter_handles(relation, predicate)?
            .into_iter()
            .map(|handle| relation.project(handle))
            .collect()
    }

    fn delete_where(&mut self, relation: CatalogRelation, predicate: &Row) -> Result<usize> {
        let relation = self.relation(relation);
        let handles = filter_handles(relation, predicate)?;
        for handle in &handles {
            relation.del(*handle)?;
        }
        Ok(handles.len())
    }

    pub fn table_exists(&mut self, name: &str) -> Result<bool> {
        let predicate = row([("table_name", Value::from(name))]);
        Ok(!filter_handles(&mut self.tables, &predicate)?.is_empty())
    }

    /// Every table the catalog knows, its own relations included
    pub fn table_names(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for handle in self.tables.select()? {
            let row = self.tables.project(handle)?;
            if let Some(name) = row.get("table_name").and_then(Value::as_text) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// `_columns` rows for `table_name`, in the order the columns were defined
    pub fn column_rows(&mut self, table_name: &str) -> Result<Vec<Row>> {
        let predicate = row([("table_name", Value::from(table_name))]);
        self.rows_where(CatalogRelation::Columns, &predicate)
    }

    pub fn index_rows(&mut self, table_name: &str) -> Result<Vec<Row>> {
        let predicate = row([("table_name", Value::from(table_name))]);
        self.rows_where(CatalogRelation::Indices, &predicate)
    }

    /// Names of the indices on `table_name`, each once, in creation order
    pub fn index_names(&mut self, table_name: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for row in self.index_rows(table_name)? {
            if let Some(name) = row.get("index_name").and_then(Value::as_text) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn load_table(&mut self, name: &str) -> Result<HeapTable> {
        if !self.table_exists(name)? {
            return Err(DbError::schema(format!("no such table {name}")));
        }
        let columns = self
            .column_rows(name)?
            .iter()
            .map(|row| {
                let text = |column: &str| {
                    row.get(column).and_then(Value::as_text).ok_or_else(|| {
                        DbError::Corrupted(format!("{COLUMNS} row for {name} without {column}"))
                    })
                };
                Ok(ColumnDefinition::new(
                    text("column_name")?,
                    text("data_type")?.parse()?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(table = name, columns = columns.len(), "loaded table definition");
        Ok(HeapTable::new(name, columns, Arc::clone(&self.store)))
    }

    /// The table named `name`, built from its catalog rows on first use
    pub fn get_table(&mut self, name: &str) -> Result<&mut HeapTable> {
        match name {
            TABLES => return Ok(&mut self.tables),
            COLUMNS => return Ok(&mut self.columns),
            INDICES => return Ok(&mut self.indices),
            _ => {}
        }
        if !self.cache.contains_key(name) {
            let table = self.load_table(name)?;
            self.cache.insert(name.to_string(), table);
        }
        self.cache
            .get_mut(name)
            .ok_or_else(|| DbError::schema(format!("no such table {name}")))
    }

    pub fn get_index(&mut self, table_name: &str, index_name: &str) -> Result<HeapIndex> {
        let predicate = row([
            ("table_name", Value::from(table_name)),
            ("index_name", Value::from(index_name)),
        ]);
        let mut rows = self.rows_where(CatalogRelation::Indices, &predicate)?;
        if rows.is_empty() {
            return Err(DbError::schema(format!(
                "no such index {index_name} on {table_name}"
            )));
        }
        rows.sort_by_key(|row| row.get("seq_in_index").and_then(Value::as_int));

        let field = |row: &Row, column: &str| {
            row.get(column).cloned().ok_or_else(|| {
                DbError::Corrupted(format!("{INDICES} row for {index_name} without {column}"))
            })
        };
        let mut key_columns = Vec::with_capacity(rows.len());
        for row in &rows {
            match field(row, "column_name")? {
                Value::Text(column) => key_columns.push(column),
                other => {
                    return Err(DbError::Corrupted(format!("column_name {other}")));
                }
            }
        }
        let unique = field(&rows[0], "is_unique")?.as_int().unwrap_or(0) != 0;

        let table_columns = self.get_table(table_name)?.column_attributes().to_vec();
        HeapIndex::new(
            table_name,
            index_name,
            key_columns,
            &table_columns,
            unique,
            Arc::clone(&self.store),
        )
    }

    /// Record a new table in the catalog and create its heap file.
    ///
    /// With `if_not_exists` an already known table is left alone.
    pub fn create_table(
        &mut self,
        name: &str,
        columns: Vec<ColumnDefinition>,
        if_not_exists: bool,
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(DbError::schema(format!("table {name} needs at least one column")));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(DbError::schema(format!("duplicate column {name}.{}", column.name)));
            }
        }
        if self.table_exists(name)? {
            if if_not_exists {
                return Ok(());
            }
            return Err(DbError::schema(format!("table {name} already exists")));
        }

        self.with_compensation(|catalog, undo| {
            let handle = catalog
                .tables
                .insert(&row([("table_name", Value::from(name))]))?;
            undo.delete_row(CatalogRelation::Tables, handle);
            for column in &columns {
                let handle = catalog.columns.insert(&row([
                    ("table_name", Value::from(name)),
                    ("column_name", Value::from(column.name.as_str())),
                    ("data_type", Value::from(column.data_type.as_str())),
                ]))?;
                undo.delete_row(CatalogRelation::Columns, handle);
            }

            let mut table = HeapTable::new(name, columns.clone(), Arc::clone(&catalog.store));
            if if_not_exists {
                table.create_if_not_exists()?;
            } else {
                table.create()?;
            }
            catalog.cache.insert(name.to_string(), table);
            Ok(())
        })?;
        info!(table = name, "created table");
        Ok(())
    }

    /// Record an index on `table_name` and build it from the rows already there
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        columns: Vec<String>,
        index_type: IndexType,
    ) -> Result<()> {
        self.get_table(table_name)?;
        if self.index_names(table_name)?.iter().any(|n| n == index_name) {
            return Err(DbError::schema(format!(
                "index {index_name} on {table_name} already exists"
            )));
        }

        let unique = index_type.is_unique();
        self.with_compensation(|catalog, undo| {
            for (seq, column) in columns.iter().enumerate() {
                let handle = catalog.indices.insert(&row([
                    ("table_name", Value::from(table_name)),
                    ("index_name", Value::from(index_name)),
                    ("seq_in_index", Value::Int(seq as i32 + 1)),
                    ("column_name", Value::from(column.as_str())),
                    ("index_type", Value::from(index_type.as_str())),
                    ("is_unique", Value::Int(i32::from(unique))),
                ]))?;
                undo.delete_row(CatalogRelation::Indices, handle);
            }

            let table_columns = catalog.get_table(table_name)?.column_attributes().to_vec();
            let mut index = HeapIndex::new(
                table_name,
                index_name,
                columns.clone(),
                &table_columns,
                unique,
                Arc::clone(&catalog.store),
            )?;
            let table = catalog.get_table(table_name)?;
            index.create(table)
        })?;
        info!(table = table_name, index = index_name, "created index");
        Ok(())
    }

    /// Drop a table with all of its indices, removing every catalog row about it
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if is_catalog_table(name) {
            return Err(DbError::schema(format!("cannot drop catalog relation {name}")));
        }
        self.get_table(name)?;

        for index_name in self.index_names(name)? {
            self.drop_index(name, &index_name)?;
        }
        let predicate = row([("table_name", Value::from(name))]);
        self.delete_where(CatalogRelation::Columns, &predicate)?;
        self.get_table(name)?.drop()?;
        self.cache.remove(name);
        self.delete_where(CatalogRelation::Tables, &predicate)?;
        info!(table = name, "dropped table");
        Ok(())
    }

    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> Result<()> {
        let mut index = self.get_index(table_name, index_name)?;
        index.drop()?;
        let predicate = row([
            ("table_name", Value::from(table_name)),
            ("index_name", Value::from(index_name)),
        ]);
        self.delete_where(CatalogRelation::Indices, &predicate)?;
        info!(table = table_name, index = index_name, "dropped index");
        Ok(())
    }
}
