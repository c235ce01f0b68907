use std::fmt::Display;

use tracing::warn;

use crate::{
    catalog::{filter_handles, is_catalog_table, Catalog},
    error::{DbError, Result},
    heap_table::{DbRelation, Handle, Row, Value},
    index::{DbIndex, HeapIndex},
    parser::{Conditions, Statement},
};

const SHOW_INDEX_COLUMNS: [&str; 6] = [
    "table_name",
    "index_name",
    "column_name",
    "seq_in_index",
    "index_type",
    "is_unique",
];

/// Outcome of one statement: an optional result set and a status message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub column_names: Vec<String>,
    pub rows: Vec<Row>,
    pub message: String,
}

impl QueryResult {
    fn message(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }

    fn rows(column_names: Vec<String>, rows: Vec<Row>) -> Self {
        let message = format!("successfully returned {} rows", rows.len());
        Self {
            column_names,
            rows,
            message,
        }
    }
}

impl Display for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.column_names.is_empty() {
            writeln!(f, "{}", self.column_names.join(" "))?;
            writeln!(f, "+{}", "----------+".repeat(self.column_names.len()))?;
            for row in &self.rows {
                let values: Vec<String> = self
                    .column_names
                    .iter()
                    .map(|name| row.get(name).map(Value::to_string).unwrap_or_default())
                    .collect();
                writeln!(f, "{}", values.join(" "))?;
            }
        }
        write!(f, "{}", self.message)
    }
}

/// Run a parsed statement against the catalog
pub fn execute(catalog: &mut Catalog, statement: &Statement) -> Result<QueryResult> {
    match statement {
        Statement::CreateTable {
            table_name,
            columns,
            if_not_exists,
        } => {
            catalog.create_table(table_name, columns.clone(), *if_not_exists)?;
            Ok(QueryResult::message(format!("created {table_name}")))
        }
        Statement::CreateIndex {
            index_name,
            table_name,
            index_type,
            columns,
        } => {
            catalog.create_index(table_name, index_name, columns.clone(), *index_type)?;
            Ok(QueryResult::message(format!("created index {index_name}")))
        }
        Statement::DropTable { table_name } => {
            catalog.drop_table(table_name)?;
            Ok(QueryResult::message(format!("dropped {table_name}")))
        }
        Statement::DropIndex {
            index_name,
            table_name,
        } => {
            catalog.drop_index(table_name, index_name)?;
            Ok(QueryResult::message(format!(
                "dropped index {index_name} from {table_name}"
            )))
        }
        Statement::ShowTables => show_tables(catalog),
        Statement::ShowColumns { table_name } => {
            catalog.get_table(table_name)?;
            let rows = catalog.column_rows(table_name)?;
            let column_names = ["table_name", "column_name", "data_type"]
                .map(String::from)
                .to_vec();
            Ok(QueryResult::rows(column_names, rows))
        }
        Statement::ShowIndex { table_name } => {
            catalog.get_table(table_name)?;
            let column_names: Vec<String> = SHOW_INDEX_COLUMNS.map(String::from).to_vec();
            let rows = catalog
                .index_rows(table_name)?
                .into_iter()
                .map(|mut row| {
                    column_names
                        .iter()
                        .filter_map(|name| row.swap_remove(name).map(|v| (name.clone(), v)))
                        .collect()
                })
                .collect();
            Ok(QueryResult::rows(column_names, rows))
        }
        Statement::Insert {
            table_name,
            columns,
            values,
        } => insert(catalog, table_name, columns.as_deref(), values),
        Statement::Delete {
            table_name,
            conditions,
        } => delete(catalog, table_name, conditions),
        Statement::Select {
            table_name,
            columns,
            conditions,
        } => select(catalog, table_name, columns.as_deref(), conditions),
    }
}

fn show_tables(catalog: &mut Catalog) -> Result<QueryResult> {
    let rows = catalog
        .table_names()?
        .into_iter()
        .filter(|name| !is_catalog_table(name))
        .map(|name| Row::from([("table_name".to_string(), Value::Text(name))]))
        .collect();
    Ok(QueryResult::rows(vec!["table_name".to_string()], rows))
}

/// The conditions as a row to match against, and whether two of them ask for
/// different values of the same column, in which case nothing can match
fn predicate_of(conditions: &Conditions) -> (Row, bool) {
    let mut predicate = Row::new();
    let mut contradictory = false;
    for (column, value) in conditions {
        if let Some(previous) = predicate.insert(column.clone(), value.clone()) {
            contradictory |= previous != *value;
        }
    }
    (predicate, contradictory)
}

fn matching_handles(
    relation: &mut dyn DbRelation,
    conditions: &Conditions,
) -> Result<Vec<Handle>> {
    let (predicate, contradictory) = predicate_of(conditions);
    let handles = filter_handles(relation, &predicate)?;
    if contradictory {
        return Ok(Vec::new());
    }
    Ok(handles)
}

fn check_columns(relation: &dyn DbRelation, columns: &[String]) -> Result<()> {
    let known = relation.column_names();
    for (i, column) in columns.iter().enumerate() {
        if !known.contains(column) {
            return Err(DbError::schema(format!(
                "table {} does not have column named '{column}'",
                relation.table_name()
            )));
        }
        if columns[..i].contains(column) {
            return Err(DbError::schema(format!("column '{column}' given twice")));
        }
    }
    Ok(())
}

fn indices_of(catalog: &mut Catalog, table_name: &str) -> Result<Vec<HeapIndex>> {
    catalog
        .index_names(table_name)?
        .iter()
        .map(|index_name| catalog.get_index(table_name, index_name))
        .collect()
}

/// The catalog relations change only through DDL
fn check_writable(table_name: &str) -> Result<()> {
    if is_catalog_table(table_name) {
        return Err(DbError::schema(format!("catalog relation {table_name} is read-only")));
    }
    Ok(())
}

fn insert(
    catalog: &mut Catalog,
    table_name: &str,
    columns: Option<&[String]>,
    values: &[Value],
) -> Result<QueryResult> {
    check_writable(table_name)?;
    let table = catalog.get_table(table_name)?;
    let column_names = match columns {
        Some(columns) => {
            check_columns(table, columns)?;
            columns.to_vec()
        }
        None => table.column_names(),
    };
    if column_names.len() != values.len() {
        return Err(DbError::schema(format!(
            "{} columns but {} values for {table_name}",
            column_names.len(),
            values.len()
        )));
    }
    let row: Row = column_names.into_iter().zip(values.iter().cloned()).collect();
    let handle = table.insert(&row)?;

    let mut indices = indices_of(catalog, table_name)?;
    for i in 0..indices.len() {
        if let Err(e) = indices[i].insert(handle, &row) {
            for index in &mut indices[..i] {
                if let Err(undo_err) = index.del(handle) {
                    warn!(index = index.index_name(), error = %undo_err, "failed to unindex rejected row");
                }
            }
            let removed = catalog
                .get_table(table_name)
                .and_then(|table| table.del(handle));
            if let Err(undo_err) = removed {
                warn!(table = table_name, error = %undo_err, "failed to remove rejected row");
            }
            return Err(e);
        }
    }
    Ok(QueryResult::message(format!(
        "successfully inserted 1 row into {table_name}"
    )))
}

fn delete(catalog: &mut Catalog, table_name: &str, conditions: &Conditions) -> Result<QueryResult> {
    check_writable(table_name)?;
    let handles = matching_handles(catalog.get_table(table_name)?, conditions)?;
    let mut indices = indices_of(catalog, table_name)?;
    let table = catalog.get_table(table_name)?;
    for handle in &handles {
        for index in &mut indices {
            index.del(*handle)?;
        }
        table.del(*handle)?;
    }
    Ok(QueryResult::message(format!(
        "successfully deleted {} rows from {table_name}",
        handles.len()
    )))
}

fn select(
    catalog: &mut Catalog,
    table_name: &str,
    columns: Option<&[String]>,
    conditions: &Conditions,
) -> Result<QueryResult> {
    let table = catalog.get_table(table_name)?;
    let column_names = match columns {
        Some(columns) => {
            check_columns(table, columns)?;
            columns.to_vec()
        }
        None => table.column_names(),
    };
    let rows = matching_handles(table, conditions)?
        .into_iter()
        .map(|handle| table.project_columns(handle, &column_names))
        .collect::<Result<Vec<_>>>()?;
    Ok(QueryResult::rows(column_names, rows))
}
