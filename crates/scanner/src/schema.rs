//! First-sample-defines-schema registry for the per-operation-type tables.
//!
//! The first payload ever seen for an operation type fixes the columns of its
//! table. Later payloads are projected onto those columns: keys the table
//! does not know are dropped, missing keys are stored as NULL.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use hxscan_core::Result;
use hxscan_storage::Store;
use hxscan_storage::models::{ColumnDef, ColumnKind, IndexDef, SqlValue};

/// Columns every wide table is indexed on.
pub const IDENTITY_COLUMNS: [&str; 2] = ["txid", "index_in_tx"];

/// Wide table name for an operation type name:
/// `transfer_operation` becomes `op_transfer`.
pub fn table_name_for(type_name: &str) -> String {
    let base = type_name.strip_suffix("_operation").unwrap_or(type_name);
    let sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("op_{sanitized}")
}

/// Integers get a wide integer column, everything else is text.
pub fn column_kind(value: &Value) -> ColumnKind {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => ColumnKind::BigInt,
        _ => ColumnKind::Text,
    }
}

/// Column set of a table created from `sample`.
pub fn infer_columns(sample: &Map<String, Value>) -> Vec<ColumnDef> {
    sample
        .iter()
        .map(|(name, value)| ColumnDef {
            name: name.clone(),
            kind: column_kind(value),
        })
        .collect()
}

/// Project a payload onto a table's columns.
///
/// Only keys that have a column are returned, in column order.
pub fn project(columns: &[ColumnDef], payload: &Map<String, Value>) -> Vec<(String, SqlValue)> {
    columns
        .iter()
        .filter_map(|column| {
            let value = payload.get(&column.name)?;
            Some((column.name.clone(), coerce(column, value)))
        })
        .collect()
}

fn coerce(column: &ColumnDef, value: &Value) -> SqlValue {
    match column.kind {
        ColumnKind::BigInt => {
            let int = match value {
                Value::Null => None,
                Value::Number(n) => n.as_i64().or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok())),
                Value::String(s) => s.trim().parse().ok(),
                Value::Bool(b) => Some(i64::from(*b)),
                _ => None,
            };
            if int.is_none() && !value.is_null() {
                tracing::warn!(column = %column.name, %value, "Value does not fit integer column, storing NULL");
            }
            SqlValue::BigInt(int)
        }
        ColumnKind::Text => SqlValue::Text(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
    }
}

/// Cached column sets of the wide tables, keyed by table name.
///
/// Entries are never invalidated; a table altered behind the scanner's back
/// is only noticed after a restart.
pub struct SchemaRegistry {
    store: Arc<dyn Store>,
    tables: HashMap<String, Vec<ColumnDef>>,
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            tables: HashMap::new(),
        }
    }

    /// Make sure the wide table for `type_name` exists, creating it from
    /// `sample` on first sight, and return its table name.
    pub async fn ensure_schema(&mut self, type_name: &str, sample: &Map<String, Value>) -> Result<String> {
        let table = table_name_for(type_name);
        if self.tables.contains_key(&table) {
            return Ok(table);
        }

        if !self.store.table_exists(&table).await? {
            let columns = infer_columns(sample);
            let index = IndexDef {
                name: format!("{table}_idx"),
                columns: IDENTITY_COLUMNS.iter().map(|c| c.to_string()).collect(),
            };
            self.store.create_table(&table, &columns, &index).await?;
            tracing::info!(%table, operation = type_name, columns = columns.len(), "Created operation table");
        }

        let columns = self.store.table_columns(&table).await?;
        self.tables.insert(table.clone(), columns);
        Ok(table)
    }

    /// Whether no row with this identity exists in the type's table yet.
    pub async fn is_new(&self, type_name: &str, txid: &str, index_in_tx: usize) -> Result<bool> {
        let exists = self
            .store
            .row_exists(&table_name_for(type_name), txid, index_in_tx as i64)
            .await?;
        Ok(!exists)
    }

    /// Insert a payload into the type's table, dropping unknown keys.
    pub async fn insert(&mut self, type_name: &str, payload: &Map<String, Value>) -> Result<()> {
        let table = self.ensure_schema(type_name, payload).await?;
        let Some(columns) = self.tables.get(&table) else {
            return Ok(());
        };

        let row = project(columns, payload);
        if row.len() < payload.len() {
            let dropped: Vec<&str> = payload
                .keys()
                .filter(|k| !columns.iter().any(|c| &c.name == *k))
                .map(String::as_str)
                .collect();
            tracing::debug!(%table, ?dropped, "Keys outside the table schema dropped");
        }
        self.store.insert_row(&table, &row).await
    }

    pub fn cached_tables(&self) -> usize {
        self.tables.len()
    }
}
