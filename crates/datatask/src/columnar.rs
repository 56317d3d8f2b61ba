//! Column-oriented backup encoding.
//!
//! A table is stored as one typed value vector per column, serialized as
//! JSON and gzip-compressed. Decoding checks that the batch matches the
//! table's current column layout before any row is handed back.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::entity_repo::{columns, ColumnKind, TableData};
use crate::task::Table;

pub const FORMAT: &str = "datatask-columnar/1";

/// File extension used for backup objects.
pub const EXTENSION: &str = "cols.gz";

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid batch encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported batch format '{0}'")]
    Format(String),

    #[error("Batch is for table {found}, expected {expected}")]
    TableMismatch { expected: Table, found: Table },

    #[error("Column mismatch: {0}")]
    Columns(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum ColumnValues {
    Integer(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    fn len(&self) -> usize {
        match self {
            ColumnValues::Integer(v) => v.len(),
            ColumnValues::Real(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
        }
    }

    fn get(&self, index: usize) -> SqlValue {
        let value = match self {
            ColumnValues::Integer(v) => v.get(index).cloned().flatten().map(SqlValue::Integer),
            ColumnValues::Real(v) => v.get(index).cloned().flatten().map(SqlValue::Real),
            ColumnValues::Text(v) => v.get(index).cloned().flatten().map(SqlValue::Text),
        };
        value.unwrap_or(SqlValue::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnarBatch {
    pub format: String,
    pub table: Table,
    pub row_count: usize,
    pub columns: Vec<Column>,
}

impl ColumnarBatch {
    /// Pivots row-major table data into columns.
    pub fn from_table(data: &TableData) -> Result<Self, CodecError> {
        let defs = columns(data.table);
        let mut out = Vec::with_capacity(defs.len());

        for (index, def) in defs.iter().enumerate() {
            let cells = data.rows.iter().map(|row| row.get(index));
            let values = match def.kind {
                ColumnKind::Integer => ColumnValues::Integer(
                    cells
                        .map(|cell| match cell {
                            Some(SqlValue::Integer(i)) => Ok(Some(*i)),
                            Some(SqlValue::Null) | None => Ok(None),
                            Some(other) => Err(CodecError::Columns(format!(
                                "{}: expected integer, got {:?}",
                                def.name, other
                            ))),
                        })
                        .collect::<Result<_, _>>()?,
                ),
                ColumnKind::Text => ColumnValues::Text(
                    cells
                        .map(|cell| match cell {
                            Some(SqlValue::Text(s)) => Ok(Some(s.clone())),
                            Some(SqlValue::Null) | None => Ok(None),
                            Some(other) => Err(CodecError::Columns(format!(
                                "{}: expected text, got {:?}",
                                def.name, other
                            ))),
                        })
                        .collect::<Result<_, _>>()?,
                ),
            };
            out.push(Column {
                name: def.name.to_string(),
                values,
            });
        }

        Ok(Self {
            format: FORMAT.to_string(),
            table: data.table,
            row_count: data.rows.len(),
            columns: out,
        })
    }

    /// Pivots the batch back into rows, validating it against `expected`.
    pub fn into_table(self, expected: Table) -> Result<TableData, CodecError> {
        if self.format != FORMAT {
            return Err(CodecError::Format(self.format));
        }
        if self.table != expected {
            return Err(CodecError::TableMismatch {
                expected,
                found: self.table,
            });
        }

        let defs = columns(expected);
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let wanted: Vec<&str> = defs.iter().map(|d| d.name).collect();
        if names != wanted {
            return Err(CodecError::Columns(format!(
                "expected [{}], found [{}]",
                wanted.join(", "),
                names.join(", ")
            )));
        }
        if let Some(bad) = self.columns.iter().find(|c| c.values.len() != self.row_count) {
            return Err(CodecError::Columns(format!(
                "{} has {} values for {} rows",
                bad.name,
                bad.values.len(),
                self.row_count
            )));
        }

        let rows = (0..self.row_count)
            .map(|i| self.columns.iter().map(|c| c.values.get(i)).collect())
            .collect();
        Ok(TableData {
            table: expected,
            rows,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Deterministic object key for a table backup.
pub fn backup_key(table: Table) -> String {
    format!("backups/{}.{}", table.as_str(), EXTENSION)
}
