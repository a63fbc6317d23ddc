//! Value, row and cursor types shared by every session backend.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Server-assigned handle naming one statement execution.
///
/// Immutable once captured; it is the only thing that links the submitting
/// session to the sessions that later check status and fetch results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    /// Wraps a server-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&QueryId> for Value {
    fn from(id: &QueryId) -> Self {
        Value::String(id.0.clone())
    }
}

/// Identity of one logical session, unique per backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Column data type as reported by the server.
    pub data_type: String,
}

impl ColumnInfo {
    /// Creates a new column info with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A row of data from a query result.
pub type Row = Vec<Value>;

/// Represents a single value from a database query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string payload, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to convert the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Single-pass cursor over the rows of one statement.
///
/// Rows are pulled lazily from the backend; once consumed the cursor cannot
/// be rewound. Re-run the statement to read the rows again.
pub struct RowCursor {
    columns: Vec<ColumnInfo>,
    rows: BoxStream<'static, Result<Row>>,
}

impl RowCursor {
    /// Creates a cursor over a backend row stream.
    pub fn new(columns: Vec<ColumnInfo>, rows: BoxStream<'static, Result<Row>>) -> Self {
        Self { columns, rows }
    }

    /// Creates a cursor over rows that are already in memory.
    pub fn from_rows(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self::new(columns, stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    /// Creates a cursor with no columns and no rows.
    pub fn empty() -> Self {
        Self::from_rows(Vec::new(), Vec::new())
    }

    /// Column metadata for the result set.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Advances the cursor, returning `None` at the end of the result set.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        self.rows.next().await
    }

    /// Drains the remaining rows into memory.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Splits the cursor into its column metadata and row stream.
    pub fn into_parts(self) -> (Vec<ColumnInfo>, BoxStream<'static, Result<Row>>) {
        (self.columns, self.rows)
    }
}

impl fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Handle to a statement that was submitted without waiting for completion.
///
/// The query id is fixed at construction, so holding a `LiveCursor` means the
/// id has already been captured.
#[derive(Debug, Clone)]
pub struct LiveCursor {
    query_id: QueryId,
    session_id: SessionId,
}

impl LiveCursor {
    /// Creates a live cursor for a statement submitted on `session_id`.
    pub fn new(query_id: QueryId, session_id: SessionId) -> Self {
        Self {
            query_id,
            session_id,
        }
    }

    /// The server-assigned id of the submitted statement.
    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// The session that submitted the statement.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Consumes the cursor, keeping only the query id.
    pub fn into_query_id(self) -> QueryId {
        self.query_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetachError;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_display_string(), "NULL");
        assert_eq!(Value::Bool(true).to_display_string(), "true");
        assert_eq!(Value::Int(42).to_display_string(), "42");
        assert_eq!(Value::Float(2.71).to_display_string(), "2.71");
        assert_eq!(
            Value::String("hello".to_string()).to_display_string(),
            "hello"
        );
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_display_string(), "<3 bytes>");
    }

    #[test]
    fn test_value_from_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(
            Value::from(&QueryId::new("abc")),
            Value::String("abc".to_string())
        );
    }

    #[test]
    fn test_query_id_display() {
        let id = QueryId::new("01b2c3d4-0000-4a5b-0000-000000000001");
        assert_eq!(id.to_string(), "01b2c3d4-0000-4a5b-0000-000000000001");
        assert_eq!(id.as_str(), "01b2c3d4-0000-4a5b-0000-000000000001");
        assert!(!id.is_empty());
        assert!(QueryId::new("").is_empty());
    }

    #[tokio::test]
    async fn test_row_cursor_is_single_pass() {
        let mut cursor = RowCursor::from_rows(
            vec![ColumnInfo::new("n", "fixed")],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );

        assert_eq!(cursor.columns().len(), 1);
        assert_eq!(cursor.next_row().await.unwrap().unwrap(), vec![Value::Int(1)]);
        assert_eq!(cursor.next_row().await.unwrap().unwrap(), vec![Value::Int(2)]);
        assert!(cursor.next_row().await.is_none());
        assert!(cursor.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_rows_stops_at_first_error() {
        let rows: Vec<Result<Row>> = vec![
            Ok(vec![Value::Int(1)]),
            Err(DetachError::query("chunk download failed")),
            Ok(vec![Value::Int(3)]),
        ];
        let cursor = RowCursor::new(Vec::new(), stream::iter(rows).boxed());

        let err = cursor.collect_rows().await.unwrap_err();
        assert!(err.to_string().contains("chunk download failed"));
    }

    #[test]
    fn test_live_cursor_keeps_query_id() {
        let cursor = LiveCursor::new(QueryId::new("q-1"), SessionId(7));
        assert_eq!(cursor.query_id().as_str(), "q-1");
        assert_eq!(cursor.session_id(), SessionId(7));
        assert_eq!(cursor.into_query_id(), QueryId::new("q-1"));
    }
}
