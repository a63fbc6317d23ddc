//! Output formatting for result rows and status checks.
//!
//! Only results go to stdout; progress and diagnostics are logged to stderr.

use std::collections::HashSet;
use std::io::Write;

use serde::Serialize;

use crate::db::{ColumnInfo, QueryId, Row, Value};
use crate::detached::{Observation, PollState, StatusCheck};
use crate::error::{DetachError, Result};

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Tab-separated columns, one line per row, with a header line.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {s}. Expected: text or json")),
        }
    }
}

/// Writes result rows as they arrive.
pub struct RowWriter<W: Write> {
    format: OutputFormat,
    out: W,
    columns: Vec<String>,
    keys: Vec<String>,
    rows_written: u64,
}

impl<W: Write> RowWriter<W> {
    /// Creates a writer for a result set with the given columns.
    pub fn new(format: OutputFormat, out: W, columns: &[ColumnInfo]) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        Self {
            format,
            out,
            keys: unique_keys(&columns),
            columns,
            rows_written: 0,
        }
    }

    /// Writes the header line (text format only).
    pub fn write_header(&mut self) -> Result<()> {
        if self.format == OutputFormat::Text && !self.columns.is_empty() {
            writeln!(self.out, "{}", self.columns.join("\t")).map_err(write_error)?;
        }
        Ok(())
    }

    /// Writes one row.
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let line = match self.format {
            OutputFormat::Text => row
                .iter()
                .map(text_cell)
                .collect::<Vec<_>>()
                .join("\t"),
            OutputFormat::Json => {
                let object: serde_json::Map<String, serde_json::Value> = row
                    .iter()
                    .enumerate()
                    .map(|(i, value)| (self.column_name(i), json_value(value)))
                    .collect();
                serde_json::to_string(&object).map_err(|e| {
                    DetachError::internal(format!("Failed to serialize row: {e}"))
                })?
            }
        };
        writeln!(self.out, "{line}").map_err(write_error)?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flushes the output and returns the number of rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.out.flush().map_err(write_error)?;
        Ok(self.rows_written)
    }

    fn column_name(&self, index: usize) -> String {
        self.keys
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("column{}", index + 1))
    }
}

/// JSON object keys for the columns: repeated names get a `_2`, `_3`, ...
/// suffix so no value is lost.
fn unique_keys(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| {
            let mut key = name.clone();
            let mut n = 1;
            while !seen.insert(key.clone()) {
                n += 1;
                key = format!("{name}_{n}");
            }
            key
        })
        .collect()
}

#[derive(Serialize)]
struct StatusJson<'a> {
    query_id: &'a str,
    status: Option<&'a str>,
    state: &'static str,
}

/// Formats a single status lookup.
pub fn format_status(check: &StatusCheck, format: OutputFormat) -> String {
    let status = match &check.observation {
        Observation::Absent => None,
        Observation::Reported(status) => Some(status.as_str()),
    };
    let state = state_name(&check.state);

    match format {
        OutputFormat::Text => format!(
            "{}\t{}\t{}",
            check.query_id,
            status.unwrap_or("(not recorded yet)"),
            state
        ),
        OutputFormat::Json => serde_json::to_string(&StatusJson {
            query_id: check.query_id.as_str(),
            status,
            state,
        })
        .unwrap_or_else(|e| format!("{{\"error\": \"Failed to serialize: {e}\"}}")),
    }
}

/// Formats the id of a submitted query.
pub fn format_submitted(query_id: &QueryId, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => query_id.to_string(),
        OutputFormat::Json => serde_json::json!({ "query_id": query_id }).to_string(),
    }
}

fn state_name(state: &PollState) -> &'static str {
    match state {
        PollState::Polling => "running",
        PollState::Succeeded => "succeeded",
        PollState::Failed(_) => "failed",
        PollState::Aborted(_) => "aborted",
    }
}

fn text_cell(value: &Value) -> String {
    match value {
        Value::Bytes(bytes) => hex::encode(bytes),
        other => other.to_display_string().replace(['\t', '\n'], " "),
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => serde_json::Value::String(hex::encode(bytes)),
    }
}

fn write_error(e: std::io::Error) -> DetachError {
    DetachError::internal(format!("Failed to write output: {e}"))
}
