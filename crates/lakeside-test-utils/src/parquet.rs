//! Parquet read-back helpers for round-trip assertions.
//!
//! Production code never reads its own parquet output; these helpers exist
//! so tests can assert that what went in through the gateway comes back out
//! of an artifact unchanged.

use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value;

use lakeside_core::error::{Error, Result};

/// Decodes a parquet artifact into JSON rows, in file order.
///
/// # Errors
///
/// Returns an error if the bytes are not a readable parquet file.
pub fn read_rows(bytes: &Bytes) -> Result<Vec<Value>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(|e| Error::serialization(format!("failed to open parquet: {e}")))?
        .build()
        .map_err(|e| Error::serialization(format!("failed to read parquet: {e}")))?;

    let batches: Vec<RecordBatch> = reader
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::serialization(format!("failed to decode batches: {e}")))?;

    let mut writer = ArrayWriter::new(Vec::new());
    for batch in &batches {
        writer
            .write(batch)
            .map_err(|e| Error::serialization(format!("failed to convert batch: {e}")))?;
    }
    writer
        .finish()
        .map_err(|e| Error::serialization(format!("failed to finish conversion: {e}")))?;

    let json = writer.into_inner();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&json)
        .map_err(|e| Error::serialization(format!("failed to parse converted rows: {e}")))
}

/// Extracts one string column from decoded rows, preserving row order.
///
/// # Errors
///
/// Returns an error if a row lacks the column or it is not a string.
pub fn string_column(rows: &[Value], name: &str) -> Result<Vec<String>> {
    rows.iter()
        .map(|row| {
            row.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::serialization(format!("row has no string column '{name}': {row}"))
                })
        })
        .collect()
}
