//! Columnar encoder: schema-driven conversion of record batches to parquet.
//!
//! The encoder is a pure function from `(schema, records)` to an opaque byte
//! buffer. It performs its own `(declared type, actual kind)` dispatch so a
//! record that slipped past gateway validation still fails loudly here
//! instead of producing a corrupt column.

use std::sync::Arc;

use arrow::array::{
    ArrayBuilder, ArrayRef, BinaryArray, BooleanArray, BooleanBuilder, Float64Array,
    Float64Builder, Int32Array, Int32Builder, Int64Array, Int64Builder, ListBuilder, StringArray,
    StringBuilder, TimestampMillisecondArray, TimestampMillisecondBuilder,
};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde_json::Value;

use crate::schema::{PrimitiveType, Record, Repetition, SchemaDocument, SchemaField};

/// An encoded columnar artifact.
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    /// The parquet file bytes.
    pub bytes: Bytes,
    /// Number of rows encoded.
    pub row_count: u64,
}

/// Encoder failure with per-field detail.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct EncodeError(pub String);

/// The seam between the orchestrator and the columnar format.
pub trait RecordEncoder: Send + Sync {
    /// Encodes a partition's records into one columnar file.
    ///
    /// # Errors
    ///
    /// Returns `EncodeError` when a record does not satisfy the schema or
    /// the schema uses a type the encoder cannot express.
    fn encode(
        &self,
        schema: &SchemaDocument,
        records: &[Record],
    ) -> std::result::Result<EncodedArtifact, EncodeError>;
}

/// Parquet implementation of the encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetEncoder;

impl ParquetEncoder {
    /// Creates a parquet encoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RecordEncoder for ParquetEncoder {
    fn encode(
        &self,
        schema: &SchemaDocument,
        records: &[Record],
    ) -> std::result::Result<EncodedArtifact, EncodeError> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());
        let mut arrow_fields: Vec<Field> = Vec::with_capacity(schema.fields.len());

        for field in &schema.fields {
            let array = build_column(field, records)?;
            let nullable = field.repetition_type != Repetition::Required;
            arrow_fields.push(Field::new(&field.name, array.data_type().clone(), nullable));
            arrays.push(array);
        }

        let arrow_schema = Arc::new(Schema::new(arrow_fields));
        let batch = RecordBatch::try_new(arrow_schema.clone(), arrays)
            .map_err(|e| EncodeError(format!("failed to assemble record batch: {e}")))?;

        let mut buf = Vec::new();
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(&mut buf, arrow_schema, Some(props))
            .map_err(|e| EncodeError(format!("failed to open parquet writer: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| EncodeError(format!("failed to write row group: {e}")))?;
        writer
            .close()
            .map_err(|e| EncodeError(format!("failed to finalize parquet file: {e}")))?;

        Ok(EncodedArtifact {
            bytes: Bytes::from(buf),
            row_count: records.len() as u64,
        })
    }
}

fn build_column(
    field: &SchemaField,
    records: &[Record],
) -> std::result::Result<ArrayRef, EncodeError> {
    if field.repetition_type == Repetition::Repeated {
        return build_list_column(field, records);
    }

    match field.primitive_type {
        PrimitiveType::Boolean => {
            let values = collect_scalars(field, records, |v| v.as_bool())?;
            Ok(Arc::new(BooleanArray::from(values)))
        }
        PrimitiveType::Int32 => {
            let values = collect_scalars(field, records, |v| {
                v.as_i64().and_then(|n| i32::try_from(n).ok())
            })?;
            Ok(Arc::new(Int32Array::from(values)))
        }
        PrimitiveType::Int64 => {
            let values = collect_scalars(field, records, Value::as_i64)?;
            if field.is_timestamp_millis() {
                Ok(Arc::new(TimestampMillisecondArray::from(values)))
            } else {
                Ok(Arc::new(Int64Array::from(values)))
            }
        }
        PrimitiveType::Double => {
            let values = collect_scalars(field, records, Value::as_f64)?;
            Ok(Arc::new(Float64Array::from(values)))
        }
        PrimitiveType::ByteArray | PrimitiveType::Binary => {
            let values = collect_scalars(field, records, Value::as_str)?;
            if field.is_utf8() {
                Ok(Arc::new(StringArray::from(values)))
            } else {
                let bytes: Vec<Option<&[u8]>> =
                    values.into_iter().map(|v| v.map(str::as_bytes)).collect();
                Ok(Arc::new(BinaryArray::from_opt_vec(bytes)))
            }
        }
        PrimitiveType::Int96 | PrimitiveType::FixedLenByteArray => Err(EncodeError(format!(
            "field '{}': {:?} is not supported by the encoder",
            field.name, field.primitive_type
        ))),
    }
}

/// Pulls one scalar per record, enforcing requiredness and kind.
fn collect_scalars<'a, T, F>(
    field: &SchemaField,
    records: &'a [Record],
    extract: F,
) -> std::result::Result<Vec<Option<T>>, EncodeError>
where
    F: Fn(&'a Value) -> Option<T>,
{
    let mut out = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        match record.get(&field.name) {
            None | Some(Value::Null) => {
                if field.repetition_type == Repetition::Required {
                    return Err(EncodeError(format!(
                        "field '{}' is required but missing in row {row}",
                        field.name
                    )));
                }
                out.push(None);
            }
            Some(value) => match extract(value) {
                Some(v) => out.push(Some(v)),
                None => {
                    return Err(EncodeError(format!(
                        "field '{}' has an incompatible value in row {row}",
                        field.name
                    )));
                }
            },
        }
    }
    Ok(out)
}

fn build_list_column(
    field: &SchemaField,
    records: &[Record],
) -> std::result::Result<ArrayRef, EncodeError> {
    match field.primitive_type {
        PrimitiveType::Boolean => build_list(field, records, BooleanBuilder::new(), |b, v| {
            v.as_bool().map(|x| b.append_value(x))
        }),
        PrimitiveType::Int32 => build_list(field, records, Int32Builder::new(), |b, v| {
            v.as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(|x| b.append_value(x))
        }),
        PrimitiveType::Int64 => {
            if field.is_timestamp_millis() {
                build_list(field, records, TimestampMillisecondBuilder::new(), |b, v| {
                    v.as_i64().map(|x| b.append_value(x))
                })
            } else {
                build_list(field, records, Int64Builder::new(), |b, v| {
                    v.as_i64().map(|x| b.append_value(x))
                })
            }
        }
        PrimitiveType::Double => build_list(field, records, Float64Builder::new(), |b, v| {
            v.as_f64().map(|x| b.append_value(x))
        }),
        PrimitiveType::ByteArray | PrimitiveType::Binary => {
            build_list(field, records, StringBuilder::new(), |b, v| {
                v.as_str().map(|x| b.append_value(x))
            })
        }
        PrimitiveType::Int96 | PrimitiveType::FixedLenByteArray => Err(EncodeError(format!(
            "field '{}': repeated {:?} is not supported by the encoder",
            field.name, field.primitive_type
        ))),
    }
}

fn build_list<B, F>(
    field: &SchemaField,
    records: &[Record],
    inner: B,
    append: F,
) -> std::result::Result<ArrayRef, EncodeError>
where
    B: ArrayBuilder,
    F: Fn(&mut B, &Value) -> Option<()>,
{
    let mut builder = ListBuilder::new(inner);
    for (row, record) in records.iter().enumerate() {
        match record.get(&field.name) {
            None | Some(Value::Null) => builder.append_null(),
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    append(builder.values(), item).ok_or_else(|| {
                        EncodeError(format!(
                            "field '{}' element {i} has an incompatible value in row {row}",
                            field.name
                        ))
                    })?;
                }
                builder.append(true);
            }
            Some(_) => {
                return Err(EncodeError(format!(
                    "field '{}' must be an array in row {row}",
                    field.name
                )));
            }
        }
    }
    Ok(Arc::new(builder.finish()))
}

impl SchemaField {
    fn is_utf8(&self) -> bool {
        matches!(
            self.logical_type,
            Some(crate::schema::LogicalType::Utf8) | Some(crate::schema::LogicalType::Json)
        )
    }

    fn is_timestamp_millis(&self) -> bool {
        matches!(
            self.logical_type,
            Some(crate::schema::LogicalType::TimestampMillis)
        )
    }
}
