use anyhow::{Context, Result};
use std::sync::Arc;

use crate::arrow::{
    array::{new_null_array, ArrayRef},
    compute::{cast, concat_batches},
    datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use crate::clean::dedup::{dedup_rows, Keep};

fn int_rank(dt: &DataType) -> Option<u8> {
    match dt {
        DataType::Int8 => Some(1),
        DataType::Int16 => Some(2),
        DataType::Int32 => Some(3),
        DataType::Int64 => Some(4),
        _ => None,
    }
}

fn is_numeric(dt: &DataType) -> bool {
    int_rank(dt).is_some() || matches!(dt, DataType::Float16 | DataType::Float32 | DataType::Float64)
}

/// Type able to hold values of both `a` and `b`.
pub fn common_type(a: &DataType, b: &DataType) -> DataType {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (DataType::Timestamp(_, _), DataType::Timestamp(_, _)) => {
            DataType::Timestamp(TimeUnit::Microsecond, None)
        }
        _ => match (int_rank(a), int_rank(b)) {
            (Some(x), Some(y)) => (if x >= y { a } else { b }).clone(),
            _ if is_numeric(a) && is_numeric(b) => DataType::Float64,
            _ => DataType::Utf8,
        },
    }
}

/// Incoming columns first, then columns only the stored table has.
pub fn union_schema(incoming: &Schema, stored: &Schema) -> SchemaRef {
    let mut fields: Vec<Field> = incoming
        .fields()
        .iter()
        .map(|f| {
            let dt = match stored.field_with_name(f.name()) {
                Ok(s) => common_type(f.data_type(), s.data_type()),
                Err(_) => f.data_type().clone(),
            };
            Field::new(f.name(), dt, true)
        })
        .collect();
    fields.extend(
        stored
            .fields()
            .iter()
            .filter(|f| incoming.field_with_name(f.name()).is_err())
            .map(|f| Field::new(f.name(), f.data_type().clone(), true)),
    );
    Arc::new(Schema::new(fields))
}

/// Reshape `batch` to `schema`: cast shared columns, null-fill absent ones.
pub fn align(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|f| match batch.column_by_name(f.name()) {
            Some(col) => cast(col, f.data_type())
                .with_context(|| format!("casting `{}` to {}", f.name(), f.data_type())),
            None => Ok(new_null_array(f.data_type(), batch.num_rows())),
        })
        .collect::<Result<Vec<ArrayRef>>>()?;
    RecordBatch::try_new(schema.clone(), columns).context("aligning batch to merged schema")
}

/// Deduplicated union of stored and incoming rows over the union of their
/// columns. Where a stored row equals an incoming row, the incoming one wins.
pub fn merge_rows(stored: &RecordBatch, incoming: &RecordBatch) -> Result<RecordBatch> {
    let schema = union_schema(&incoming.schema(), &stored.schema());
    let combined = concat_batches(
        &schema,
        &[align(stored, &schema)?, align(incoming, &schema)?],
    )
    .context("concatenating stored and incoming rows")?;
    dedup_rows(&combined, Keep::Last)
}
