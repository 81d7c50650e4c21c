use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::sync::Arc;

use crate::arrow::{
    array::{ArrayRef, TimestampMicrosecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use crate::clean::header::normalize_label;

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "execution_date";

/// Add (or overwrite) `column`, holding `at` on every row. The value is a
/// wall-clock time with no zone attached.
///
/// Any source column whose label normalizes to the same header as `column`
/// is replaced, so the stamp keeps its name after header normalization.
pub fn stamp_execution_time(
    batch: &RecordBatch,
    column: &str,
    at: NaiveDateTime,
) -> Result<RecordBatch> {
    let micros = at.and_utc().timestamp_micros();
    let stamp: ArrayRef = Arc::new(TimestampMicrosecondArray::from(vec![
        micros;
        batch.num_rows()
    ]));
    let field = Field::new(
        column,
        DataType::Timestamp(TimeUnit::Microsecond, None),
        false,
    );

    let stamped_label = normalize_label(column);
    let schema = batch.schema();
    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns() + 1);
    let mut columns = Vec::with_capacity(batch.num_columns() + 1);
    for (f, col) in schema.fields().iter().zip(batch.columns()) {
        if normalize_label(f.name()) != stamped_label {
            fields.push(f.as_ref().clone());
            columns.push(col.clone());
        }
    }
    fields.push(field);
    columns.push(stamp);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .with_context(|| format!("stamping `{}`", column))
}
