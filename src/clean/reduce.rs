use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::arrow::{
    array::{ArrayRef, AsArray},
    compute::{cast, max, min},
    datatypes::{DataType, Field, Int64Type, Schema},
    record_batch::RecordBatch,
};

/// One column's storage change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Narrowing {
    pub column: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReport {
    pub before_bytes: usize,
    pub after_bytes: usize,
    pub decrease_percent: f64,
    pub changes: Vec<Narrowing>,
}

/// Integer widths tried in order. A column qualifies when its observed
/// min and max lie strictly inside the width's range.
const INTEGER_LADDER: [(DataType, i64, i64); 3] = [
    (DataType::Int8, i8::MIN as i64, i8::MAX as i64),
    (DataType::Int16, i16::MIN as i64, i16::MAX as i64),
    (DataType::Int32, i32::MIN as i64, i32::MAX as i64),
];

const FLOAT_LADDER: [DataType; 2] = [DataType::Float16, DataType::Float32];

pub fn categorical(value_type: DataType) -> DataType {
    DataType::Dictionary(Box::new(DataType::Int32), Box::new(value_type))
}

/// Narrow numeric columns and dictionary-encode text columns.
///
/// The chosen widths are only valid for the values in this batch: a later
/// batch may not fit them.
pub fn reduce_memory(batch: &RecordBatch) -> Result<(RecordBatch, MemoryReport)> {
    let before_bytes = batch.get_array_memory_size();
    info!(
        "memory usage of dataframe is {:.2} MB",
        before_bytes as f64 / 1024.0 / 1024.0
    );

    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    let mut changes = Vec::new();

    for (field, col) in schema.fields().iter().zip(batch.columns()) {
        let target = narrowed_type(col)
            .with_context(|| format!("choosing storage type for `{}`", field.name()))?;
        match target {
            Some(to) if &to != col.data_type() => {
                let narrowed = cast(col, &to)
                    .with_context(|| format!("casting `{}` to {}", field.name(), to))?;
                debug!(column = %field.name(), from = %col.data_type(), to = %to, "narrowed column");
                changes.push(Narrowing {
                    column: field.name().clone(),
                    from: col.data_type().to_string(),
                    to: to.to_string(),
                });
                fields.push(Field::new(field.name(), to, field.is_nullable()));
                columns.push(narrowed);
            }
            _ => {
                fields.push(field.as_ref().clone());
                columns.push(col.clone());
            }
        }
    }

    let out = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("assembling reduced batch")?;
    let after_bytes = out.get_array_memory_size();
    let decrease_percent = if before_bytes == 0 {
        0.0
    } else {
        100.0 * (before_bytes as f64 - after_bytes as f64) / before_bytes as f64
    };
    info!(
        "memory usage after optimization is: {:.2} MB",
        after_bytes as f64 / 1024.0 / 1024.0
    );
    info!("decreased by {:.1}%", decrease_percent);

    Ok((
        out,
        MemoryReport {
            before_bytes,
            after_bytes,
            decrease_percent,
            changes,
        },
    ))
}

/// Storage type a column should move to, or `None` to leave it alone.
/// Temporal, boolean and already-categorical columns are never changed.
pub fn narrowed_type(col: &ArrayRef) -> Result<Option<DataType>> {
    let current = col.data_type();
    let target = match current {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            integer_target(col)?
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => float_target(col)?,
        DataType::Utf8 | DataType::LargeUtf8 => return Ok(Some(categorical(current.clone()))),
        _ => return Ok(None),
    };

    // never widen a column that is already narrower than the pick
    match (target.primitive_width(), current.primitive_width()) {
        (Some(t), Some(c)) if t < c => Ok(Some(target)),
        _ => Ok(None),
    }
}

fn integer_target(col: &ArrayRef) -> Result<DataType> {
    let wide = cast(col, &DataType::Int64)?;
    let values = wide.as_primitive::<Int64Type>();
    let (lo, hi) = match (min(values), max(values)) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => return Ok(DataType::Int8),
    };

    for (dt, type_min, type_max) in INTEGER_LADDER {
        if lo > type_min && hi < type_max {
            return Ok(dt);
        }
    }
    Ok(DataType::Int64)
}

/// Smallest float type through which every value round-trips unchanged.
fn float_target(col: &ArrayRef) -> Result<DataType> {
    let wide = cast(col, &DataType::Float64)?;
    for dt in FLOAT_LADDER {
        let narrowed = cast(&wide, &dt)?;
        let restored = cast(&narrowed, &DataType::Float64)?;
        if restored.as_ref() == wide.as_ref() {
            return Ok(dt);
        }
    }
    Ok(DataType::Float64)
}
