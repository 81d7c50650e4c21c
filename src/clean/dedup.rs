use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::debug;

use crate::arrow::{
    array::BooleanArray,
    compute::filter_record_batch,
    record_batch::RecordBatch,
    row::{RowConverter, SortField},
};

/// Which copy of a duplicated row survives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keep {
    First,
    Last,
}

/// Drop rows equal (across every column, nulls equal) to another row.
/// Survivors keep their relative order.
pub fn dedup_rows(batch: &RecordBatch, keep: Keep) -> Result<RecordBatch> {
    let n = batch.num_rows();
    if n < 2 || batch.num_columns() == 0 {
        return Ok(batch.clone());
    }

    let sort_fields = batch
        .schema()
        .fields()
        .iter()
        .map(|f| SortField::new(f.data_type().clone()))
        .collect();
    let converter = RowConverter::new(sort_fields).context("building row converter")?;
    let rows = converter
        .convert_columns(batch.columns())
        .context("encoding rows for comparison")?;

    let mut seen = HashSet::with_capacity(n);
    let mut mask = vec![false; n];
    let visit: Box<dyn Iterator<Item = usize>> = match keep {
        Keep::First => Box::new(0..n),
        Keep::Last => Box::new((0..n).rev()),
    };
    for i in visit {
        if seen.insert(rows.row(i)) {
            mask[i] = true;
        }
    }

    let kept = seen.len();
    if kept == n {
        return Ok(batch.clone());
    }
    debug!(dropped = n - kept, ?keep, "dropping duplicate rows");
    filter_record_batch(batch, &BooleanArray::from(mask)).context("filtering duplicate rows")
}

/// Drop columns whose values repeat an earlier column's values exactly
/// (same type, same nulls). The leftmost label survives; the labels of the
/// dropped columns are returned.
///
/// An empty batch is returned unchanged: with no rows every pair of
/// same-typed columns would compare equal.
pub fn dedup_columns(batch: &RecordBatch) -> Result<(RecordBatch, Vec<String>)> {
    if batch.num_rows() == 0 {
        return Ok((batch.clone(), Vec::new()));
    }

    let schema = batch.schema();
    let mut kept: Vec<usize> = Vec::with_capacity(batch.num_columns());
    let mut dropped = Vec::new();

    for (i, col) in batch.columns().iter().enumerate() {
        let repeat = kept
            .iter()
            .find(|&&k| batch.column(k).as_ref() == col.as_ref());
        match repeat {
            Some(&k) => {
                debug!(
                    column = %schema.field(i).name(),
                    same_as = %schema.field(k).name(),
                    "dropping duplicate column"
                );
                dropped.push(schema.field(i).name().clone());
            }
            None => kept.push(i),
        }
    }

    if dropped.is_empty() {
        return Ok((batch.clone(), dropped));
    }
    let projected = batch.project(&kept).context("projecting unique columns")?;
    Ok((projected, dropped))
}
