use serde::Serialize;
use tracing::info;

use crate::arrow::record_batch::RecordBatch;

/// Null statistics for one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingColumn {
    pub column: String,
    pub missing: usize,
    /// `100 * missing / rows`, rounded to one decimal.
    pub percent: f64,
    pub data_type: String,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Report columns that contain nulls, highest share first. Report only:
/// nothing is dropped or filled in.
pub fn audit_missing(batch: &RecordBatch) -> Vec<MissingColumn> {
    let rows = batch.num_rows();
    let schema = batch.schema();

    let mut report: Vec<MissingColumn> = if rows == 0 {
        Vec::new()
    } else {
        schema
            .fields()
            .iter()
            .zip(batch.columns())
            .filter(|(_, col)| col.null_count() > 0)
            .map(|(field, col)| MissingColumn {
                column: field.name().clone(),
                missing: col.null_count(),
                percent: round1(100.0 * col.null_count() as f64 / rows as f64),
                data_type: field.data_type().to_string(),
            })
            .collect()
    };
    // stable: equal shares keep column order
    report.sort_by(|a, b| b.percent.total_cmp(&a.percent));

    info!(
        "The dataframe has {} columns and {} rows. There are {} columns that have missing values.",
        batch.num_columns(),
        rows,
        report.len()
    );
    report
}
