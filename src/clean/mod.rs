// src/clean/mod.rs
//! Cleaning steps applied to a freshly parsed sheet. Each step takes a batch
//! by reference and returns a new one; [`clean`] runs them in a fixed order.

pub mod dedup;
pub mod header;
pub mod missing;
pub mod reduce;
pub mod special_chars;
pub mod stamp;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::arrow::record_batch::RecordBatch;
use dedup::Keep;
use missing::MissingColumn;
use reduce::MemoryReport;

#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Name of the execution-timestamp column.
    pub timestamp_column: String,
    /// Local wall-clock start of the run, stamped on every row.
    pub run_started: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicate_rows_dropped: usize,
    pub duplicate_columns_dropped: Vec<String>,
    pub memory: MemoryReport,
    pub missing: Vec<MissingColumn>,
}

/// Run every cleaning step over `batch`:
/// 1. drop duplicate rows (first copy wins)
/// 2. drop duplicate columns (leftmost wins)
/// 3. stamp the execution timestamp
/// 4. normalize headers
/// 5. strip special characters from text
/// 6. narrow column storage
/// 7. audit missing values
#[tracing::instrument(level = "info", skip_all, fields(rows = batch.num_rows(), columns = batch.num_columns()))]
pub fn clean(batch: &RecordBatch, opts: &CleanOptions) -> Result<(RecordBatch, CleanReport)> {
    let rows_in = batch.num_rows();

    let deduped = dedup::dedup_rows(batch, Keep::First).context("dropping duplicate rows")?;
    let duplicate_rows_dropped = rows_in - deduped.num_rows();

    let (deduped, duplicate_columns_dropped) =
        dedup::dedup_columns(&deduped).context("dropping duplicate columns")?;

    let stamped =
        stamp::stamp_execution_time(&deduped, &opts.timestamp_column, opts.run_started)?;
    let renamed = header::normalize_headers(&stamped)?;
    let stripped = special_chars::strip_special_chars(&renamed)?;
    let (reduced, memory) = reduce::reduce_memory(&stripped).context("reducing memory")?;
    let missing = missing::audit_missing(&reduced);

    info!(
        rows_in,
        rows_out = reduced.num_rows(),
        duplicate_rows_dropped,
        duplicate_columns = duplicate_columns_dropped.len(),
        "cleaning finished"
    );

    let report = CleanReport {
        rows_in,
        rows_out: reduced.num_rows(),
        duplicate_rows_dropped,
        duplicate_columns_dropped,
        memory,
        missing,
    };
    Ok((reduced, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::array::{ArrayRef, AsArray, Float64Array, Int64Array, StringArray};
    use crate::arrow::datatypes::{DataType, Int32Type, TimeUnit};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn opts() -> CleanOptions {
        CleanOptions {
            timestamp_column: "Execution_Date".into(),
            run_started: NaiveDate::from_ymd_opt(2022, 3, 28)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
        }
    }

    fn raw() -> RecordBatch {
        RecordBatch::try_from_iter(vec![
            (
                "Código",
                Arc::new(StringArray::from(vec![
                    Some("A (1)"),
                    Some("B: 2"),
                    Some("A (1)"),
                    None,
                ])) as ArrayRef,
            ),
            (
                "Qty",
                Arc::new(Int64Array::from(vec![Some(1), Some(2), Some(1), Some(4)])) as ArrayRef,
            ),
            (
                "Qty Copy",
                Arc::new(Int64Array::from(vec![Some(1), Some(2), Some(1), Some(4)])) as ArrayRef,
            ),
            (
                "Price",
                Arc::new(Float64Array::from(vec![Some(0.5), None, Some(0.5), None])) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn runs_all_steps_in_order() -> Result<()> {
        let (out, report) = clean(&raw(), &opts())?;

        assert_eq!(report.rows_in, 4);
        assert_eq!(report.rows_out, 3);
        assert_eq!(report.duplicate_rows_dropped, 1);
        assert_eq!(report.duplicate_columns_dropped, vec!["Qty Copy"]);

        let schema = out.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["codigo", "qty", "price", "execution_date"]);

        // text is stripped, then dictionary encoded
        let codes = out.column(0).as_dictionary::<Int32Type>();
        let values = codes.values().as_string::<i32>();
        let key = codes.keys().value(1) as usize;
        assert_eq!(values.value(key), "B2");

        assert_eq!(schema.field(1).data_type(), &DataType::Int8);
        assert_eq!(schema.field(2).data_type(), &DataType::Float16);

        let missing: Vec<&str> = report.missing.iter().map(|m| m.column.as_str()).collect();
        assert_eq!(missing, vec!["price", "codigo"]);
        Ok(())
    }

    #[test]
    fn source_column_matching_after_normalization_is_replaced_by_the_stamp() -> Result<()> {
        let batch = RecordBatch::try_from_iter(vec![
            (
                "Execution_Date",
                Arc::new(StringArray::from(vec!["yesterday", "today"])) as ArrayRef,
            ),
            ("id", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
        ])?;
        let opts = CleanOptions {
            timestamp_column: "execution_date".into(),
            ..opts()
        };
        let (out, _) = clean(&batch, &opts)?;

        let schema = out.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["id", "execution_date"]);
        assert_eq!(
            schema.field(1).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        Ok(())
    }

    #[test]
    fn empty_sheet_still_gets_a_timestamp_column() -> Result<()> {
        let batch = RecordBatch::try_from_iter(vec![(
            "A",
            Arc::new(Int64Array::from(Vec::<i64>::new())) as ArrayRef,
        )])?;
        let (out, report) = clean(&batch, &opts())?;
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.num_columns(), 2);
        assert!(report.missing.is_empty());
        Ok(())
    }
}
