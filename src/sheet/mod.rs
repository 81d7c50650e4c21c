//! Spreadsheet → Arrow. The header row sits at a fixed absolute offset;
//! everything beneath it is data, and each column's type is inferred from its
//! non-empty cells.

pub mod infer;

use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use std::{io::Cursor, sync::Arc};
use tracing::{debug, info};

use crate::arrow::{
    array::{
        ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
        TimestampMicrosecondBuilder,
    },
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use crate::clean::header::disambiguate;
use crate::config::DEFAULT_HEADER_ROW;
use infer::{cell_datetime, cell_text, header_label, infer_kind, ColumnKind};

static EMPTY: Data = Data::Empty;

#[derive(Debug, Clone)]
pub struct SheetOptions {
    /// Sheet to read; the first one when `None`.
    pub sheet: Option<String>,
    /// Zero-based absolute row of the column labels.
    pub header_row: usize,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            sheet: None,
            header_row: DEFAULT_HEADER_ROW,
        }
    }
}

/// Parse workbook bytes (xlsx, xlsm, xlsb, xls, ods) into one record batch.
pub fn read_workbook(bytes: Vec<u8>, opts: &SheetOptions) -> Result<RecordBatch> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).context("opening workbook")?;

    let range = match &opts.sheet {
        Some(name) => workbook
            .worksheet_range(name)
            .with_context(|| format!("reading sheet `{}`", name))?,
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| anyhow!("workbook contains no sheets"))?
            .context("reading first sheet")?,
    };

    range_to_batch(&range, opts.header_row)
}

/// Cell at absolute column `j` of a row that begins at `start_col`.
fn cell(row: &[Data], start_col: usize, j: usize) -> &Data {
    j.checked_sub(start_col)
        .and_then(|k| row.get(k))
        .unwrap_or(&EMPTY)
}

/// Convert a cell range into a record batch, taking labels from the absolute
/// row `header_row`.
pub fn range_to_batch(range: &Range<Data>, header_row: usize) -> Result<RecordBatch> {
    let (start_row, start_col) = range.start().ok_or_else(|| anyhow!("sheet is empty"))?;
    let (start_row, start_col) = (start_row as usize, start_col as usize);
    let rows: Vec<&[Data]> = range.rows().collect();
    // columns are counted from A, blank leading columns included
    let width = start_col + range.width();

    let last_row = start_row + rows.len();
    if header_row >= last_row {
        bail!(
            "header row {} is past the last populated row {}",
            header_row,
            last_row.saturating_sub(1)
        );
    }

    // rows above the range start are blank, so the header may be too
    let header_cells: &[Data] = header_row
        .checked_sub(start_row)
        .and_then(|i| rows.get(i).copied())
        .unwrap_or(&[]);
    let data_rows = &rows[(header_row + 1).saturating_sub(start_row)..];

    let labels = disambiguate(
        (0..width).map(|j| header_label(cell(header_cells, start_col, j), j)),
    );

    let mut fields = Vec::with_capacity(width);
    let mut columns = Vec::with_capacity(width);
    for (j, label) in labels.into_iter().enumerate() {
        let cells: Vec<&Data> = data_rows
            .iter()
            .map(|row| cell(row, start_col, j))
            .collect();
        let kind = infer_kind(cells.iter().copied());
        debug!(column = %label, ?kind, "inferred column type");
        let array = build_column(kind, &cells);
        fields.push(Field::new(label, array.data_type().clone(), true));
        columns.push(array);
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("assembling sheet record batch")?;
    info!(
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        header_row,
        "parsed sheet"
    );
    Ok(batch)
}

fn build_column(kind: ColumnKind, cells: &[&Data]) -> ArrayRef {
    match kind {
        ColumnKind::Integer => {
            let mut b = Int64Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Data::Int(i) => b.append_value(*i),
                    Data::Float(f) => b.append_value(*f as i64),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        ColumnKind::Float => {
            let mut b = Float64Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Data::Int(i) => b.append_value(*i as f64),
                    Data::Float(f) => b.append_value(*f),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        ColumnKind::Boolean => {
            let mut b = BooleanBuilder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Data::Bool(v) => b.append_value(*v),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        ColumnKind::Timestamp => {
            let mut b = TimestampMicrosecondBuilder::with_capacity(cells.len());
            for cell in cells {
                b.append_option(cell_datetime(cell).map(|ts| ts.and_utc().timestamp_micros()));
            }
            Arc::new(b.finish())
        }
        ColumnKind::Text => {
            let mut b = StringBuilder::with_capacity(cells.len(), cells.len() * 16);
            for cell in cells {
                b.append_option(cell_text(cell));
            }
            Arc::new(b.finish())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::array::{Array, AsArray};
    use crate::arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit};
    use rust_xlsxwriter::Workbook;

    fn s(v: &str) -> Data {
        Data::String(v.into())
    }

    /// Two title rows, labels on row 2, three data rows.
    fn sample_range() -> Range<Data> {
        let mut range = Range::new((0, 0), (5, 3));
        range.set_value((0, 0), s("Quarterly report"));
        range.set_value((1, 0), s("generated"));
        for (j, label) in ["Name", "Qty", "Price", "Name"].iter().enumerate() {
            range.set_value((2, j as u32), s(label));
        }
        let rows = [
            [s("Widget"), Data::Float(3.0), Data::Float(1.25), s("x")],
            [s("Gadget"), Data::Empty, Data::Int(2), s("y")],
            [Data::Empty, Data::Int(5), Data::Float(0.5), Data::Empty],
        ];
        for (i, row) in rows.into_iter().enumerate() {
            for (j, cell) in row.into_iter().enumerate() {
                range.set_value((3 + i as u32, j as u32), cell);
            }
        }
        range
    }

    #[test]
    fn header_offset_and_types() -> Result<()> {
        let batch = range_to_batch(&sample_range(), 2)?;
        assert_eq!(batch.num_rows(), 3);

        let schema = batch.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["Name", "Qty", "Price", "Name.1"]);
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);
        assert_eq!(schema.field(2).data_type(), &DataType::Float64);

        let qty = batch.column(1).as_primitive::<Int64Type>();
        assert_eq!(qty.value(0), 3);
        assert!(qty.is_null(1));
        let price = batch.column(2).as_primitive::<Float64Type>();
        assert_eq!(price.value(1), 2.0);
        assert!(batch.column(0).is_null(2));
        Ok(())
    }

    #[test]
    fn header_past_end_is_an_error() {
        let err = range_to_batch(&sample_range(), 9).unwrap_err();
        assert!(err.to_string().contains("header row 9"));
    }

    #[test]
    fn header_above_populated_range_is_unnamed() -> Result<()> {
        let mut range = Range::new((4, 0), (5, 1));
        range.set_value((4, 0), Data::Int(1));
        range.set_value((4, 1), s("a"));
        range.set_value((5, 0), Data::Int(2));
        range.set_value((5, 1), s("b"));

        let batch = range_to_batch(&range, 2)?;
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(0).name(), "Unnamed: 0");
        assert_eq!(batch.schema().field(1).name(), "Unnamed: 1");
        Ok(())
    }

    #[test]
    fn builders_produce_the_expected_arrow_types() {
        for (kind, expected) in [
            (ColumnKind::Integer, DataType::Int64),
            (ColumnKind::Float, DataType::Float64),
            (ColumnKind::Boolean, DataType::Boolean),
            (
                ColumnKind::Timestamp,
                DataType::Timestamp(TimeUnit::Microsecond, None),
            ),
            (ColumnKind::Text, DataType::Utf8),
        ] {
            assert_eq!(build_column(kind, &[]).data_type(), &expected);
        }
    }

    #[test]
    fn blank_leading_columns_are_kept() -> Result<()> {
        // populated cells start in column C
        let mut range = Range::new((2, 2), (4, 3));
        range.set_value((2, 2), s("A"));
        range.set_value((2, 3), s("B"));
        range.set_value((3, 2), Data::Int(1));
        range.set_value((3, 3), s("x"));
        range.set_value((4, 2), Data::Int(2));
        range.set_value((4, 3), s("y"));

        let batch = range_to_batch(&range, 2)?;
        let schema = batch.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["Unnamed: 0", "Unnamed: 1", "A", "B"]);
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(schema.field(0).data_type(), &DataType::Float64);
        assert_eq!(batch.column(0).null_count(), 2);
        assert_eq!(batch.column(2).as_primitive::<Int64Type>().value(1), 2);
        Ok(())
    }

    #[test]
    fn reads_xlsx_bytes() -> Result<()> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "title")?;
        sheet.write_string(2, 0, "Código")?;
        sheet.write_string(2, 1, "Amount")?;
        sheet.write_string(3, 0, "A-1")?;
        sheet.write_number(3, 1, 10)?;
        sheet.write_string(4, 0, "B-2")?;
        sheet.write_number(4, 1, 20.5)?;
        let bytes = workbook.save_to_buffer()?;

        let batch = read_workbook(bytes, &SheetOptions::default())?;
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(0).name(), "Código");
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Float64);
        let codes = batch.column(0).as_string::<i32>();
        assert_eq!(codes.value(1), "B-2");
        Ok(())
    }

    #[test]
    fn unknown_sheet_is_an_error() -> Result<()> {
        let mut workbook = Workbook::new();
        workbook.add_worksheet().write_string(0, 0, "x")?;
        let bytes = workbook.save_to_buffer()?;
        let opts = SheetOptions {
            sheet: Some("Missing".into()),
            header_row: 0,
        };
        assert!(read_workbook(bytes, &opts).is_err());
        Ok(())
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(read_workbook(b"not a workbook".to_vec(), &SheetOptions::default()).is_err());
    }
}
