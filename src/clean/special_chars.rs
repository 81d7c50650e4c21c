use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::arrow::{
    array::{ArrayRef, AsArray, LargeStringArray, StringArray},
    datatypes::DataType,
    record_batch::RecordBatch,
};

/// Characters removed from every textual cell.
pub const SPECIAL_CHARS: &[&str] = &["\"", "*", "/", "(", ")", ":", "\n", "#", "$", " ", "\t"];

static SPECIAL_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = SPECIAL_CHARS
        .iter()
        .map(|c| regex::escape(c))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&alternation).expect("escaped literals always form a valid pattern")
});

pub fn strip_value(value: &str) -> String {
    SPECIAL_RE.replace_all(value, "").into_owned()
}

/// Strip [`SPECIAL_CHARS`] from every string column. Numeric, boolean and
/// temporal columns pass through as-is; nulls stay null.
pub fn strip_special_chars(batch: &RecordBatch) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|col| match col.data_type() {
            DataType::Utf8 => {
                let stripped: StringArray = col
                    .as_string::<i32>()
                    .iter()
                    .map(|v| v.map(strip_value))
                    .collect();
                Arc::new(stripped) as ArrayRef
            }
            DataType::LargeUtf8 => {
                let stripped: LargeStringArray = col
                    .as_string::<i64>()
                    .iter()
                    .map(|v| v.map(strip_value))
                    .collect();
                Arc::new(stripped) as ArrayRef
            }
            _ => col.clone(),
        })
        .collect();

    RecordBatch::try_new(batch.schema(), columns).context("stripping special characters")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::array::{Array, Float64Array, Int64Array};
    use crate::arrow::datatypes::{Field, Schema};

    #[test]
    fn removes_every_special_character() {
        let raw = "\"Acme* Corp/ (EU):\n#1 $5\tnet\"";
        assert_eq!(strip_value(raw), "AcmeCorpEU15net");
        for c in SPECIAL_CHARS {
            assert!(!strip_value(&format!("a{}b", c)).contains(c));
        }
    }

    #[test]
    fn keeps_other_punctuation() {
        assert_eq!(strip_value("a-b_c.d,e;f"), "a-b_c.d,e;f");
    }

    #[test]
    fn numeric_columns_are_untouched() -> Result<()> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("qty", DataType::Int64, true),
            Field::new("price", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("a b"), None, Some("(x)")])),
                Arc::new(Int64Array::from(vec![1, -2, 3])),
                Arc::new(Float64Array::from(vec![1.5, 2.5, -0.25])),
            ],
        )?;

        let out = strip_special_chars(&batch)?;
        let names = out.column(0).as_string::<i32>();
        assert_eq!(names.value(0), "ab");
        assert!(names.is_null(1));
        assert_eq!(names.value(2), "x");
        assert_eq!(out.column(1), batch.column(1));
        assert_eq!(out.column(2), batch.column(2));
        Ok(())
    }
}
