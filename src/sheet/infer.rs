use calamine::Data;
use chrono::{NaiveDate, NaiveDateTime};

/// Largest magnitude at which every integer is still exactly representable as f64.
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// Column type inferred from a sheet column's non-empty cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
}

/// Decide the column type for a run of cells.
///
/// - only integers (or integral floats) → Integer
/// - any non-integral number mixed with numbers → Float
/// - only booleans → Boolean
/// - only datetimes → Timestamp
/// - nothing but empty cells → Float (an all-null numeric column)
/// - anything mixed → Text
pub fn infer_kind<'a, I>(cells: I) -> ColumnKind
where
    I: IntoIterator<Item = &'a Data>,
{
    let (mut ints, mut floats, mut bools, mut dates, mut seen) = (0usize, 0usize, 0usize, 0usize, 0usize);

    for cell in cells {
        match cell {
            Data::Empty | Data::Error(_) => continue,
            Data::Int(_) => ints += 1,
            Data::Float(f) if is_integral(*f) => ints += 1,
            Data::Float(_) => floats += 1,
            Data::Bool(_) => bools += 1,
            Data::DateTime(_) | Data::DateTimeIso(_) if cell_datetime(cell).is_some() => dates += 1,
            _ => {}
        }
        seen += 1;
    }

    if seen == 0 {
        ColumnKind::Float
    } else if ints + floats == seen {
        if floats == 0 {
            ColumnKind::Integer
        } else {
            ColumnKind::Float
        }
    } else if bools == seen {
        ColumnKind::Boolean
    } else if dates == seen {
        ColumnKind::Timestamp
    } else {
        ColumnKind::Text
    }
}

fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_EXACT_F64_INT
}

/// Datetime value of a cell, if it holds one.
pub fn cell_datetime(cell: &Data) -> Option<NaiveDateTime> {
    match cell {
        Data::DateTime(dt) => dt.as_datetime(),
        Data::DateTimeIso(s) => parse_iso(s),
        _ => None,
    }
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Text rendering of a cell; `None` for empty and error cells.
pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(true) => Some("True".into()),
        Data::Bool(false) => Some("False".into()),
        Data::DateTime(dt) => Some(match dt.as_datetime() {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string(),
        }),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

/// Column label for a header cell at position `idx`.
pub fn header_label(cell: &Data, idx: usize) -> String {
    match cell_text(cell) {
        Some(text) if !text.trim().is_empty() => text,
        _ => format!("Unnamed: {}", idx),
    }
}
