use anyhow::{Context, Result};
use deunicode::deunicode;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::arrow::{
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};

/// Lowercase ASCII form of a label: diacritics and other non-ASCII
/// characters are transliterated first.
pub fn normalize_label(label: &str) -> String {
    deunicode(label).to_lowercase()
}

/// Make labels unique by suffixing repeats with `.1`, `.2`, ... in
/// first-seen order. Already-unique input comes back unchanged.
pub fn disambiguate<I>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let labels: Vec<String> = labels.into_iter().collect();
    let mut taken: HashSet<String> = HashSet::with_capacity(labels.len());
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(labels.len());

    for label in labels {
        if taken.insert(label.clone()) {
            out.push(label);
            continue;
        }
        let n = next_suffix.entry(label.clone()).or_insert(1);
        let unique = loop {
            let candidate = format!("{}.{}", label, n);
            *n += 1;
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(unique.clone());
        out.push(unique);
    }
    out
}

/// Rewrite column labels to their normalized form. Cell values are untouched.
pub fn normalize_headers(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let labels = disambiguate(schema.fields().iter().map(|f| normalize_label(f.name())));
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .zip(labels)
        .map(|(f, name)| f.as_ref().clone().with_name(name))
        .collect();

    RecordBatch::try_new(Arc::new(Schema::new(fields)), batch.columns().to_vec())
        .context("renaming columns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::array::{ArrayRef, Int64Array};

    fn batch_with(names: &[&str]) -> RecordBatch {
        let fields: Vec<Field> = names
            .iter()
            .map(|n| Field::new(*n, crate::arrow::datatypes::DataType::Int64, true))
            .collect();
        let columns: Vec<ArrayRef> = names
            .iter()
            .map(|_| Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef)
            .collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
    }

    fn names(batch: &RecordBatch) -> Vec<String> {
        batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    #[test]
    fn lowercases_and_transliterates() {
        assert_eq!(normalize_label("Región Año"), "region ano");
        assert_eq!(normalize_label("ÇÃO"), "cao");
        assert_eq!(normalize_label("Straße"), "strasse");
        assert_eq!(normalize_label("2021"), "2021");
    }

    #[test]
    fn normalization_is_idempotent() -> Result<()> {
        let raw = batch_with(&["Região", "NAME", "name", "Unnamed: 3", "Número #"]);
        let once = normalize_headers(&raw)?;
        let twice = normalize_headers(&once)?;
        assert_eq!(names(&once), names(&twice));
        assert_eq!(
            names(&once),
            vec!["regiao", "name", "name.1", "unnamed: 3", "numero #"]
        );
        Ok(())
    }

    #[test]
    fn values_are_untouched() -> Result<()> {
        let raw = batch_with(&["A"]);
        let out = normalize_headers(&raw)?;
        assert_eq!(out.column(0), raw.column(0));
        Ok(())
    }

    #[test]
    fn disambiguate_skips_taken_suffixes() {
        let out = disambiguate(vec!["a.1".to_string(), "a".into(), "a".into(), "a".into()]);
        assert_eq!(out, vec!["a.1", "a", "a.2", "a.3"]);
    }
}
