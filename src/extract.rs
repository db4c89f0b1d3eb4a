//! Row extraction.
//!
//! Converts the raw rows returned by a [`Store`](crate::Store) into
//! [`MetricValue`]s. Field 0 of every row is the numeric value; the remaining
//! fields are label values in positional order.

use thiserror::Error;

/// A raw result row: every column rendered as a string.
pub type RawRow = Vec<String>;

/// A numeric value with its positional label values.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Parsed from field 0 of the source row.
    pub value: f64,
    /// Fields 1..n of the source row, verbatim.
    pub labels: Vec<String>,
}

impl MetricValue {
    /// Create a metric value.
    pub fn new(value: f64, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            value,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Label values as string slices, in the order the sink expects them.
    pub fn label_refs(&self) -> Vec<&str> {
        self.labels.iter().map(String::as_str).collect()
    }
}

/// A row could not be turned into a [`MetricValue`].
#[derive(Debug, Error)]
pub enum ValueParseError {
    /// The row has no fields at all.
    #[error("row {row} has no fields")]
    EmptyRow { row: usize },

    /// Field 0 is not a 64-bit float.
    #[error("row {row} field 0 '{field}' is not a number: {source}")]
    NotNumeric {
        row: usize,
        field: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// Convert a batch of rows into metric values.
///
/// Output order matches input order. The first row that fails to parse aborts
/// the whole batch: no values are returned for any row. Labels are not checked
/// against any declared label names.
pub fn eval(rows: Vec<RawRow>) -> Result<Vec<MetricValue>, ValueParseError> {
    rows.into_iter()
        .enumerate()
        .map(|(row, fields)| {
            let mut fields = fields.into_iter();
            let field = fields.next().ok_or(ValueParseError::EmptyRow { row })?;
            let value = field
                .parse::<f64>()
                .map_err(|source| ValueParseError::NotNumeric {
                    row,
                    field: field.clone(),
                    source,
                })?;
            Ok(MetricValue {
                value,
                labels: fields.collect(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<RawRow> {
        data.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_eval_rows_with_labels() {
        let values = eval(rows(&[&["3024", "foo", "1h"], &["534", "bar", "1h"]])).unwrap();
        assert_eq!(
            values,
            vec![
                MetricValue::new(3024.0, ["foo", "1h"]),
                MetricValue::new(534.0, ["bar", "1h"]),
            ]
        );
    }

    #[test]
    fn test_eval_preserves_order_and_drops_value_field() {
        let input = rows(&[
            &["3024", "foo", "1h"],
            &["534", "bar", "1h"],
            &["1521", "foo", "30m"],
            &["231.5", "bar", "30m"],
        ]);
        let values = eval(input.clone()).unwrap();

        assert_eq!(values.len(), input.len());
        for (value, row) in values.iter().zip(&input) {
            assert_eq!(value.value, row[0].parse::<f64>().unwrap());
            assert_eq!(value.labels.as_slice(), &row[1..]);
        }
    }

    #[test]
    fn test_eval_value_only_row() {
        let values = eval(rows(&[&["-1.5e3"]])).unwrap();
        assert_eq!(values, vec![MetricValue::new(-1500.0, Vec::<String>::new())]);
    }

    #[test]
    fn test_eval_empty_input() {
        assert!(eval(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_eval_non_numeric_fails_whole_batch() {
        let err = eval(rows(&[&["n/a", "foo"]])).unwrap_err();
        match err {
            ValueParseError::NotNumeric { row, field, .. } => {
                assert_eq!(row, 0);
                assert_eq!(field, "n/a");
            }
            other => panic!("expected NotNumeric, got {other:?}"),
        }

        // A bad row late in the batch still discards the good rows before it.
        let err = eval(rows(&[&["1", "a"], &["2", "b"], &["x", "c"]])).unwrap_err();
        assert!(matches!(err, ValueParseError::NotNumeric { row: 2, .. }));
    }

    #[test]
    fn test_eval_empty_row() {
        let err = eval(vec![vec!["1".to_string()], Vec::new()]).unwrap_err();
        assert!(matches!(err, ValueParseError::EmptyRow { row: 1 }));
        assert_eq!(err.to_string(), "row 1 has no fields");
    }

    #[test]
    fn test_eval_rejects_padded_number() {
        assert!(eval(rows(&[&[" 42"]])).is_err());
    }
}
