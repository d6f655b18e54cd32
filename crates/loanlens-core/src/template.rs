//! # Template Module
//!
//! CSV in and out: the downloadable application template, a small
//! RFC 4180 reader for uploaded batches, and the predictions writer.

use crate::application::{Feature, LoanApplication, RawApplication, ValidationError};
use crate::predictor::Prediction;
use crate::{LoanLensError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Header of the predictions CSV.
pub const PREDICTIONS_HEADER: &str = "row,prediction,probability,confidence,error";

// =============================================================================
// TEMPLATES
// =============================================================================

/// Header row plus one sample application.
#[must_use]
pub fn csv_template() -> String {
    let sample = LoanApplication::sample();
    let header: Vec<&str> = Feature::ALL.iter().map(|f| f.name()).collect();
    let row: Vec<String> = Feature::ALL
        .iter()
        .map(|f| match sample.category(*f) {
            Some(label) => escape(label),
            None => sample.numeric(*f).unwrap_or_default().to_string(),
        })
        .collect();
    format!("{}\n{}\n", header.join(","), row.join(","))
}

/// Column list and sample application as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonTemplate {
    pub columns: Vec<&'static str>,
    pub sample_data: Map<String, Value>,
}

#[must_use]
pub fn json_template() -> JsonTemplate {
    let sample = LoanApplication::sample();
    let mut sample_data = Map::new();
    for feature in Feature::ALL {
        let value = match (sample.category(feature), sample.numeric(feature)) {
            (Some(label), _) => Value::from(label),
            (None, Some(n)) if feature.is_integer() => Value::from(n as i64),
            (None, Some(n)) => Value::from(n),
            (None, None) => Value::Null,
        };
        sample_data.insert(feature.name().to_string(), value);
    }
    JsonTemplate {
        columns: Feature::ALL.iter().map(|f| f.name()).collect(),
        sample_data,
    }
}

// =============================================================================
// CSV READER
// =============================================================================

/// A parsed CSV document: trimmed header plus data rows.
///
/// Rows keep whatever field count they had. A row whose width differs from
/// the header fails on its own in [`CsvTable::applications`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Source line each row starts on.
    pub lines: Vec<usize>,
}

impl CsvTable {
    /// Parse CSV text. Quoted fields may contain commas, newlines and
    /// doubled quotes. Blank lines are skipped. Column names are trimmed.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut records = read_records(text)?.into_iter();

        let headers: Vec<String> = records
            .next()
            .ok_or(LoanLensError::Csv {
                line: 1,
                message: "missing header row".to_string(),
            })?
            .1
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();

        let (lines, rows): (Vec<usize>, Vec<Vec<String>>) = records.unzip();
        Ok(Self {
            headers,
            rows,
            lines,
        })
    }

    /// Each row as a raw application, or the reason it could not be read.
    #[must_use]
    pub fn applications(&self) -> Vec<std::result::Result<RawApplication, ValidationError>> {
        self.rows
            .iter()
            .zip(&self.lines)
            .map(|(row, &line)| {
                if row.len() != self.headers.len() {
                    return Err(ValidationError::FieldCount {
                        line,
                        expected: self.headers.len(),
                        found: row.len(),
                    });
                }
                let record: Vec<(&str, &str)> = self
                    .headers
                    .iter()
                    .map(String::as_str)
                    .zip(row.iter().map(String::as_str))
                    .collect();
                RawApplication::from_record(&record)
            })
            .collect()
    }
}

/// Split text into `(starting line, fields)` records.
fn read_records(text: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                push_record(&mut records, record_line, std::mem::take(&mut fields));
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(LoanLensError::Csv {
            line: record_line,
            message: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        push_record(&mut records, record_line, fields);
    }
    Ok(records)
}

fn push_record(records: &mut Vec<(usize, Vec<String>)>, line: usize, fields: Vec<String>) {
    let blank = fields.iter().all(|f| f.trim().is_empty());
    if !blank {
        records.push((line, fields));
    }
}

// =============================================================================
// CSV WRITER
// =============================================================================

/// One output row per input row, numbered from 1. Failed rows carry
/// `Error`, probability 0 and the message.
#[must_use]
pub fn predictions_to_csv(results: &[std::result::Result<Prediction, String>]) -> String {
    let mut out = String::from(PREDICTIONS_HEADER);
    out.push('\n');
    for (index, result) in results.iter().enumerate() {
        let row = index + 1;
        let line = match result {
            Ok(p) => format!(
                "{row},{},{:.4},{},",
                escape(&p.label),
                p.probability,
                p.confidence
            ),
            Err(message) => format!("{row},Error,{:.4},,{}", 0.0, escape(message)),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Quote a field when it contains a delimiter, quote or newline.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trips_to_sample() {
        let table = CsvTable::parse(&csv_template()).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(table.headers.len(), 11);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][3], "8000000");

        let apps = table.applications();
        let app = apps[0]
            .as_ref()
            .map(|raw| raw.validate())
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(app, Ok(LoanApplication::sample()));
    }

    #[test]
    fn json_template_uses_integers_where_integral() {
        let template = json_template();
        assert_eq!(template.columns[0], "no_of_dependents");
        assert_eq!(template.sample_data["no_of_dependents"], Value::from(2));
        assert_eq!(template.sample_data["education"], Value::from("Graduate"));
        assert_eq!(template.sample_data["income_annum"], Value::from(8_000_000.0));
    }

    #[test]
    fn quoted_fields_and_blank_lines() {
        let text = "a, b ,c\r\n\r\n1,\"x, \"\"y\"\"\",\"multi\nline\"\n\n2,3,4";
        let table = CsvTable::parse(text).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(table.headers, vec!["a", "b", "c"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["1".to_string(), "x, \"y\"".to_string(), "multi\nline".to_string()],
                vec!["2".to_string(), "3".to_string(), "4".to_string()],
            ]
        );
    }

    #[test]
    fn ragged_row_fails_alone() {
        let mut text = csv_template();
        text.push_str("1,Graduate,No,100,100,5,700,0,0,0\n");
        text.push_str(csv_template().lines().nth(1).unwrap_or_default());
        let table = CsvTable::parse(&text).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(table.lines, vec![2, 3, 4]);

        let apps = table.applications();
        assert_eq!(apps.len(), 3);
        assert!(apps[0].is_ok());
        assert_eq!(
            apps[1],
            Err(ValidationError::FieldCount {
                line: 3,
                expected: 11,
                found: 10
            })
        );
        assert!(apps[2].is_ok());
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(CsvTable::parse("a\n\"open\n").is_err());
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(matches!(
            CsvTable::parse("\n\n"),
            Err(LoanLensError::Csv { line: 1, .. })
        ));
    }

    #[test]
    fn missing_columns_surface_per_row() {
        let table = CsvTable::parse("education,cibil_score\nGraduate,700\n")
            .unwrap_or_else(|e| unreachable!("{e}"));
        let apps = table.applications();
        assert!(matches!(
            &apps[0],
            Err(ValidationError::MissingFields(missing)) if missing.len() == 9
        ));
    }

    #[test]
    fn writer_formats_success_and_error_rows() {
        let ok = Prediction::from_probabilities(
            vec![0.25, 0.75],
            &["Approved".to_string(), "Rejected".to_string()],
        );
        let csv = predictions_to_csv(&[Ok(ok), Err("bad, row".to_string())]);
        assert_eq!(
            csv,
            "row,prediction,probability,confidence,error\n\
             1,Rejected,0.7500,Medium,\n\
             2,Error,0.0000,,\"bad, row\"\n"
        );
    }
}
