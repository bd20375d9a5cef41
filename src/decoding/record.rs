//! Parsing of one logical CSV line into a [`ShipmentRecord`].
//!
//! The expected column order is fixed:
//! `tracking_number, origin, destination, weight_kg, length_cm, width_cm,
//! height_cm, ship_date, status`. Dimension columns may be absent or empty
//! and default to zero; missing trailing columns leave `ship_date`/`status`
//! empty for the validator to reject.

use snafu::Snafu;

use crate::model::ShipmentRecord;

/// Minimum number of columns for a structurally valid row.
pub const MIN_COLUMNS: usize = 7;

/// Column names in file order, shared with the CSV export rendering.
pub const COLUMNS: [&str; 9] = [
    "tracking_number",
    "origin",
    "destination",
    "weight_kg",
    "length_cm",
    "width_cm",
    "height_cm",
    "ship_date",
    "status",
];

/// Structural failures of a single row. These are recorded against the row
/// and never abort the stream.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum RecordError {
    #[snafu(display("row has {found} columns, expected at least {MIN_COLUMNS}"))]
    TooFewColumns { found: usize },
    #[snafu(display("column {column} holds non-numeric value {value:?}"))]
    InvalidNumber {
        column: &'static str,
        value: String,
    },
    #[snafu(display("quote character outside a quoted field"))]
    UnexpectedQuote,
}

impl RecordError {
    /// Constraint text recorded in the error document for this failure.
    pub fn expected(&self) -> &'static str {
        match self {
            RecordError::TooFewColumns { .. } => "at least 7 columns",
            RecordError::InvalidNumber { .. } => "numeric value",
            RecordError::UnexpectedQuote => "RFC 4180 quoting",
        }
    }
}

/// Parses a complete logical line into a record.
///
/// The line must already be terminator-free (the framer strips `\n` and a
/// preceding `\r`). Fields are split on unquoted commas, doubled quotes are
/// unescaped, and surrounding ASCII whitespace is trimmed.
pub fn parse_record(
    line: &[u8],
    row_number: u32,
    batch_id: &str,
) -> Result<ShipmentRecord, RecordError> {
    let fields = split_fields(line)?;
    if fields.len() < MIN_COLUMNS {
        return Err(RecordError::TooFewColumns {
            found: fields.len(),
        });
    }

    let field = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");

    Ok(ShipmentRecord {
        tracking_number: field(0).to_owned(),
        origin: field(1).to_owned(),
        destination: field(2).to_owned(),
        weight_kg: parse_number(field(3), COLUMNS[3], false)?,
        length_cm: parse_number(field(4), COLUMNS[4], true)?,
        width_cm: parse_number(field(5), COLUMNS[5], true)?,
        height_cm: parse_number(field(6), COLUMNS[6], true)?,
        ship_date: field(7).to_owned(),
        status: field(8).to_owned(),
        row_number,
        batch_id: batch_id.to_owned(),
    })
}

/// Numeric column parser. Dimension columns treat an empty field like an
/// absent one (zero); the weight column does not.
fn parse_number(
    raw: &str,
    column: &'static str,
    empty_is_zero: bool,
) -> Result<f64, RecordError> {
    if raw.is_empty() && empty_is_zero {
        return Ok(0.0);
    }
    raw.parse().map_err(|_| RecordError::InvalidNumber {
        column,
        value: raw.to_owned(),
    })
}

/// Splits on unquoted commas, unescaping doubled quotes and trimming ASCII
/// whitespace around each field.
fn split_fields(line: &[u8]) -> Result<Vec<String>, RecordError> {
    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut pos = 0;
    let mut field_start = true;
    let mut in_quotes = false;

    while pos < line.len() {
        let byte = line[pos];

        if in_quotes {
            if byte == b'"' {
                if line.get(pos + 1) == Some(&b'"') {
                    current.push(b'"');
                    pos += 2;
                } else {
                    in_quotes = false;
                    pos += 1;
                }
            } else {
                current.push(byte);
                pos += 1;
            }
            continue;
        }

        match byte {
            b',' => {
                fields.push(finish_field(std::mem::take(&mut current)));
                field_start = true;
                pos += 1;
            }
            b'"' if field_start => {
                in_quotes = true;
                field_start = false;
                pos += 1;
            }
            b'"' => return Err(RecordError::UnexpectedQuote),
            _ => {
                if !byte.is_ascii_whitespace() {
                    field_start = false;
                }
                current.push(byte);
                pos += 1;
            }
        }
    }
    fields.push(finish_field(current));

    Ok(fields)
}

fn finish_field(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).trim().to_owned()
}
