//! Canonical Transaction Record
//!
//! Defines the ten-field record moved through the bus and validates arbitrary
//! input rows (CSV rows, mapped chain transactions) into it.
//! Every field stays a string end to end so numeric values never lose precision.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// An unvalidated input row: field name to arbitrary JSON value
pub type RawRow = Map<String, Value>;

/// Address pattern shared by the validator and the query API
static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("static address pattern"));

/// Naive timestamp layouts accepted besides RFC 3339
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Expected shape of a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// ISO-8601 date-time
    Timestamp,
    /// Any non-empty text
    Text,
    /// Unsigned decimal integer of arbitrary size
    Decimal,
    /// `0x` followed by 40 hex digits
    Address,
}

/// The ten canonical fields in declaration order
pub const FIELD_SHAPES: [(&str, FieldShape); 10] = [
    ("timestamp", FieldShape::Timestamp),
    ("status", FieldShape::Text),
    ("block_number", FieldShape::Decimal),
    ("tx_index", FieldShape::Decimal),
    ("from", FieldShape::Address),
    ("to", FieldShape::Address),
    ("value", FieldShape::Decimal),
    ("gas_limit", FieldShape::Decimal),
    ("gas_used", FieldShape::Decimal),
    ("gas_price", FieldShape::Decimal),
];

/// Why a single field was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    Missing,
    NotText(&'static str),
    Empty,
    NotTimestamp,
    NotDecimal,
    NotAddress,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Missing => write!(f, "missing"),
            Problem::NotText(kind) => write!(f, "expected text, got {}", kind),
            Problem::Empty => write!(f, "empty"),
            Problem::NotTimestamp => write!(f, "not an ISO-8601 timestamp"),
            Problem::NotDecimal => write!(f, "not a decimal integer"),
            Problem::NotAddress => write!(f, "not a 0x-prefixed 40 hex digit address"),
        }
    }
}

/// A rejected field and the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub problem: Problem,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// A row that could not be turned into a record. Lists every failing field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid record ({})", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    /// Names of the fields that failed
    pub fn fields(&self) -> Vec<&'static str> {
        self.issues.iter().map(|i| i.field).collect()
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Canonical transaction record
///
/// This is the JSON payload written to the bus, one per message.
/// Immutable once built by [`validate_row`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Creation or observation time, ISO-8601
    pub timestamp: String,
    /// Free-form success/failure marker
    pub status: String,
    /// Block height as decimal string
    pub block_number: String,
    /// Position within the block as decimal string
    pub tx_index: String,
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Transferred value in wei as decimal string
    pub value: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub gas_price: String,
}

impl TransactionRecord {
    /// Serialize the record to its bus payload
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a bus payload
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Validate an arbitrary row into a [`TransactionRecord`]
///
/// All ten fields are required. Strings are taken as-is, JSON numbers are
/// converted to their string representation, anything else is rejected.
/// Unknown extra fields are ignored. A row with any failing field is rejected
/// as a whole; nothing is defaulted.
pub fn validate_row(row: &RawRow) -> Result<TransactionRecord, ValidationError> {
    let mut issues = Vec::new();
    let mut values = Vec::with_capacity(FIELD_SHAPES.len());

    for (field, shape) in FIELD_SHAPES {
        match check_field(row.get(field), shape) {
            Ok(value) => values.push(value),
            Err(problem) => {
                issues.push(FieldIssue { field, problem });
                values.push(String::new());
            }
        }
    }

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }

    // Struct fields are evaluated in written order, which matches FIELD_SHAPES.
    let mut values = values.into_iter();
    let mut next = || values.next().unwrap_or_default();
    Ok(TransactionRecord {
        timestamp: next(),
        status: next(),
        block_number: next(),
        tx_index: next(),
        from: next(),
        to: next(),
        value: next(),
        gas_limit: next(),
        gas_used: next(),
        gas_price: next(),
    })
}

fn check_field(value: Option<&Value>, shape: FieldShape) -> Result<String, Problem> {
    let text = match value {
        None => return Err(Problem::Missing),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) => return Err(Problem::NotText("null")),
        Some(Value::Bool(_)) => return Err(Problem::NotText("boolean")),
        Some(Value::Array(_)) => return Err(Problem::NotText("array")),
        Some(Value::Object(_)) => return Err(Problem::NotText("object")),
    };

    if text.is_empty() {
        return Err(Problem::Empty);
    }

    let problem = match shape {
        FieldShape::Text => None,
        FieldShape::Timestamp => (!is_timestamp(&text)).then_some(Problem::NotTimestamp),
        FieldShape::Decimal => (!is_decimal(&text)).then_some(Problem::NotDecimal),
        FieldShape::Address => (!is_address(&text)).then_some(Problem::NotAddress),
    };

    match problem {
        Some(problem) => Err(problem),
        None => Ok(text),
    }
}

/// Check a string against `^0x[a-fA-F0-9]{40}$`
pub fn is_address(s: &str) -> bool {
    ADDRESS_PATTERN.is_match(s)
}

/// Check for a non-empty run of ASCII digits
pub fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Check for an RFC 3339 or naive ISO-8601 date-time
pub fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NAIVE_TIMESTAMP_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(s, fmt).is_ok())
}

/// Current time as an RFC 3339 UTC string with millisecond precision
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_row() -> RawRow {
        let value = json!({
            "timestamp": "2024-03-01 12:30:45",
            "status": "success",
            "block_number": "42000000",
            "tx_index": "3",
            "from": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
            "to": "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
            "value": "1000000000000000000000000",
            "gas_limit": "21000",
            "gas_used": "21000",
            "gas_price": "25000000000",
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    // ==================== validate_row tests ====================

    #[test]
    fn test_valid_row_produces_all_ten_fields() {
        let record = validate_row(&valid_row()).unwrap();
        let json: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 10);
        for (field, _) in FIELD_SHAPES {
            let v = obj.get(field).unwrap();
            assert!(v.as_str().is_some_and(|s| !s.is_empty()), "{} should be a non-empty string", field);
        }
    }

    #[test]
    fn test_large_value_keeps_full_precision() {
        let record = validate_row(&valid_row()).unwrap();
        assert_eq!(record.value, "1000000000000000000000000");
    }

    #[test]
    fn test_missing_field_rejects_whole_row() {
        let mut row = valid_row();
        row.remove("gas_used");

        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.fields(), vec!["gas_used"]);
        assert_eq!(err.issues[0].problem, Problem::Missing);
    }

    #[test]
    fn test_every_failing_field_is_reported() {
        let mut row = valid_row();
        row.remove("status");
        row.insert("to".into(), json!("0x1234"));
        row.insert("block_number".into(), json!("12a"));

        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.fields(), vec!["status", "block_number", "to"]);
    }

    #[test]
    fn test_numbers_are_converted_to_text() {
        let mut row = valid_row();
        row.insert("tx_index".into(), json!(7));

        let record = validate_row(&row).unwrap();
        assert_eq!(record.tx_index, "7");
    }

    #[test]
    fn test_non_text_values_are_rejected() {
        let mut row = valid_row();
        row.insert("status".into(), json!(true));
        row.insert("gas_price".into(), Value::Null);

        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.issues[0].problem, Problem::NotText("boolean"));
        assert_eq!(err.issues[1].problem, Problem::NotText("null"));
    }

    #[test]
    fn test_empty_string_is_rejected() {
        let mut row = valid_row();
        row.insert("status".into(), json!(""));

        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.issues[0].problem, Problem::Empty);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let mut row = valid_row();
        row.insert("hash".into(), json!("0xdeadbeef"));
        assert!(validate_row(&row).is_ok());
    }

    #[test]
    fn test_negative_decimal_is_rejected() {
        let mut row = valid_row();
        row.insert("value".into(), json!("-1"));

        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.issues[0].problem, Problem::NotDecimal);
    }

    #[test]
    fn test_error_message_names_fields() {
        let mut row = valid_row();
        row.remove("from");
        let err = validate_row(&row).unwrap_err();
        assert!(err.to_string().contains("from: missing"));
    }

    // ==================== shape helper tests ====================

    #[test]
    fn test_address_pattern() {
        assert!(is_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        assert!(is_address("0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD"));
        assert!(is_address("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd"));
        // wrong length
        assert!(!is_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb9226"));
        assert!(!is_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb922660"));
        // non-hex
        assert!(!is_address("0xg39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        // missing prefix
        assert!(!is_address("f39Fd6e51aad88F6F4ce6aB8827279cffFb9226612"));
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(is_timestamp("2024-03-01T12:30:45Z"));
        assert!(is_timestamp("2024-03-01T12:30:45.123+02:00"));
        assert!(is_timestamp("2024-03-01 12:30:45"));
        assert!(is_timestamp("2024-03-01 12:30:45.500"));
        assert!(!is_timestamp("yesterday"));
        assert!(!is_timestamp("1709296245"));
    }

    #[test]
    fn test_current_timestamp_is_valid() {
        assert!(is_timestamp(&current_timestamp()));
    }

    #[test]
    fn test_record_json_field_names() {
        let record = validate_row(&valid_row()).unwrap();
        let json = record.to_json().unwrap();
        assert!(json.contains("\"from\""));
        assert!(json.contains("\"to\""));
        assert!(json.contains("\"block_number\""));
        assert_eq!(TransactionRecord::from_json(&json).unwrap(), record);
    }
}
