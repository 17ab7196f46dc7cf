use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use hopper_core::{data_type::DataType, model::FieldDef, source::SourceConfig, value::Value};
use crate::readers::{RawRecord, RowDefect};

const BOOLEAN_TRUES: [&str; 4] = [ "yes", "true", "1", "y" ];
const BOOLEAN_FALSES: [&str; 4] = [ "no", "false", "0", "n" ];

lazy_static! {
    static ref DATETIME_FORMATS: Vec<&'static str> = vec!(
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f");
}

///
/// One validation failure for one field of one record.
///
/// Column names are the source-file labels (aliases), not canonical names,
/// so the report reads like the file the supplier sent.
///
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowError {
    pub column_name: String,
    pub column_value: String,
    pub error_type: String,
    pub error_msg: String,
}

impl RowError {
    fn new(column_name: &str, column_value: &str, error_type: &str, error_msg: String) -> Self {
        Self {
            column_name: column_name.to_string(),
            column_value: column_value.to_string(),
            error_type: error_type.to_string(),
            error_msg: error_msg.to_lowercase(),
        }
    }
}

struct CompiledField {
    def: FieldDef,
    pattern: Option<Regex>,
}

///
/// Validates raw records against one source's row-model.
///
/// Pure and stateless once built: renames aliases to canonical names, drops
/// unknown fields, coerces values to their declared types and enforces the
/// field constraints. This is the only place user constraints are enforced.
///
pub struct Validator {
    fields: Vec<CompiledField>,
}

impl Validator {
    pub fn new(source: &SourceConfig) -> Self {
        let fields = source.schema()
            .iter()
            .cloned()
            .map(|def| CompiledField {
                // Patterns were proven valid when the registry was built.
                pattern: def.pattern().and_then(|pattern| Regex::new(pattern).ok()),
                def,
            })
            .collect();

        Self { fields }
    }

    ///
    /// Either a fully-typed record (values in schema order) or the ordered
    /// list of everything wrong with the row.
    ///
    pub fn validate(&self, raw: &RawRecord) -> Result<Vec<Value>, Vec<RowError>> {
        let mut errors = vec!();

        for defect in &raw.defects {
            match defect {
                RowDefect::Surplus { count } => errors.push(RowError::new("", "", "surplus_columns",
                    format!("row has {} more fields than the header", count))),
                RowDefect::Malformed { detail } => errors.push(RowError::new("", "", "malformed_row", detail.clone())),
            }
        }

        let mut values = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            let def = &field.def;
            let column = def.source_column();
            let text = raw.fields.get(column).map(|value| value.as_str());

            // An empty cell is an empty string for string columns but counts
            // as missing for every other type.
            let present = match def.data_type() {
                DataType::String => text.is_some(),
                _ => text.map(|value| !value.trim().is_empty()).unwrap_or(false),
            };

            if !present {
                if def.required() {
                    errors.push(RowError::new(column, text.unwrap_or(""), "missing_required",
                        format!("required column {} has no value", column)));
                }
                values.push(Value::Null);
                continue
            }

            let text = text.expect("presence was just checked");

            match coerce(def.data_type(), text) {
                Ok(value) => {
                    if let Some(error) = check_constraints(field, &value, text) {
                        errors.push(error);
                    }
                    values.push(value);
                },
                Err((error_type, message)) => {
                    errors.push(RowError::new(column, text, error_type, message));
                    values.push(Value::Null);
                },
            }
        }

        match errors.is_empty() {
            true  => Ok(values),
            false => Err(errors),
        }
    }
}

fn coerce(data_type: DataType, text: &str) -> Result<Value, (&'static str, String)> {
    let trimmed = text.trim();

    match data_type {
        DataType::Boolean => {
            let lower = trimmed.to_lowercase();
            if BOOLEAN_TRUES.contains(&lower.as_str()) {
                Ok(Value::Boolean(true))
            } else if BOOLEAN_FALSES.contains(&lower.as_str()) {
                Ok(Value::Boolean(false))
            } else {
                Err(("bool_parsing", format!("'{}' is not a recognised boolean", trimmed)))
            }
        },

        DataType::Integer => trimmed.parse::<i64>()
            .map(Value::Integer)
            .map_err(|err| ("int_parsing", err.to_string())),

        DataType::Decimal => Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(Value::Decimal)
            .map_err(|err| ("decimal_parsing", err.to_string())),

        DataType::Date => parse_date(trimmed)
            .map(Value::Date)
            .ok_or(("date_parsing", format!("'{}' is not a recognised date", trimmed))),

        DataType::Datetime => parse_datetime(trimmed)
            .map(Value::Datetime)
            .ok_or(("datetime_parsing", format!("'{}' is not a recognised datetime", trimmed))),

        DataType::String => Ok(Value::String(text.to_string())),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date)
    }

    // Spreadsheet cells render dates as midnight datetimes.
    parse_datetime(text).map(|datetime| datetime.date_naive())
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.with_timezone(&Utc))
    }

    for format in DATETIME_FORMATS.iter() {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive))
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn check_constraints(field: &CompiledField, value: &Value, text: &str) -> Option<RowError> {
    let def = &field.def;
    let column = def.source_column();

    if let Value::String(s) = value {
        if let Some(min) = def.min_length() {
            if s.chars().count() < min {
                return Some(RowError::new(column, text, "too_short",
                    format!("value is shorter than the minimum length of {}", min)))
            }
        }

        if let Some(max) = def.max_length() {
            if s.chars().count() > max {
                return Some(RowError::new(column, text, "too_long",
                    format!("value is longer than the maximum length of {}", max)))
            }
        }
    }

    let numeric = match value {
        Value::Integer(i) => Some(Decimal::from(*i)),
        Value::Decimal(d) => Some(*d),
        _ => None,
    };

    if let Some(numeric) = numeric {
        if let Some(min) = def.min() {
            if numeric < min {
                return Some(RowError::new(column, text, "out_of_range",
                    format!("value is below the minimum of {}", min)))
            }
        }

        if let Some(max) = def.max() {
            if numeric > max {
                return Some(RowError::new(column, text, "out_of_range",
                    format!("value is above the maximum of {}", max)))
            }
        }
    }

    if let Some(one_of) = def.one_of() {
        if !one_of.iter().any(|allowed| allowed == text.trim()) {
            return Some(RowError::new(column, text, "not_in_enum",
                format!("value is not one of: {}", one_of.join(", "))))
        }
    }

    if let Some(pattern) = &field.pattern {
        if !pattern.is_match(text) {
            return Some(RowError::new(column, text, "pattern_mismatch",
                format!("value does not match the pattern {}", pattern.as_str())))
        }
    }

    None
}
