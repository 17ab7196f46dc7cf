use serde::{Deserialize, Serialize};

///
/// Logical/business data-type for any given source column.
///
/// These are the semantic types a row-model field can declare. The engine maps
/// them onto dialect-specific SQL column types when tables are created.
///
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,  // yes/no/true/false/1/0 in source data.
    Date,     // Calendar date, no time component.
    Datetime, // Millisecond precision, normalised to UTC.
    Decimal,  // Arbitrary precision (rust-decimal).
    Integer,  // 8-byte (-2^63 <-> 2^63-1).
    String,   // UTF-8.
}

impl DataType {
    pub fn as_str(&self) -> &str {
        self.into()
    }
}

impl From<&DataType> for &str {
    fn from(dt: &DataType) -> Self {
        match dt {
            DataType::Boolean  => "boolean",
            DataType::Date     => "date",
            DataType::Datetime => "datetime",
            DataType::Decimal  => "decimal",
            DataType::Integer  => "integer",
            DataType::String   => "string",
        }
    }
}
