use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use crate::data_type::DataType;

///
/// A single coerced field value - the typed form of one cell in a source file.
///
/// Values are produced by the row validator and consumed by the staging
/// writer. The SQL layer binds every value as its canonical string form, so
/// the string renderings here are the wire format.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Date(NaiveDate),
    Datetime(DateTime<Utc>),
    Decimal(Decimal),
    Integer(i64),
    String(String),
    Null,
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Boolean(_)  => Some(DataType::Boolean),
            Value::Date(_)     => Some(DataType::Date),
            Value::Datetime(_) => Some(DataType::Datetime),
            Value::Decimal(_)  => Some(DataType::Decimal),
            Value::Integer(_)  => Some(DataType::Integer),
            Value::String(_)   => Some(DataType::String),
            Value::Null        => None,
        }
    }

    ///
    /// The canonical string rendering bound into SQL statements.
    ///
    /// Datetimes are rendered in UTC without a zone suffix so the same literal
    /// is accepted by every supported dialect.
    ///
    pub fn to_sql_string(&self) -> Option<String> {
        match self {
            Value::Boolean(b)   => Some(match b { true => "1".into(), false => "0".into() }),
            Value::Date(d)      => Some(d.format("%Y-%m-%d").to_string()),
            Value::Datetime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            Value::Decimal(d)   => Some(d.to_string()),
            Value::Integer(i)   => Some(i.to_string()),
            Value::String(s)    => Some(s.clone()),
            Value::Null         => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sql_renderings_are_dialect_neutral() {
        let dt = Utc.with_ymd_and_hms(2021, 12, 29, 3, 39, 0).unwrap();
        assert_eq!(Some("2021-12-29 03:39:00.000000".into()), Value::Datetime(dt).to_sql_string());
        assert_eq!(Some("2021-12-29".into()), Value::Date(NaiveDate::from_ymd_opt(2021, 12, 29).unwrap()).to_sql_string());
        assert_eq!(Some("1".into()), Value::Boolean(true).to_sql_string());
        assert_eq!(Some("0".into()), Value::Boolean(false).to_sql_string());
        assert_eq!(None, Value::Null.to_sql_string());
    }
}
