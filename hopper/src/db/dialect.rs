use hopper_core::data_type::DataType;
use crate::error::HopperError;

///
/// The SQL dialect family behind the connection URL.
///
/// The engine builds every statement itself, so the differences that matter
/// are identifier quoting, placeholder syntax, type names, identifier length
/// limits and the upsert construct (see the merge module).
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self, HopperError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Ok(Dialect::MySql)
        } else if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            Err(HopperError::UnsupportedDatabaseUrl)
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql    => "mysql",
            Dialect::Sqlite   => "sqlite",
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", identifier),
            _ => format!("\"{}\"", identifier),
        }
    }

    ///
    /// A bind placeholder for the idx-th parameter (1-based).
    ///
    /// Every value is bound as text; Postgres resolves parameter types at
    /// prepare time so non-string columns get an explicit cast.
    ///
    pub fn placeholder(&self, idx: usize, data_type: Option<DataType>) -> String {
        match self {
            Dialect::Postgres => match data_type {
                Some(dt) if dt != DataType::String => format!("CAST(${} AS {})", idx, self.sql_type(dt)),
                _ => format!("${}", idx),
            },
            _ => "?".to_string(),
        }
    }

    pub fn sql_type(&self, data_type: DataType) -> &str {
        match (self, data_type) {
            (_, DataType::Boolean)                 => "BOOLEAN",
            (_, DataType::Date)                    => "DATE",
            (Dialect::Postgres, DataType::Datetime) => "TIMESTAMP",
            (Dialect::MySql, DataType::Datetime)    => "DATETIME(6)",
            (Dialect::Sqlite, DataType::Datetime)   => "DATETIME",
            (Dialect::Postgres, DataType::Decimal)  => "NUMERIC",
            (Dialect::MySql, DataType::Decimal)     => "DECIMAL(38, 12)",
            (Dialect::Sqlite, DataType::Decimal)    => "NUMERIC",
            (_, DataType::Integer)                 => "BIGINT",
            (Dialect::MySql, DataType::String)      => "VARCHAR(255)", // TEXT cannot be indexed without a prefix length.
            (_, DataType::String)                  => "TEXT",
        }
    }

    pub fn max_identifier_len(&self) -> usize {
        match self {
            Dialect::Postgres => 63,
            Dialect::MySql    => 64,
            Dialect::Sqlite   => 128,
        }
    }

    ///
    /// Ceiling on bind parameters in one statement - batched inserts are
    /// chunked to stay under it.
    ///
    pub fn max_bind_params(&self) -> usize {
        match self {
            Dialect::Postgres => 65_000,
            Dialect::MySql    => 65_000,
            Dialect::Sqlite   => 32_000,
        }
    }
}
