use serde::Deserialize;
use rust_decimal::Decimal;
use crate::{data_type::DataType, error::Error};

///
/// One field in a source's row-model.
///
/// The name is the canonical field name used for the target table column. If
/// the source file labels the column differently, the alias holds the source
/// label and the validator renames it during coercion.
///
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    name: String,
    data_type: DataType,

    #[serde(default)]
    required: bool,

    alias: Option<String>,

    // Optional field-level constraints, enforced after coercion.
    min_length: Option<usize>,
    max_length: Option<usize>,
    min: Option<Decimal>,
    max: Option<Decimal>,
    one_of: Option<Vec<String>>,
    pattern: Option<String>,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn required(&self) -> bool {
        self.required
    }

    ///
    /// The column label expected in the source file - the alias if one is
    /// configured, otherwise the canonical name.
    ///
    pub fn source_column(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn min_length(&self) -> Option<usize> {
        self.min_length
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub fn min(&self) -> Option<Decimal> {
        self.min
    }

    pub fn max(&self) -> Option<Decimal> {
        self.max
    }

    pub fn one_of(&self) -> Option<&[String]> {
        self.one_of.as_deref()
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    ///
    /// Constraint sanity checks performed when the registry is built.
    ///
    pub fn validate(&self, source: &str) -> Result<(), Error> {
        if !is_legal_identifier(&self.name) {
            return Err(Error::SourcesValidationError {
                reason: format!("source {} field {} is not a legal SQL identifier", source, self.name) })
        }

        if let Some(pattern) = &self.pattern {
            regex::Regex::new(pattern).map_err(|err| Error::SourcesValidationError {
                reason: format!("source {} field {} has an invalid pattern: {}", source, self.name, err) })?;
        }

        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(Error::SourcesValidationError {
                    reason: format!("source {} field {} has min_length > max_length", source, self.name) })
            }
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::SourcesValidationError {
                    reason: format!("source {} field {} has min > max", source, self.name) })
            }
        }

        Ok(())
    }
}

///
/// True if the name can be used as an unquoted-safe SQL identifier in every
/// supported dialect.
///
pub fn is_legal_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
