use serde::Deserialize;
use crate::{error::Error, model::{self, FieldDef}};

///
/// The file format a source's files arrive in. The reader factory checks the
/// extension of each matched file against this declaration.
///
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Delimited,
    Spreadsheet,
    Json,
}

impl SourceFormat {
    pub fn as_str(&self) -> &str {
        match self {
            SourceFormat::Delimited   => "delimited",
            SourceFormat::Spreadsheet => "spreadsheet",
            SourceFormat::Json        => "json",
        }
    }
}

///
/// A named source of files, bound to a row-model and a target table.
///
/// Loaded from the sources YAML file and immutable after the registry is
/// built.
///
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename = "Source")]
pub struct SourceConfig {
    name: String,
    pattern: String, // Glob, matched against file basenames.
    format: SourceFormat,
    table: String,
    grain: Vec<String>,
    schema: Vec<FieldDef>,

    audit: Option<String>, // SQL template with a {table} placeholder.

    #[serde(default)]
    error_threshold: f64, // Fraction of rows allowed to fail validation.

    // Reader options.
    delimiter: Option<String>,
    encoding: Option<String>,
    #[serde(default)]
    skip_rows: usize,
    sheet: Option<String>,
    json_path: Option<String>,

    notify: Option<Vec<String>>,
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn grain(&self) -> &[String] {
        &self.grain
    }

    pub fn schema(&self) -> &[FieldDef] {
        &self.schema
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.schema.iter().find(|f| f.name() == name)
    }

    pub fn audit(&self) -> Option<&str> {
        self.audit.as_deref()
    }

    pub fn error_threshold(&self) -> f64 {
        self.error_threshold
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter.as_deref().and_then(|d| d.bytes().next()).unwrap_or(b',')
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn skip_rows(&self) -> usize {
        self.skip_rows
    }

    pub fn sheet(&self) -> Option<&str> {
        self.sheet.as_deref()
    }

    pub fn json_path(&self) -> Option<&str> {
        self.json_path.as_deref()
    }

    pub fn notify(&self) -> &[String] {
        self.notify.as_deref().unwrap_or(&[])
    }

    ///
    /// The aliases of every required field - the set a file's header must
    /// cover before streaming is allowed to begin.
    ///
    pub fn required_columns(&self) -> Vec<&str> {
        self.schema.iter().filter(|f| f.required()).map(|f| f.source_column()).collect()
    }

    ///
    /// Structural invariants, checked once at registry build time.
    ///
    pub fn validate(&self) -> Result<(), Error> {
        if !model::is_legal_identifier(&self.table) {
            return Err(Error::SourcesValidationError {
                reason: format!("source {} target table {} is not a legal SQL identifier", self.name, self.table) })
        }

        if self.schema.is_empty() {
            return Err(Error::SourcesValidationError {
                reason: format!("source {} has an empty schema", self.name) })
        }

        for field in &self.schema {
            field.validate(&self.name)?;
        }

        if self.grain.is_empty() {
            return Err(Error::SourcesValidationError {
                reason: format!("source {} declares no grain", self.name) })
        }

        // Grain fields must exist in the row-model and must all be required.
        for grain in &self.grain {
            match self.field(grain) {
                Some(field) if field.required() => {},
                Some(_) => return Err(Error::SourcesValidationError {
                    reason: format!("source {} grain field {} must be required", self.name, grain) }),
                None => return Err(Error::SourcesValidationError {
                    reason: format!("source {} grain field {} is not in the schema", self.name, grain) }),
            }
        }

        if !(0.0..=1.0).contains(&self.error_threshold) {
            return Err(Error::SourcesValidationError {
                reason: format!("source {} error_threshold must be within 0..=1", self.name) })
        }

        if let Some(audit) = &self.audit {
            if !audit.contains("{table}") {
                return Err(Error::SourcesValidationError {
                    reason: format!("source {} audit query has no {{table}} placeholder", self.name) })
            }
        }

        glob::Pattern::new(&self.pattern).map_err(|err| Error::SourcesValidationError {
            reason: format!("source {} has an invalid file pattern: {}", self.name, err) })?;

        Ok(())
    }
}
