use serde::Deserialize;
use std::{io::BufReader, path::Path};
use crate::{error::Error, source::SourceConfig};

///
/// The process-wide set of source configurations.
///
/// Built once at start-up from the sources YAML file and read-only from then
/// on. Matching is by glob against a file's basename; when more than one
/// pattern matches, the pattern with the longest literal prefix wins.
///
#[derive(Debug)]
pub struct Registry {
    sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourcesFile {
    sources: Vec<SourceConfig>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let rdr = BufReader::new(std::fs::File::open(path)
            .map_err(|source| Error::SourcesFileNotFound { path: path.to_string_lossy().into(), source })?);

        let parsed: SourcesFile = serde_yaml::from_reader(rdr)
            .map_err(|source| Error::InvalidSources { path: path.to_string_lossy().into(), source })?;

        Registry::build(parsed.sources)
    }

    ///
    /// Validate every source and the cross-source invariants, then freeze.
    ///
    pub fn build(sources: Vec<SourceConfig>) -> Result<Self, Error> {
        if sources.is_empty() {
            return Err(Error::SourcesValidationError { reason: "no sources are defined".into() })
        }

        for source in &sources {
            source.validate()?;
        }

        // Duplicate names are always a mistake.
        for (idx, source) in sources.iter().enumerate() {
            if sources.iter().skip(idx + 1).any(|other| other.name() == source.name()) {
                return Err(Error::SourcesValidationError {
                    reason: format!("source name {} is defined more than once", source.name()) })
            }
        }

        // Matching is resolved by longest literal prefix - two patterns with the
        // same literal prefix could tie at match time, so reject them now.
        for (idx, source) in sources.iter().enumerate() {
            for other in sources.iter().skip(idx + 1) {
                if literal_prefix(source.pattern()) == literal_prefix(other.pattern()) {
                    return Err(Error::SourcesValidationError {
                        reason: format!("sources {} and {} have file patterns with the same literal prefix - matches cannot be resolved",
                            source.name(), other.name()) })
                }
            }
        }

        // Sources may share a target table only if their row-models agree.
        for (idx, source) in sources.iter().enumerate() {
            for other in sources.iter().skip(idx + 1).filter(|o| o.table() == source.table()) {
                if !compatible(source, other) {
                    return Err(Error::SourcesValidationError {
                        reason: format!("sources {} and {} declare target table {} with incompatible row-models",
                            source.name(), other.name(), source.table()) })
                }
            }
        }

        Ok(Self { sources })
    }

    ///
    /// Find the source whose pattern matches the file's basename.
    ///
    pub fn match_file(&self, filename: &str) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .filter(|source| {
                glob::Pattern::new(source.pattern())
                    .map(|pattern| pattern.matches(filename))
                    .unwrap_or(false) // Patterns were validated at build time.
            })
            .max_by_key(|source| literal_prefix(source.pattern()).len())
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }
}

///
/// The leading literal part of a glob pattern - everything before the first
/// wildcard character.
///
fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(|c| c == '*' || c == '?' || c == '[') {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

///
/// Two sources sharing a table must declare the same columns, types and grain.
///
fn compatible(a: &SourceConfig, b: &SourceConfig) -> bool {
    a.grain() == b.grain()
        && a.schema().len() == b.schema().len()
        && a.schema().iter().zip(b.schema().iter())
            .all(|(fa, fb)| fa.name() == fb.name() && fa.data_type() == fb.data_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(yaml: &str) -> SourceConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn invoices() -> SourceConfig {
        source(r#"
name: invoices
pattern: "invoices_*.csv"
format: delimited
table: invoices
grain: [invoice_ref]
schema:
  - { name: invoice_ref, data_type: string, required: true }
  - { name: amount, data_type: decimal }
"#)
    }

    fn payments() -> SourceConfig {
        source(r#"
name: payments
pattern: "payments_*.csv"
format: delimited
table: payments
grain: [payment_ref]
schema:
  - { name: payment_ref, data_type: string, required: true }
"#)
    }

    #[test]
    fn test_longest_literal_prefix_wins() {
        let registry = Registry::build(vec!(
            source(r#"
name: widgets
pattern: "widgets*"
format: delimited
table: widgets
grain: [id]
schema: [{ name: id, data_type: integer, required: true }]
"#),
            source(r#"
name: widgets_eu
pattern: "widgets_eu*"
format: delimited
table: widgets_eu
grain: [id]
schema: [{ name: id, data_type: integer, required: true }]
"#))).unwrap();

        assert_eq!("widgets_eu", registry.match_file("widgets_eu_20220101.csv").unwrap().name());
        assert_eq!("widgets", registry.match_file("widgets_20220101.csv").unwrap().name());
        assert!(registry.match_file("gadgets.csv").is_none());
    }

    #[test]
    fn test_equal_literal_prefixes_rejected() {
        let result = Registry::build(vec!(
            source(r#"
name: a
pattern: "data_*.csv"
format: delimited
table: a
grain: [id]
schema: [{ name: id, data_type: integer, required: true }]
"#),
            source(r#"
name: b
pattern: "data_*.json"
format: json
table: b
grain: [id]
schema: [{ name: id, data_type: integer, required: true }]
"#)));

        match result.unwrap_err() {
            Error::SourcesValidationError { reason } => assert!(reason.contains("literal prefix")),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_shared_table_requires_compatible_models() {
        let result = Registry::build(vec!(
            invoices(),
            source(r#"
name: invoices_legacy
pattern: "legacy_invoices_*.csv"
format: delimited
table: invoices
grain: [invoice_ref]
schema:
  - { name: invoice_ref, data_type: string, required: true }
  - { name: amount, data_type: string }
"#)));

        assert!(result.is_err());
    }

    #[test]
    fn test_distinct_tables_do_not_conflict() {
        assert!(Registry::build(vec!(invoices(), payments())).is_ok());
    }
}
