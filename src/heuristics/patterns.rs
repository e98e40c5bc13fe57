// src/heuristics/patterns.rs

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::{fs, path::Path};
use tracing::info;

use crate::error::{ConfigError, PatternError};

const BUILTIN: &str = include_str!("../../patterns/default.toml");

#[derive(Deserialize)]
struct LibraryFile {
    version: String,
    #[serde(default)]
    keywords: HashMap<String, Vec<String>>,
    #[serde(rename = "matcher", default)]
    matchers: Vec<MatcherSpec>,
}

#[derive(Deserialize)]
struct MatcherSpec {
    field: String,
    priority: u32,
    pattern: String,
}

/// One compiled matcher. `rank` is its 0-based position within its field.
#[derive(Debug)]
pub struct Matcher {
    pub rank: usize,
    pub priority: u32,
    pub regex: Regex,
}

#[derive(Debug)]
struct FieldMatchers {
    field: String,
    matchers: Vec<Matcher>,
    keywords: Vec<String>,
}

/// Read-only after construction; shared by every extraction call.
#[derive(Debug)]
pub struct PatternLibrary {
    version: String,
    fields: Vec<FieldMatchers>,
}

impl PatternLibrary {
    /// The library shipped with the crate.
    pub fn builtin() -> Result<Self, PatternError> {
        Self::from_toml_str(BUILTIN)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PatternError> {
        let file: LibraryFile = toml::from_str(content)?;
        if file.matchers.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut fields: Vec<FieldMatchers> = Vec::new();
        let mut specs = file.matchers;
        // Stable sort: ties on priority keep file order.
        specs.sort_by_key(|m| m.priority);
        for spec in specs {
            let regex = RegexBuilder::new(&spec.pattern)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|source| PatternError::Regex {
                    field: spec.field.clone(),
                    priority: spec.priority,
                    source,
                })?;
            if regex.captures_len() < 2 {
                return Err(PatternError::NoCapture {
                    field: spec.field,
                    priority: spec.priority,
                });
            }

            let idx = match fields.iter().position(|f| f.field == spec.field) {
                Some(i) => i,
                None => {
                    fields.push(FieldMatchers {
                        keywords: file.keywords.get(&spec.field).cloned().unwrap_or_default(),
                        field: spec.field.clone(),
                        matchers: Vec::new(),
                    });
                    fields.len() - 1
                }
            };
            let entry = &mut fields[idx];
            entry.matchers.push(Matcher {
                rank: entry.matchers.len(),
                priority: spec.priority,
                regex,
            });
        }

        info!(
            version = %file.version,
            fields = fields.len(),
            matchers = fields.iter().map(|f| f.matchers.len()).sum::<usize>(),
            "Pattern library loaded"
        );
        Ok(Self {
            version: file.version,
            fields,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.field.as_str())
    }

    /// Matchers for a field, most specific first. Empty for unknown fields.
    pub fn matchers(&self, field: &str) -> &[Matcher] {
        self.find(field).map(|f| f.matchers.as_slice()).unwrap_or(&[])
    }

    /// Context keywords for a field. Empty means no keyword evidence is defined.
    pub fn keywords(&self, field: &str) -> &[String] {
        self.find(field).map(|f| f.keywords.as_slice()).unwrap_or(&[])
    }

    /// Total matches per field across all its matchers.
    pub fn hit_counts(&self, text: &str) -> BTreeMap<String, usize> {
        self.fields
            .iter()
            .map(|f| {
                let hits = f
                    .matchers
                    .iter()
                    .map(|m| m.regex.find_iter(text).count())
                    .sum();
                (f.field.clone(), hits)
            })
            .collect()
    }

    fn find(&self, field: &str) -> Option<&FieldMatchers> {
        self.fields.iter().find(|f| f.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::fields;

    #[test]
    fn test_builtin_covers_all_fields() {
        let lib = PatternLibrary::builtin().unwrap();
        for field in fields::ALL {
            assert!(!lib.matchers(field).is_empty(), "no matchers for {field}");
        }
        assert_eq!(lib.matchers(fields::INVOICE_NUMBER).len(), 5);
        assert!(lib.keywords(fields::SUBTOTAL).is_empty());
        assert_eq!(lib.keywords(fields::VAT_AMOUNT).len(), 4);
    }

    #[test]
    fn test_ranks_follow_priority_not_file_order() {
        let lib = PatternLibrary::from_toml_str(
            r#"
            version = "t"
            [[matcher]]
            field = "total_amount"
            priority = 5
            pattern = 'sum (\d+)'
            [[matcher]]
            field = "total_amount"
            priority = 1
            pattern = 'total (\d+)'
            "#,
        )
        .unwrap();
        let m = lib.matchers("total_amount");
        assert_eq!(m[0].priority, 1);
        assert_eq!(m[0].rank, 0);
        assert_eq!(m[1].rank, 1);
        assert_eq!(lib.version(), "t");
    }

    #[test]
    fn test_rejects_bad_regex() {
        let err = PatternLibrary::from_toml_str(
            r#"
            version = "t"
            [[matcher]]
            field = "date"
            priority = 0
            pattern = '(unclosed'
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PatternError::Regex { .. }));
    }

    #[test]
    fn test_rejects_pattern_without_capture() {
        let err = PatternLibrary::from_toml_str(
            r#"
            version = "t"
            [[matcher]]
            field = "date"
            priority = 0
            pattern = 'date'
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PatternError::NoCapture { .. }));
    }

    #[test]
    fn test_rejects_empty_library() {
        let err = PatternLibrary::from_toml_str("version = \"t\"").unwrap_err();
        assert!(matches!(err, PatternError::Empty));
    }

    #[test]
    fn test_hit_counts() {
        let lib = PatternLibrary::builtin().unwrap();
        let counts = lib.hit_counts("Subtotal: 100\nVAT: 10\nTotal: 110");
        assert_eq!(counts[fields::SUBTOTAL], 1);
        assert!(counts[fields::TOTAL_AMOUNT] >= 1);
    }
}
