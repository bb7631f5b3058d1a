//! Command catalogue - a read-only name to entry lookup
//!
//! The catalogue is just a phonebook: descriptive entries mapping a display
//! name to either a literal expression or a single-parameter template. It is
//! loaded once at startup and never mutated.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// The default catalogue compiled into the binary.
const EMBEDDED_CATALOG: &str = include_str!("../fixtures/catalog.yml");

/// What an entry actually runs: a fixed expression, or a template with one
/// `{input}` placeholder plus the metadata needed to prompt for and validate
/// the value.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CommandKind {
    Literal {
        command: String,
    },
    Parameterized {
        template: String,
        input_prompt: String,
        #[serde(default)]
        input_pattern: Option<String>,
        #[serde(default)]
        input_example: Option<String>,
    },
}

/// One catalogue entry.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub description: String,
    #[serde(flatten)]
    pub kind: CommandKind,
    #[serde(default)]
    pub requires_admin: bool,
}

impl CatalogEntry {
    pub fn is_parameterized(&self) -> bool {
        matches!(self.kind, CommandKind::Parameterized { .. })
    }
}

/// Read-only mapping from command name to entry, in name order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Parse the catalogue compiled into the binary.
    pub fn embedded() -> Result<Self> {
        Self::from_yaml(EMBEDDED_CATALOG).context("Failed to parse the embedded catalogue")
    }

    /// Load a catalogue from a YAML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading catalogue from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalogue file {path:?}"))?;

        Self::from_yaml(&content).with_context(|| format!("Failed to parse catalogue {path:?}"))
    }

    /// Parse a catalogue from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let entries: BTreeMap<String, CatalogEntry> =
            serde_yaml_ng::from_str(content).context("Invalid catalogue YAML")?;

        debug!("Loaded {} catalogue entries", entries.len());
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CatalogEntry)> {
        self.entries.iter()
    }

    /// Filter entries by a case-insensitive query over name and description,
    /// optionally restricted to a favorites set.
    pub fn filter<'a>(
        &'a self,
        query: &str,
        favorites: Option<&'a std::collections::BTreeSet<String>>,
    ) -> Vec<(&'a String, &'a CatalogEntry)> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .filter(|(name, entry)| {
                if let Some(favorites) = favorites {
                    if !favorites.contains(*name) {
                        return false;
                    }
                }
                query.is_empty()
                    || name.to_lowercase().contains(&query)
                    || entry.description.to_lowercase().contains(&query)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn embedded_catalogue_parses() {
        let catalog = Catalog::embedded().unwrap();
        assert!(!catalog.is_empty());
    }

    #[test]
    fn literal_and_parameterized_entries_deserialize() {
        let yaml = r#"
Echo:
  description: Echo a greeting
  command: echo hello
Trace route:
  description: Run a traceroute
  template: "tracert \"{input}\""
  input_prompt: Host or IP to trace
  input_pattern: "[A-Za-z0-9.-]+"
  input_example: 8.8.8.8
"#;
        let catalog = Catalog::from_yaml(yaml).unwrap();

        let echo = catalog.get("Echo").unwrap();
        assert!(!echo.is_parameterized());
        assert!(!echo.requires_admin);
        assert_eq!(
            echo.kind,
            CommandKind::Literal {
                command: "echo hello".to_string()
            }
        );

        let trace = catalog.get("Trace route").unwrap();
        match &trace.kind {
            CommandKind::Parameterized {
                template,
                input_prompt,
                input_pattern,
                input_example,
            } => {
                assert_eq!(template, "tracert \"{input}\"");
                assert_eq!(input_prompt, "Host or IP to trace");
                assert_eq!(input_pattern.as_deref(), Some("[A-Za-z0-9.-]+"));
                assert_eq!(input_example.as_deref(), Some("8.8.8.8"));
            }
            other => panic!("expected parameterized entry, got {other:?}"),
        }
    }

    #[test]
    fn admin_flag_defaults_to_false_and_parses_when_set() {
        let yaml = r#"
Check:
  description: Integrity check
  command: sfc /scannow
  requires_admin: true
"#;
        let catalog = Catalog::from_yaml(yaml).unwrap();
        assert!(catalog.get("Check").unwrap().requires_admin);
    }

    #[test]
    fn entry_without_command_or_template_is_rejected() {
        let yaml = r#"
Broken:
  description: No way to run this
"#;
        assert!(Catalog::from_yaml(yaml).is_err());
    }

    #[test]
    fn filter_matches_name_and_description_case_insensitively() {
        let yaml = r#"
DNS cache:
  description: Show resolver cache contents
  command: ipconfig /displaydns
Routing table:
  description: Print the route table
  command: route print
"#;
        let catalog = Catalog::from_yaml(yaml).unwrap();

        let hits = catalog.filter("resolver", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "DNS cache");

        let favorites: std::collections::BTreeSet<String> =
            ["Routing table".to_string()].into_iter().collect();
        let hits = catalog.filter("", Some(&favorites));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "Routing table");
    }
}
