//! Command dispatcher - resolves a catalogue entry into an execution request.
//!
//! Validation happens entirely before any process is spawned: a shell
//! metacharacter denylist, the entry's own pattern (full match), and the
//! entry's elevation requirement. Elevation status is an explicit field so
//! front-ends and tests inject it instead of probing ambient state.

use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::{Catalog, CatalogEntry, CommandKind};
use crate::runner::ExecutionRequest;

/// Characters never accepted in a user-supplied parameter value.
pub const DISALLOWED_INPUT_CHARS: &[char] =
    &[';', '|', '&', '>', '<', '`', '$', '\n', '\r', '\t', '\0'];

/// Placeholder substituted in parameterized templates.
const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("'{name}' needs a parameter value: {prompt}")]
    MissingInput { name: String, prompt: String },

    #[error("'{0}' does not take a parameter")]
    UnexpectedInput(String),

    #[error("input contains a disallowed character {0:?}")]
    DisallowedCharacter(char),

    #[error("input does not match the expected format{hint}")]
    PatternMismatch { hint: String },

    #[error("'{0}' requires elevated privileges; restart elevated and retry")]
    ElevationRequired(String),
}

/// Resolves catalogue entries into ready-to-run requests.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    catalog: Catalog,
    elevated: bool,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(catalog: Catalog, elevated: bool, default_timeout: Duration) -> Self {
        Self {
            catalog,
            elevated,
            default_timeout,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve an entry by name, validating and substituting the optional
    /// user-supplied value. No resource is allocated for invalid input.
    pub fn resolve(
        &self,
        name: &str,
        input: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionRequest, DispatchError> {
        let entry = self
            .catalog
            .get(name)
            .ok_or_else(|| DispatchError::UnknownCommand(name.to_string()))?;

        if entry.requires_admin && !self.elevated {
            warn!(command = name, "Refusing non-elevated dispatch");
            return Err(DispatchError::ElevationRequired(name.to_string()));
        }

        let raw_command = self.resolve_expression(name, entry, input)?;
        debug!(command = name, "Dispatch resolved");

        Ok(ExecutionRequest {
            display_name: name.to_string(),
            raw_command,
            timeout: timeout.unwrap_or(self.default_timeout),
        })
    }

    fn resolve_expression(
        &self,
        name: &str,
        entry: &CatalogEntry,
        input: Option<&str>,
    ) -> Result<String, DispatchError> {
        match &entry.kind {
            CommandKind::Literal { command } => {
                if input.is_some() {
                    return Err(DispatchError::UnexpectedInput(name.to_string()));
                }
                Ok(command.clone())
            }
            CommandKind::Parameterized {
                template,
                input_prompt,
                input_pattern,
                input_example,
            } => {
                let value = input.map(str::trim).filter(|v| !v.is_empty()).ok_or_else(
                    || DispatchError::MissingInput {
                        name: name.to_string(),
                        prompt: input_prompt.clone(),
                    },
                )?;

                validate_input(value, input_pattern.as_deref(), input_example.as_deref())?;
                Ok(template.replace(INPUT_PLACEHOLDER, value))
            }
        }
    }
}

/// Check a parameter value against the denylist and the entry's pattern.
fn validate_input(
    value: &str,
    pattern: Option<&str>,
    example: Option<&str>,
) -> Result<(), DispatchError> {
    if let Some(bad) = value.chars().find(|c| DISALLOWED_INPUT_CHARS.contains(c)) {
        return Err(DispatchError::DisallowedCharacter(bad));
    }

    if let Some(pattern) = pattern {
        // Full match only; the catalogue patterns are written unanchored.
        match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => {
                if !re.is_match(value) {
                    let hint = example
                        .map(|e| format!(" (example: {e})"))
                        .unwrap_or_default();
                    return Err(DispatchError::PatternMismatch { hint });
                }
            }
            Err(e) => {
                // A broken pattern must not brick the entry; skip the check.
                warn!("Skipping unparseable input pattern {:?}: {}", pattern, e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn test_catalog() -> Catalog {
        let yaml = r#"
Echo:
  description: Echo a greeting
  command: echo hello
Ping host:
  description: Ping a host four times
  template: "ping {input}"
  input_prompt: Host or IP to ping
  input_pattern: "(?:\\d{1,3}(?:\\.\\d{1,3}){3}|[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*)"
  input_example: 8.8.8.8 or example.com
Integrity check:
  description: Verify system files
  command: sfc /scannow
  requires_admin: true
"#;
        Catalog::from_yaml(yaml).unwrap()
    }

    fn dispatcher(elevated: bool) -> Dispatcher {
        Dispatcher::new(test_catalog(), elevated, Duration::from_secs(30))
    }

    #[test]
    fn literal_entry_resolves_verbatim() {
        let request = dispatcher(false).resolve("Echo", None, None).unwrap();
        assert_eq!(request.raw_command, "echo hello");
        assert_eq!(request.display_name, "Echo");
        assert_eq!(request.timeout, Duration::from_secs(30));
    }

    #[test]
    fn explicit_timeout_overrides_default() {
        let request = dispatcher(false)
            .resolve("Echo", None, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(request.timeout, Duration::from_secs(5));
    }

    #[test]
    fn unknown_name_is_refused() {
        let err = dispatcher(false).resolve("Nope", None, None).unwrap_err();
        assert_eq!(err, DispatchError::UnknownCommand("Nope".to_string()));
    }

    #[test]
    fn literal_entry_rejects_a_parameter() {
        let err = dispatcher(false)
            .resolve("Echo", Some("extra"), None)
            .unwrap_err();
        assert_eq!(err, DispatchError::UnexpectedInput("Echo".to_string()));
    }

    #[test]
    fn parameterized_entry_requires_a_value() {
        let err = dispatcher(false).resolve("Ping host", None, None).unwrap_err();
        assert!(matches!(err, DispatchError::MissingInput { .. }));

        let err = dispatcher(false)
            .resolve("Ping host", Some("   "), None)
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingInput { .. }));
    }

    #[test]
    fn valid_value_is_substituted() {
        let request = dispatcher(false)
            .resolve("Ping host", Some("8.8.8.8"), None)
            .unwrap();
        assert_eq!(request.raw_command, "ping 8.8.8.8");
    }

    #[test]
    fn shell_metacharacters_are_refused_before_any_spawn() {
        let err = dispatcher(false)
            .resolve("Ping host", Some("; rm -rf /"), None)
            .unwrap_err();
        assert_eq!(err, DispatchError::DisallowedCharacter(';'));
    }

    #[test]
    fn pattern_mismatch_carries_the_example_hint() {
        let err = dispatcher(false)
            .resolve("Ping host", Some("not a host!"), None)
            .unwrap_err();
        match err {
            DispatchError::PatternMismatch { hint } => {
                assert!(hint.contains("8.8.8.8 or example.com"));
            }
            other => panic!("expected PatternMismatch, got {other:?}"),
        }
    }

    #[test]
    fn admin_entry_is_refused_without_elevation() {
        let err = dispatcher(false)
            .resolve("Integrity check", None, None)
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::ElevationRequired("Integrity check".to_string())
        );

        assert!(dispatcher(true).resolve("Integrity check", None, None).is_ok());
    }

    #[test]
    fn broken_pattern_skips_the_check() {
        assert!(validate_input("anything", Some("(unclosed"), None).is_ok());
    }
}
