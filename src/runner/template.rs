//! Run-scoped template store and `${NAME}` substitution
//!
//! The store maps placeholders to values plus the metadata that controls how
//! they are substituted and logged. One store exists per run; it is owned by
//! the run's [`Context`](crate::runner::Context) and never shared.

use crate::config::{OutputVariable, Variable, VariableType};
use crate::error::{TemplateError, TemplateResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::fs;
use std::io;
use tracing::debug;

/// Prefix of process environment variables that override variable defaults
pub const VARIABLE_ENV_PREFIX: &str = "TASKFORGE_";

/// Prefix under which store entries are exported to commands
pub const EXPORT_ENV_PREFIX: &str = "TASKFORGE_VAR_";

const REDACTED: &str = "**sanitized**";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{[A-Za-z0-9_]+\}").expect("placeholder regex is valid"));

/// A resolved value and its metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValue {
    pub value: String,
    pub sensitive: bool,
    pub auto_indent: bool,
    pub variable_type: VariableType,
    pub pattern: Option<String>,
}

impl TemplateValue {
    pub fn raw(value: impl Into<String>) -> Self {
        TemplateValue {
            value: value.into(),
            ..TemplateValue::default()
        }
    }

    fn from_variable(variable: &Variable, value: String) -> Self {
        TemplateValue {
            value,
            sensitive: variable.sensitive,
            auto_indent: variable.auto_indent,
            variable_type: variable.variable_type,
            pattern: variable.pattern.clone(),
        }
    }

    fn from_output(output: &OutputVariable, value: String) -> Self {
        TemplateValue {
            value,
            sensitive: output.sensitive,
            auto_indent: output.auto_indent,
            variable_type: output.variable_type,
            pattern: output.pattern.clone(),
        }
    }

    /// Value safe to print in logs
    pub fn display(&self) -> &str {
        if self.sensitive {
            REDACTED
        } else {
            &self.value
        }
    }
}

/// Placeholder string for a variable name
pub fn placeholder(name: &str) -> String {
    format!("${{{}}}", name)
}

/// Run-scoped mapping from `${NAME}` to its resolved value
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    entries: HashMap<String, TemplateValue>,
    overrides: BTreeMap<String, String>,
    declared: HashSet<String>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose `overrides` beat every declared default
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut store = TemplateStore::new();
        store.add_overrides(overrides);
        store
    }

    /// Add caller overrides and apply them to the current entries
    pub fn add_overrides(&mut self, overrides: &HashMap<String, String>) {
        self.overrides
            .extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.apply_overrides();
    }

    /// Merge declared variables into the store
    ///
    /// A name that was already declared or captured keeps its entry, so the
    /// first declaration wins. New entries take the `TASKFORGE_<NAME>` environment variable if
    /// set, else the declared default. Caller overrides are re-applied last.
    pub fn populate(&mut self, variables: &[Variable]) -> TemplateResult<()> {
        for variable in variables {
            if !self.declared.insert(variable.name.clone()) {
                continue;
            }

            let env_name = format!("{}{}", VARIABLE_ENV_PREFIX, variable.name.to_uppercase());
            let value = match env::var(&env_name) {
                Ok(value) => {
                    debug!(variable = %variable.name, "using value from {}", env_name);
                    value
                }
                Err(_) => variable.default.clone().unwrap_or_default(),
            };

            self.entries.insert(
                placeholder(&variable.name),
                TemplateValue::from_variable(variable, value),
            );
        }

        self.apply_overrides();

        for variable in variables {
            if let Some(entry) = self.get(&variable.name) {
                check_pattern(&variable.name, entry)?;
            }
        }

        Ok(())
    }

    fn apply_overrides(&mut self) {
        for (name, value) in &self.overrides {
            self.entries
                .entry(placeholder(name))
                .and_modify(|entry| entry.value = value.clone())
                .or_insert_with(|| TemplateValue::raw(value.clone()));
        }
    }

    /// Store an action's captured output, replacing any previous value
    ///
    /// The value is validated against the capture's pattern first.
    pub fn capture(&mut self, output: &OutputVariable, value: &str) -> TemplateResult<()> {
        let entry = TemplateValue::from_output(output, value.trim().to_string());
        check_pattern(&output.name, &entry)?;
        debug!(variable = %output.name, value = %entry.display(), "captured output");
        self.declared.insert(output.name.clone());
        self.entries.insert(placeholder(&output.name), entry);
        Ok(())
    }

    /// Get an entry by variable name
    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.entries.get(&placeholder(name))
    }

    /// Get a value by variable name
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|entry| entry.value.as_str())
    }

    /// Entries as `(NAME, value)`, sorted by name
    pub fn variables(&self) -> Vec<(String, &TemplateValue)> {
        let mut vars: Vec<_> = self
            .entries
            .iter()
            .map(|(key, value)| (key[2..key.len() - 1].to_string(), value))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    /// `TASKFORGE_VAR_<NAME>=value` entries for command environments
    pub fn export_env(&self) -> Vec<String> {
        self.variables()
            .into_iter()
            .map(|(name, entry)| format!("{}{}={}", EXPORT_ENV_PREFIX, name, entry.value))
            .collect()
    }

    /// Replace every known `${NAME}` in `s`; unknown placeholders are kept
    pub fn substitute(&self, s: &str) -> String {
        self.render(s, |entry| Ok(entry.value.clone()))
            .unwrap_or_else(|_| s.to_string())
    }

    /// Like [`substitute`](Self::substitute), but `file` typed variables are
    /// replaced by the contents of the file they name
    pub fn substitute_file_content(&self, s: &str) -> io::Result<String> {
        self.render(s, |entry| match entry.variable_type {
            VariableType::File => fs::read_to_string(&entry.value),
            VariableType::Raw => Ok(entry.value.clone()),
        })
    }

    fn render<F>(&self, s: &str, resolve: F) -> io::Result<String>
    where
        F: Fn(&TemplateValue) -> io::Result<String>,
    {
        let mut result = String::with_capacity(s.len());
        let mut last = 0;

        for whole in PLACEHOLDER.find_iter(s) {
            let Some(entry) = self.entries.get(whole.as_str()) else {
                continue;
            };

            let mut value = resolve(entry)?;
            if entry.auto_indent && value.contains('\n') {
                let indent = indentation_before(s, whole.start());
                value = value.replace('\n', &format!("\n{}", indent));
            }

            result.push_str(&s[last..whole.start()]);
            result.push_str(&value);
            last = whole.end();
        }

        result.push_str(&s[last..]);
        Ok(result)
    }
}

/// Whitespace directly preceding `pos` on its line
fn indentation_before(s: &str, pos: usize) -> &str {
    let line_start = s[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &s[line_start..pos];
    let trimmed = prefix.trim_end_matches([' ', '\t']);
    &prefix[trimmed.len()..]
}

fn check_pattern(name: &str, entry: &TemplateValue) -> TemplateResult<()> {
    let Some(pattern) = &entry.pattern else {
        return Ok(());
    };
    let re = Regex::new(pattern).map_err(|e| TemplateError::InvalidPattern {
        name: name.to_string(),
        pattern: pattern.clone(),
        error: e.to_string(),
    })?;
    if !re.is_match(&entry.value) {
        return Err(TemplateError::PatternMismatch {
            name: name.to_string(),
            pattern: pattern.clone(),
        });
    }
    Ok(())
}
