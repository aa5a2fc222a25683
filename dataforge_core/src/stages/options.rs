//! Stage option values, declared schemas and validation
//!
//! Every stage declares its options as a list of [`ConfigField`]s. A raw
//! option map from a pipeline request is checked against that schema once,
//! at submission time, and turned into [`StageOptions`] with every default
//! filled in. Unknown option keys are rejected.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed option value as it appears in a pipeline request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl OptionValue {
    /// Type name used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::List(_) => "string list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<&[&str]> for OptionValue {
    fn from(value: &[&str]) -> Self {
        Self::List(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for OptionValue {
    fn from(value: [&str; N]) -> Self {
        Self::List(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Shape of an option's accepted values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Boolean,
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        integer: bool,
    },
    Text,
    Choice {
        choices: &'static [&'static str],
    },
    List,
    /// A string list, or a sentinel string meaning "everything applicable"
    ListOrAll {
        all: &'static str,
    },
}

/// One declared option of a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigField {
    pub name: &'static str,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub default: OptionValue,
    pub description: &'static str,
}

impl ConfigField {
    pub fn boolean(name: &'static str, default: bool, description: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Boolean,
            default: OptionValue::Bool(default),
            description,
        }
    }

    pub fn number(
        name: &'static str,
        default: f64,
        min: Option<f64>,
        max: Option<f64>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Number {
                min,
                max,
                integer: false,
            },
            default: OptionValue::Number(default),
            description,
        }
    }

    pub fn integer(
        name: &'static str,
        default: i64,
        min: Option<i64>,
        max: Option<i64>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Number {
                min: min.map(|m| m as f64),
                max: max.map(|m| m as f64),
                integer: true,
            },
            default: OptionValue::Number(default as f64),
            description,
        }
    }

    pub fn text(name: &'static str, default: &str, description: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            default: OptionValue::Text(default.to_string()),
            description,
        }
    }

    pub fn choice(
        name: &'static str,
        choices: &'static [&'static str],
        default: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Choice { choices },
            default: OptionValue::Text(default.to_string()),
            description,
        }
    }

    pub fn list(name: &'static str, default: &[&str], description: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::List,
            default: OptionValue::from(default),
            description,
        }
    }

    pub fn list_or_all(name: &'static str, all: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::ListOrAll { all },
            default: OptionValue::Text(all.to_string()),
            description,
        }
    }

    /// Check a supplied value against this field
    pub fn check(&self, stage: &str, value: &OptionValue) -> Result<(), ValidationError> {
        let wrong_type = |expected: &str| -> Result<(), ValidationError> {
            Err(ValidationError::wrong_type(
                stage,
                self.name,
                expected,
                value.type_name(),
            ))
        };

        match (&self.kind, value) {
            (FieldKind::Boolean, OptionValue::Bool(_)) => Ok(()),
            (FieldKind::Boolean, _) => wrong_type("boolean"),

            (FieldKind::Number { min, max, integer }, OptionValue::Number(n)) => {
                if !n.is_finite() {
                    return Err(ValidationError::out_of_range(
                        stage,
                        self.name,
                        "must be a finite number",
                    ));
                }
                if *integer && n.fract() != 0.0 {
                    return Err(ValidationError::out_of_range(
                        stage,
                        self.name,
                        format!("must be a whole number, got {n}"),
                    ));
                }
                let below = min.is_some_and(|m| *n < m);
                let above = max.is_some_and(|m| *n > m);
                if below || above {
                    let reason = match (min, max) {
                        (Some(lo), Some(hi)) => format!("must be between {lo} and {hi}, got {n}"),
                        (Some(lo), None) => format!("must be at least {lo}, got {n}"),
                        (None, Some(hi)) => format!("must be at most {hi}, got {n}"),
                        (None, None) => format!("invalid value {n}"),
                    };
                    return Err(ValidationError::out_of_range(stage, self.name, reason));
                }
                Ok(())
            }
            (FieldKind::Number { .. }, _) => wrong_type("number"),

            (FieldKind::Text, OptionValue::Text(_)) => Ok(()),
            (FieldKind::Text, _) => wrong_type("string"),

            (FieldKind::Choice { choices }, OptionValue::Text(s)) => {
                if choices.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(ValidationError::invalid_choice(stage, self.name, s, choices))
                }
            }
            (FieldKind::Choice { .. }, _) => wrong_type("string"),

            (FieldKind::List, OptionValue::List(_)) => Ok(()),
            (FieldKind::List, _) => wrong_type("string list"),

            (FieldKind::ListOrAll { .. }, OptionValue::List(_)) => Ok(()),
            (FieldKind::ListOrAll { all }, OptionValue::Text(s)) => {
                if s == all {
                    Ok(())
                } else {
                    Err(ValidationError::invalid_choice(stage, self.name, s, &[*all]))
                }
            }
            (FieldKind::ListOrAll { all }, _) => {
                wrong_type(&format!("string list or \"{all}\""))
            }
        }
    }
}

/// Validated options of one stage, with defaults applied
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StageOptions {
    values: BTreeMap<String, OptionValue>,
}

impl StageOptions {
    /// Validate `supplied` against `schema`, filling in defaults
    pub fn resolve(
        stage: &str,
        schema: &[ConfigField],
        supplied: &BTreeMap<String, OptionValue>,
    ) -> Result<Self, ValidationError> {
        if let Some(unknown) = supplied
            .keys()
            .find(|key| !schema.iter().any(|f| f.name == key.as_str()))
        {
            return Err(ValidationError::unknown_option(stage, unknown));
        }

        let mut values = BTreeMap::new();
        for field in schema {
            let value = match supplied.get(field.name) {
                Some(value) => {
                    field.check(stage, value)?;
                    value.clone()
                }
                None => field.default.clone(),
            };
            values.insert(field.name.to_string(), value);
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(OptionValue::as_bool).unwrap_or(false)
    }

    pub fn number(&self, name: &str) -> f64 {
        self.get(name).and_then(OptionValue::as_f64).unwrap_or(0.0)
    }

    pub fn count(&self, name: &str) -> usize {
        self.number(name).max(0.0) as usize
    }

    pub fn text(&self, name: &str) -> &str {
        self.get(name).and_then(OptionValue::as_str).unwrap_or("")
    }

    /// The explicit list of a list-or-all option; `None` means "all"
    pub fn selection(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(OptionValue::as_list)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
