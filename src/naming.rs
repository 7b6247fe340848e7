//! Naming-convention transcoding of document keys.
//!
//! [`transcode`] rewrites every object key of a document, including keys of
//! objects nested inside arrays. Values and structure are never touched.

use std::{borrow::Cow, fmt, str::FromStr, sync::OnceLock};

use heck::ToLowerCamelCase;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ReconcileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingRule {
    Preserve,
    /// `totalAmount` → `total_amount` for separator `_`.
    CamelToSeparated(char),
    /// `total_amount` → `totalAmount`.
    SeparatedToCamel,
}

impl Default for NamingRule {
    fn default() -> Self {
        NamingRule::CamelToSeparated('_')
    }
}

impl NamingRule {
    pub fn apply<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match self {
            NamingRule::Preserve => Cow::Borrowed(key),
            NamingRule::CamelToSeparated(separator) => camel_to_separated(key, *separator),
            NamingRule::SeparatedToCamel => {
                let converted = key.to_lower_camel_case();
                if converted == key {
                    Cow::Borrowed(key)
                } else {
                    Cow::Owned(converted)
                }
            }
        }
    }

    /// The rule that undoes this one for keys without consecutive capitals.
    pub fn inverse(&self) -> NamingRule {
        match self {
            NamingRule::Preserve => NamingRule::Preserve,
            NamingRule::CamelToSeparated(_) => NamingRule::SeparatedToCamel,
            NamingRule::SeparatedToCamel => NamingRule::CamelToSeparated('_'),
        }
    }
}

impl FromStr for NamingRule {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "preserve" | "identity" | "none" => Ok(NamingRule::Preserve),
            "camel-to-snake" | "snake" => Ok(NamingRule::CamelToSeparated('_')),
            "camel-to-kebab" | "kebab" => Ok(NamingRule::CamelToSeparated('-')),
            "snake-to-camel" | "camel" => Ok(NamingRule::SeparatedToCamel),
            other => Err(format!(
                "Unknown naming rule '{other}' (expected preserve, camel-to-snake, camel-to-kebab, snake-to-camel)"
            )),
        }
    }
}

impl fmt::Display for NamingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingRule::Preserve => f.write_str("preserve"),
            NamingRule::CamelToSeparated('_') => f.write_str("camel-to-snake"),
            NamingRule::CamelToSeparated('-') => f.write_str("camel-to-kebab"),
            NamingRule::CamelToSeparated(other) => write!(f, "camel-to-separated({other})"),
            NamingRule::SeparatedToCamel => f.write_str("snake-to-camel"),
        }
    }
}

fn lower_upper_boundary() -> &'static Regex {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    BOUNDARY.get_or_init(|| Regex::new("([a-z])([A-Z])").expect("static boundary regex"))
}

fn camel_to_separated(key: &str, separator: char) -> Cow<'_, str> {
    if !key.chars().any(char::is_uppercase) {
        return Cow::Borrowed(key);
    }
    let boundary = lower_upper_boundary();
    let replacement = format!("${{1}}{separator}${{2}}");
    Cow::Owned(boundary.replace_all(key, replacement.as_str()).to_lowercase())
}

pub fn transcode(doc: &Value, rule: NamingRule) -> Result<Value> {
    transcode_at(doc, rule, "")
}

/// Serialises `doc` and transcodes the result.
pub fn transcode_serializable<T: Serialize>(doc: &T, rule: NamingRule) -> Result<Value> {
    let value = serde_json::to_value(doc)?;
    transcode(&value, rule)
}

fn transcode_at(doc: &Value, rule: NamingRule, path: &str) -> Result<Value> {
    match doc {
        Value::Object(map) => {
            let mut renamed = Map::with_capacity(map.len());
            for (key, value) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let new_key = rule.apply(key).into_owned();
                let converted = transcode_at(value, rule, &child_path)?;
                if renamed.insert(new_key.clone(), converted).is_some() {
                    return Err(ReconcileError::KeyCollision {
                        path: if path.is_empty() {
                            "<root>".to_string()
                        } else {
                            path.to_string()
                        },
                        key: new_key,
                    });
                }
            }
            Ok(Value::Object(renamed))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| transcode_at(item, rule, &format!("{path}[{idx}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        scalar => Ok(scalar.clone()),
    }
}
