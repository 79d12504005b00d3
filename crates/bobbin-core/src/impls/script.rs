//! Command scripts for the in-memory store.
//!
//! A `Command` payload run against `InMemoryTaskStore` is a `;`-separated
//! list of statements over a string key/value table:
//!
//! ```text
//! set <key> <value...>   insert or overwrite
//! incr <key>             integer increment (missing key counts as 0)
//! delete <key>           remove; error if absent
//! abort <message...>     fail the whole script
//! ```
//!
//! Scripts are applied all-or-nothing by the store; this module only parses
//! and applies statements to whatever table it is handed.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Set { key: String, value: String },
    Incr { key: String },
    Delete { key: String },
    Abort { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("statement {index}: unknown verb {verb:?}")]
    UnknownVerb { index: usize, verb: String },

    #[error("statement {index}: {verb} needs {expected}")]
    MissingArgument {
        index: usize,
        verb: &'static str,
        expected: &'static str,
    },

    #[error("incr {key}: current value {value:?} is not an integer")]
    NotAnInteger { key: String, value: String },

    #[error("incr {key}: value would overflow")]
    Overflow { key: String },

    #[error("delete {0}: no such key")]
    NoSuchKey(String),

    #[error("aborted: {0}")]
    Aborted(String),
}

pub fn parse(script: &str) -> Result<Vec<Statement>, ScriptError> {
    script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(index, raw)| parse_statement(index, raw))
        .collect()
}

fn parse_statement(index: usize, raw: &str) -> Result<Statement, ScriptError> {
    let (verb, rest) = match raw.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (raw, ""),
    };

    let missing = |verb, expected| ScriptError::MissingArgument {
        index,
        verb,
        expected,
    };

    match verb.to_ascii_lowercase().as_str() {
        "set" => {
            let (key, value) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| missing("set", "a key and a value"))?;
            Ok(Statement::Set {
                key: key.to_string(),
                value: value.trim().to_string(),
            })
        }
        "incr" if !rest.is_empty() => Ok(Statement::Incr {
            key: rest.to_string(),
        }),
        "incr" => Err(missing("incr", "a key")),
        "delete" if !rest.is_empty() => Ok(Statement::Delete {
            key: rest.to_string(),
        }),
        "delete" => Err(missing("delete", "a key")),
        "abort" => Ok(Statement::Abort {
            message: rest.to_string(),
        }),
        _ => Err(ScriptError::UnknownVerb {
            index,
            verb: verb.to_string(),
        }),
    }
}

/// Apply statements in order, stopping at the first error. The caller is
/// responsible for discarding `data` on error.
pub fn apply(
    statements: &[Statement],
    data: &mut BTreeMap<String, String>,
) -> Result<(), ScriptError> {
    for statement in statements {
        match statement {
            Statement::Set { key, value } => {
                data.insert(key.clone(), value.clone());
            }
            Statement::Incr { key } => {
                let current = match data.get(key) {
                    Some(value) => value.parse::<i64>().map_err(|_| ScriptError::NotAnInteger {
                        key: key.clone(),
                        value: value.clone(),
                    })?,
                    None => 0,
                };
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| ScriptError::Overflow { key: key.clone() })?;
                data.insert(key.clone(), next.to_string());
            }
            Statement::Delete { key } => {
                data.remove(key)
                    .ok_or_else(|| ScriptError::NoSuchKey(key.clone()))?;
            }
            Statement::Abort { message } => return Err(ScriptError::Aborted(message.clone())),
        }
    }
    Ok(())
}
