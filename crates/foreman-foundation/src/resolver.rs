//! Step-input reference resolution.
//!
//! Strings shaped exactly `${steps.<step_key>[.output[.<field>...]]}` are
//! replaced by the output of the most recent succeeded run of that step.
//! Substitution is structural: a placeholder may sit anywhere inside
//! nested maps and lists, and the referenced value is spliced in as JSON;
//! placeholders are never treated as template fragments inside larger
//! strings. Resolution is a fixpoint: already-resolved inputs pass through
//! untouched.
//!
//! The walk is split in two pure phases (collect, substitute) so the
//! engine can fetch every referenced output inside its own transaction
//! between them.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("step input reference could not be resolved: {0}")]
    Unresolved(String),
}

/// A parsed `${steps...}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReference {
    pub original: String,
    pub step_key: String,
    pub field_path: Vec<String>,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$\{steps\.([A-Za-z0-9_\-]+)(?:\.output((?:\.[A-Za-z0-9_\-]+)*))?\}$")
            .expect("placeholder pattern is valid")
    })
}

/// Parse a string as a placeholder. Anything that does not match the exact
/// pattern is not a reference and stays untouched.
pub fn parse_reference(raw: &str) -> Option<StepReference> {
    let captures = placeholder_re().captures(raw)?;
    let field_path = captures
        .get(2)
        .map(|m| {
            m.as_str()
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(StepReference {
        original: raw.to_string(),
        step_key: captures[1].to_string(),
        field_path,
    })
}

/// Collect every placeholder in `value`, depth first.
pub fn collect_references(value: &Value, out: &mut Vec<StepReference>) {
    match value {
        Value::String(raw) => {
            if let Some(reference) = parse_reference(raw) {
                out.push(reference);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

fn resolve_one(reference: &StepReference, outputs: &HashMap<String, Value>) -> Result<Value, ResolveError> {
    let mut current = outputs
        .get(&reference.step_key)
        .ok_or_else(|| ResolveError::Unresolved(reference.original.clone()))?;
    for field in &reference.field_path {
        current = current
            .as_object()
            .and_then(|map| map.get(field))
            .ok_or_else(|| ResolveError::Unresolved(reference.original.clone()))?;
    }
    Ok(current.clone())
}

/// Substitute every placeholder using the fetched `outputs` (step_key →
/// output document). Non-placeholder leaves are cloned as-is.
pub fn substitute(
    value: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value, ResolveError> {
    match value {
        Value::String(raw) => match parse_reference(raw) {
            Some(reference) => resolve_one(&reference, outputs),
            None => Ok(value.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), substitute(item, outputs)?)))
            .collect::<Result<serde_json::Map<_, _>, ResolveError>>()
            .map(Value::Object),
        _ => Ok(value.clone()),
    }
}
