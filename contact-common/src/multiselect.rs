//! Flattening of multi-select answers.
//!
//! A multi-select answer shows up either as a list, or as a sparse object keyed by the
//! selection index (`{"0": "A", "2": "C"}`). Both are flattened into one comma-joined
//! string, ordered by index. Anything else is a plain answer and passes through as is.
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::document::render;

pub const SEPARATOR: &str = ", ";

/// Indices with more significant digits than this are not ordered.
pub const MAX_INDEX_DIGITS: usize = 4300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerShape {
    IndexedMap,
    List,
    Scalar,
}

impl AnswerShape {
    pub fn of(raw: &Value) -> Self {
        match raw {
            Value::Object(map) if map.keys().all(|k| is_index(k)) => AnswerShape::IndexedMap,
            Value::Array(_) => AnswerShape::List,
            _ => AnswerShape::Scalar,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerShape::IndexedMap => "numeric_dict",
            AnswerShape::List => "list",
            AnswerShape::Scalar => "scalar",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("selection index {0} is too long to order")]
    IndexOverflow(String),
}

fn is_index(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

/// Sort key for a digit-only index: digit count, then digits, leading zeros ignored.
/// Orders indices numerically without parsing them into a fixed-width integer.
fn index_order(key: &str) -> Result<(usize, &str), NormalizeError> {
    let digits = key.trim_start_matches('0');
    if digits.len() > MAX_INDEX_DIGITS {
        return Err(NormalizeError::IndexOverflow(key.to_owned()));
    }
    Ok((digits.len(), digits))
}

/// Flatten a multi-select answer, failing only when an index key cannot be ordered.
pub fn try_normalize(raw: &Value) -> Result<Value, NormalizeError> {
    match (AnswerShape::of(raw), raw) {
        (AnswerShape::IndexedMap, Value::Object(map)) => {
            let mut indexed = map
                .iter()
                .map(|(key, value)| index_order(key).map(|order| (order, value)))
                .collect::<Result<Vec<_>, _>>()?;
            indexed.sort_by(|(a, _), (b, _)| a.cmp(b));

            Ok(Value::String(join(indexed.into_iter().map(|(_, v)| v))))
        }
        (AnswerShape::List, Value::Array(items)) => Ok(Value::String(join(items.iter()))),
        _ => Ok(raw.clone()),
    }
}

/// Flatten a multi-select answer. If it cannot be flattened the original value is kept.
pub fn normalize(raw: &Value) -> Value {
    try_normalize(raw).unwrap_or_else(|_| raw.clone())
}

fn join<'a>(values: impl Iterator<Item = &'a Value>) -> String {
    values.map(render).collect::<Vec<_>>().join(SEPARATOR)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizedAnswers {
    pub fields: Map<String, Value>,
    /// How many keys could not be normalized and were kept verbatim.
    pub key_errors: usize,
}

/// Normalize every answer in a view result. A failure on one key never affects the
/// others. Only keys and error messages are logged, never answer values.
pub fn normalize_answers(answers: &Map<String, Value>) -> NormalizedAnswers {
    let mut normalized = NormalizedAnswers::default();

    for (key, raw) in answers {
        debug!(key = %key, shape = AnswerShape::of(raw).as_str(), "normalizing answer");

        let value = match try_normalize(raw) {
            Ok(value) => value,
            Err(e) => {
                error!(key = %key, "normalization failed: {}", e);
                normalized.key_errors += 1;
                raw.clone()
            }
        };
        normalized.fields.insert(key.clone(), value);
    }

    normalized
}
