//! Decoding of single-variant tagged unions such as Cases field values, which arrive as
//! `{"stringValue": "Open"}`, `{"doubleValue": 12.0}`, `{"emptyValue": {}}` and so on.
use std::fmt;

use serde_json::{Map, Number, Value};

pub const STRING_VARIANT: &str = "stringValue";
pub const DOUBLE_VARIANT: &str = "doubleValue";
pub const BOOLEAN_VARIANT: &str = "booleanValue";
pub const USER_ARN_VARIANT: &str = "userArnValue";
pub const EMPTY_VARIANT: &str = "emptyValue";

/// Variant keys in the order they are checked. The first one present wins.
pub const VARIANT_PRIORITY: [&str; 5] = [
    STRING_VARIANT,
    DOUBLE_VARIANT,
    BOOLEAN_VARIANT,
    USER_ARN_VARIANT,
    EMPTY_VARIANT,
];

#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    String(String),
    Number(Number),
    Boolean(bool),
    /// A reference to a user, e.g. an ARN.
    Identity(String),
    Empty,
    /// Anything we could not make sense of, kept whole for diagnostics.
    Unknown(Value),
}

/// Something odd noticed while decoding. Decoding itself never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// No known variant key was present.
    UnknownVariant,
    /// More than one known variant key was present; the highest priority one was used.
    AmbiguousVariant,
    /// The variant key was known, but its payload had the wrong type.
    MismatchedPayload,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Diagnostic::UnknownVariant => write!(f, "unknown-variant"),
            Diagnostic::AmbiguousVariant => write!(f, "ambiguous-variant"),
            Diagnostic::MismatchedPayload => write!(f, "mismatched-payload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: TaggedValue,
    pub diagnostic: Option<Diagnostic>,
}

impl Decoded {
    fn unknown(raw: &Value, diagnostic: Diagnostic) -> Self {
        Self {
            value: TaggedValue::Unknown(raw.clone()),
            diagnostic: Some(diagnostic),
        }
    }
}

impl TaggedValue {
    /// Decode a raw tagged union. Non-object input is treated as an unknown variant.
    pub fn decode(raw: &Value) -> Decoded {
        let Some(map) = raw.as_object() else {
            return Decoded::unknown(raw, Diagnostic::UnknownVariant);
        };

        let mut present = VARIANT_PRIORITY
            .iter()
            .filter_map(|key| map.get(*key).map(|payload| (*key, payload)));

        let Some((variant, payload)) = present.next() else {
            return Decoded::unknown(raw, Diagnostic::UnknownVariant);
        };
        let ambiguous = present.next().is_some();

        let Some(value) = Self::from_variant(variant, payload) else {
            return Decoded::unknown(raw, Diagnostic::MismatchedPayload);
        };

        Decoded {
            value,
            diagnostic: ambiguous.then_some(Diagnostic::AmbiguousVariant),
        }
    }

    fn from_variant(variant: &str, payload: &Value) -> Option<Self> {
        match (variant, payload) {
            (STRING_VARIANT, Value::String(s)) => Some(TaggedValue::String(s.clone())),
            (DOUBLE_VARIANT, Value::Number(n)) => Some(TaggedValue::Number(n.clone())),
            (BOOLEAN_VARIANT, Value::Bool(b)) => Some(TaggedValue::Boolean(*b)),
            (USER_ARN_VARIANT, Value::String(s)) => Some(TaggedValue::Identity(s.clone())),
            // The payload of an empty value carries no information, whatever its shape.
            (EMPTY_VARIANT, _) => Some(TaggedValue::Empty),
            _ => None,
        }
    }

    /// Project onto the scalar value domain. Numbers stay numbers, `Empty` becomes
    /// `null` and unknown structures are rendered as a string.
    pub fn into_scalar(self) -> Value {
        match self {
            TaggedValue::String(s) | TaggedValue::Identity(s) => Value::String(s),
            TaggedValue::Number(n) => Value::Number(n),
            TaggedValue::Boolean(b) => Value::Bool(b),
            TaggedValue::Empty => Value::Null,
            TaggedValue::Unknown(raw) => Value::String(raw.to_string()),
        }
    }

    /// Build the tagged form of this value, the inverse of `decode` for known variants.
    pub fn to_tagged(&self) -> Value {
        let (key, payload) = match self {
            TaggedValue::String(s) => (STRING_VARIANT, Value::String(s.clone())),
            TaggedValue::Number(n) => (DOUBLE_VARIANT, Value::Number(n.clone())),
            TaggedValue::Boolean(b) => (BOOLEAN_VARIANT, Value::Bool(*b)),
            TaggedValue::Identity(s) => (USER_ARN_VARIANT, Value::String(s.clone())),
            TaggedValue::Empty => (EMPTY_VARIANT, Value::Object(Map::new())),
            TaggedValue::Unknown(raw) => return raw.clone(),
        };

        let mut map = Map::new();
        map.insert(key.to_owned(), payload);
        Value::Object(map)
    }
}

/// Decode straight to a scalar, returning the diagnostic alongside.
pub fn decode(raw: &Value) -> (Value, Option<Diagnostic>) {
    let Decoded { value, diagnostic } = TaggedValue::decode(raw);
    (value.into_scalar(), diagnostic)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decodes_each_known_variant() {
        assert_eq!(decode(&json!({"stringValue": "Open"})), (json!("Open"), None));
        assert_eq!(decode(&json!({"booleanValue": true})), (json!(true), None));
        assert_eq!(
            decode(&json!({"userArnValue": "arn:aws:connect:us-east-1:1:user/u"})),
            (json!("arn:aws:connect:us-east-1:1:user/u"), None)
        );
        assert_eq!(decode(&json!({"emptyValue": {}})), (Value::Null, None));
    }

    #[test]
    fn test_numbers_stay_numeric() {
        let (value, diagnostic) = decode(&json!({"doubleValue": 100123.0}));

        assert!(value.is_number());
        assert_eq!(value.as_f64(), Some(100123.0));
        assert_eq!(diagnostic, None);
    }

    #[test]
    fn test_unknown_variant_falls_back_to_string() {
        let raw = json!({"attachmentValue": "x"});

        let (value, diagnostic) = decode(&raw);

        assert_eq!(value, Value::String(raw.to_string()));
        assert_eq!(diagnostic, Some(Diagnostic::UnknownVariant));
    }

    #[test]
    fn test_non_object_and_empty_object_are_unknown() {
        assert_eq!(decode(&json!({})).1, Some(Diagnostic::UnknownVariant));
        assert_eq!(decode(&json!("bare")).1, Some(Diagnostic::UnknownVariant));
        assert_eq!(decode(&json!(null)).1, Some(Diagnostic::UnknownVariant));
    }

    #[test]
    fn test_priority_order_decides_ambiguous_input() {
        let decoded = TaggedValue::decode(&json!({"emptyValue": {}, "doubleValue": 2.5}));

        assert_eq!(decoded.value, TaggedValue::Number(Number::from_f64(2.5).unwrap()));
        assert_eq!(decoded.diagnostic, Some(Diagnostic::AmbiguousVariant));

        let decoded = TaggedValue::decode(&json!({"booleanValue": false, "stringValue": "s"}));

        assert_eq!(decoded.value, TaggedValue::String("s".to_owned()));
        assert_eq!(decoded.diagnostic, Some(Diagnostic::AmbiguousVariant));
    }

    #[test]
    fn test_mismatched_payload() {
        let raw = json!({"stringValue": 42});

        let decoded = TaggedValue::decode(&raw);

        assert_eq!(decoded.value, TaggedValue::Unknown(raw));
        assert_eq!(decoded.diagnostic, Some(Diagnostic::MismatchedPayload));
    }

    #[test]
    fn test_to_tagged() {
        assert_eq!(TaggedValue::Empty.to_tagged(), json!({"emptyValue": {}}));
        assert_eq!(
            TaggedValue::String("Open".to_owned()).to_tagged(),
            json!({"stringValue": "Open"})
        );
    }

    #[test]
    fn test_diagnostic_display() {
        assert_eq!(Diagnostic::UnknownVariant.to_string(), "unknown-variant");
    }
}
