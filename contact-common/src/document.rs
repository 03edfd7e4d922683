use serde_json::{Map, Value};

/// Walk `path` through nested objects, returning `None` as soon as a segment is missing
/// or the value at that point is not an object. JSON `null` is treated as missing.
pub fn get_path<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path {
        current = current.as_object()?.get(*segment)?;
    }

    match current {
        Value::Null => None,
        value => Some(value),
    }
}

/// Like `get_path`, but only returns non-empty strings.
pub fn get_str<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a str> {
    get_path(doc, path)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Like `get_path`, but only returns objects.
pub fn get_object<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Map<String, Value>> {
    get_path(doc, path).and_then(Value::as_object)
}

/// Render a value for human consumption: strings are emitted without quotes, everything
/// else uses its compact JSON form.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
