//! Discovery of `(name, label)` pairs in view templates.
//!
//! View templates are arbitrarily nested trees of objects and arrays. Any object that
//! carries both a name-like key and a label-like key describes a question (or answer
//! option) and yields one [`NamedLabelPair`]; its descendants are still searched, so a
//! question and its options are all reported.
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Nodes nested deeper than this are not searched.
pub const MAX_DEPTH: usize = 64;

const NAME_KEY: &str = "name";
const LABEL_KEY: &str = "label";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedLabelPair {
    pub name: String,
    pub label: String,
}

/// Lazily extract every name/label pair in `doc`, in pre-order.
pub fn extract_label_pairs(doc: &Value) -> LabelPairs<'_> {
    LabelPairs::new(doc, MAX_DEPTH)
}

/// Iterator over the pairs of a document, driven by an explicit work stack rather than
/// call recursion. Parents are yielded before children, object values in the object's
/// own key order and array elements in index order.
pub struct LabelPairs<'a> {
    stack: Vec<(&'a Value, usize)>,
    max_depth: usize,
    depth_exceeded: bool,
}

impl<'a> LabelPairs<'a> {
    pub fn new(doc: &'a Value, max_depth: usize) -> Self {
        Self {
            stack: vec![(doc, 0)],
            max_depth,
            depth_exceeded: false,
        }
    }

    /// Whether part of the document was skipped because it was nested too deeply.
    pub fn depth_exceeded(&self) -> bool {
        self.depth_exceeded
    }

    fn push_children(
        &mut self,
        children: impl DoubleEndedIterator<Item = &'a Value>,
        depth: usize,
    ) {
        if depth >= self.max_depth {
            if !self.depth_exceeded {
                warn!(
                    max_depth = self.max_depth,
                    "template nesting too deep, skipping subtree"
                );
            }
            self.depth_exceeded = true;
            return;
        }

        // Reversed, so the first child is popped first. Scalars can never yield a pair.
        self.stack.extend(
            children
                .rev()
                .filter(|child| child.is_object() || child.is_array())
                .map(|child| (child, depth + 1)),
        );
    }
}

impl Iterator for LabelPairs<'_> {
    type Item = NamedLabelPair;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, depth)) = self.stack.pop() {
            match node {
                Value::Object(map) => {
                    self.push_children(map.values(), depth);
                    if let Some(pair) = pair_for(map) {
                        return Some(pair);
                    }
                }
                Value::Array(items) => self.push_children(items.iter(), depth),
                _ => {}
            }
        }

        None
    }
}

fn pair_for(map: &Map<String, Value>) -> Option<NamedLabelPair> {
    let name = find_string(map, NAME_KEY)?;
    let label = find_string(map, LABEL_KEY)?;

    Some(NamedLabelPair {
        name: name.to_owned(),
        label: label.to_owned(),
    })
}

/// First non-empty string stored under a key matching `wanted` case-insensitively.
fn find_string<'m>(map: &'m Map<String, Value>, wanted: &str) -> Option<&'m str> {
    map.iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(wanted))
        .find_map(|(_, value)| value.as_str().filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pair(name: &str, label: &str) -> NamedLabelPair {
        NamedLabelPair {
            name: name.to_owned(),
            label: label.to_owned(),
        }
    }

    #[test]
    fn test_extracts_parent_and_nested_pairs() {
        let template = json!({
            "Head": {"Title": "Survey"},
            "Body": [
                {
                    "Name": "REDE_Q2",
                    "Label": "Was the call transferred?",
                    "Options": [
                        {"Name": "REDE_Q2_Yes", "Label": "Yes - to Transferred to CCH_AA"},
                        {"Name": "REDE_Q2_No", "Label": "No"}
                    ]
                },
                {"name": "lower", "label": "lower case keys"}
            ]
        });

        let pairs: Vec<_> = extract_label_pairs(&template).collect();

        assert_eq!(
            pairs,
            vec![
                pair("REDE_Q2", "Was the call transferred?"),
                pair("REDE_Q2_Yes", "Yes - to Transferred to CCH_AA"),
                pair("REDE_Q2_No", "No"),
                pair("lower", "lower case keys"),
            ]
        );
    }

    #[test]
    fn test_requires_both_keys_non_empty() {
        let template = json!([
            {"Name": "only_name"},
            {"Label": "only label"},
            {"Name": "", "Label": "empty name"},
            {"Name": "empty_label", "Label": ""},
            {"Name": "not_a_string_label", "Label": 3},
            {"NAME": "Shouty", "LABEL": "Shouty label"}
        ]);

        let pairs: Vec<_> = extract_label_pairs(&template).collect();

        assert_eq!(pairs, vec![pair("Shouty", "Shouty label")]);
    }

    #[test]
    fn test_one_pair_per_node_even_with_duplicate_key_casings() {
        let template = json!({"Name": "first", "name": "second", "Label": "label"});

        let pairs: Vec<_> = extract_label_pairs(&template).collect();

        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_count_matches_number_of_qualifying_nodes() {
        let template = json!({
            "Name": "root", "Label": "root label",
            "children": [
                {"Name": "a", "Label": "A", "inner": {"Name": "a1", "Label": "A1"}},
                {"Name": "b", "Label": "B"},
                {"nothing": {"here": [1, 2, 3]}}
            ]
        });

        assert_eq!(extract_label_pairs(&template).count(), 4);
    }

    #[test]
    fn test_scalars_and_empty_documents_yield_nothing() {
        assert_eq!(extract_label_pairs(&json!("text")).count(), 0);
        assert_eq!(extract_label_pairs(&json!({})).count(), 0);
        assert_eq!(extract_label_pairs(&json!([])).count(), 0);
        assert_eq!(extract_label_pairs(&json!(null)).count(), 0);
    }

    #[test]
    fn test_is_lazy() {
        let template = json!([
            {"Name": "first", "Label": "1"},
            {"Name": "second", "Label": "2"}
        ]);

        let mut pairs = extract_label_pairs(&template);

        assert_eq!(pairs.next(), Some(pair("first", "1")));
        assert_eq!(pairs.next(), Some(pair("second", "2")));
        assert_eq!(pairs.next(), None);
    }

    #[test]
    fn test_depth_guard_skips_deep_subtrees() {
        let mut deep = json!({"Name": "bottom", "Label": "unreachable"});
        for _ in 0..10 {
            let mut wrapper = Map::new();
            wrapper.insert("wrapper".to_owned(), deep);
            deep = Value::Object(wrapper);
        }
        let template = json!([{"Name": "top", "Label": "reachable"}, deep]);

        let mut pairs = LabelPairs::new(&template, 5);
        let found: Vec<_> = pairs.by_ref().collect();

        assert_eq!(found, vec![pair("top", "reachable")]);
        assert!(pairs.depth_exceeded());
    }

    #[test]
    fn test_very_deep_nesting_does_not_overflow_the_stack() {
        let mut deep = json!({"Name": "bottom", "Label": "found"});
        for _ in 0..5_000 {
            deep = Value::Array(vec![deep]);
        }

        let found: Vec<_> = LabelPairs::new(&deep, usize::MAX).collect();

        assert_eq!(found, vec![pair("bottom", "found")]);
        // Dropping a Value recurses once per level, so leak it instead.
        std::mem::forget(deep);
    }
}
