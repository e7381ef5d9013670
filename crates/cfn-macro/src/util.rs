use crate::error::{Error, Result};
use crate::value::{Map, Value};
use std::borrow::Cow;

/// Rewrite every value of an object
///
/// `rewrite` returns [Cow::Borrowed] for values it leaves alone. The result is `None` when no
/// value changed, so callers can hand out their input unchanged.
pub(crate) fn rewrite_entries<'a, F>(map: &'a Map, mut rewrite: F) -> Result<Option<Map>>
where
    F: FnMut(&'a str, &'a Value) -> Result<Cow<'a, Value>>,
{
    let mut rewritten: Option<Map> = None;
    for (index, (key, value)) in map.iter().enumerate() {
        match rewrite(key.as_str(), value)? {
            Cow::Borrowed(_) => {
                if let Some(out) = rewritten.as_mut() {
                    out.insert(key.clone(), value.clone());
                }
            }
            Cow::Owned(new_value) => {
                let out = rewritten.get_or_insert_with(|| {
                    map.iter()
                        .take(index)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                });
                out.insert(key.clone(), new_value);
            }
        }
    }
    Ok(rewritten)
}

/// Same as [rewrite_entries] for array elements
pub(crate) fn rewrite_items<'a, F>(items: &'a [Value], mut rewrite: F) -> Result<Option<Vec<Value>>>
where
    F: FnMut(&'a Value) -> Result<Cow<'a, Value>>,
{
    let mut rewritten: Option<Vec<Value>> = None;
    for (index, item) in items.iter().enumerate() {
        match rewrite(item)? {
            Cow::Borrowed(_) => {
                if let Some(out) = rewritten.as_mut() {
                    out.push(item.clone());
                }
            }
            Cow::Owned(new_item) => {
                let out = rewritten.get_or_insert_with(|| items[..index].to_vec());
                out.push(new_item);
            }
        }
    }
    Ok(rewritten)
}

/// Copy of `map` with `key` set, keeping the position of an existing key
pub(crate) fn with_entry(map: &Map, key: &str, value: Value) -> Map {
    let mut map = map.clone();
    map.insert(key.to_string(), value);
    map
}

/// A single string or a list of strings, as accepted by `DependsOn` or IAM actions
pub(crate) fn string_list(value: &Value) -> Result<Vec<&str>> {
    match value {
        Value::String(s) => Ok(vec![s.as_str()]),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        other => Err(Error::type_mismatch("string or array of strings", other)),
    }
}

/// `us-east-1` -> `UsEast1`
///
/// Used to derive logical ids and condition names, which must be alphanumeric.
pub(crate) fn pascal_case(input: &str) -> String {
    input
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `First-Deploy` -> `first-deploy`
///
/// Lowercase, runs of anything but ascii alphanumerics collapse into a single `-`.
pub(crate) fn slug(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn naming() {
        assert_eq!(pascal_case("us-east-1"), "UsEast1");
        assert_eq!(pascal_case("dev"), "Dev");
        assert_eq!(pascal_case("my_big value"), "MyBigValue");
        assert_eq!(slug("First-Deploy"), "first-deploy");
        assert_eq!(slug("  Build & Test!! "), "build-test");
        assert_eq!(slug("---"), "");
    }

    #[test]
    fn rewrite_entries_reports_unchanged() {
        let map = Value::from(json!({"a": 1, "b": 2}));
        let map = map.as_object().unwrap();
        let rewritten = rewrite_entries(map, |_, v| Ok(Cow::Borrowed(v))).unwrap();
        assert!(rewritten.is_none());
    }

    #[test]
    fn rewrite_entries_keeps_order() {
        let map = Value::from(json!({"a": 1, "b": 2, "c": 3}));
        let map = map.as_object().unwrap();
        let rewritten = rewrite_entries(map, |k, v| {
            Ok(if k == "b" {
                Cow::Owned(Value::from("two"))
            } else {
                Cow::Borrowed(v)
            })
        })
        .unwrap()
        .unwrap();
        assert_eq!(Value::Object(rewritten), Value::from(json!({"a": 1, "b": "two", "c": 3})));
    }

    #[test]
    fn rewrite_items_copies_prefix() {
        let items = vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)];
        let rewritten = rewrite_items(&items, |v| {
            Ok(match v {
                Value::Integer(2) => Cow::Owned(Value::Null),
                other => Cow::Borrowed(other),
            })
        })
        .unwrap();
        assert_eq!(rewritten, Some(vec![Value::Integer(1), Value::Null, Value::Integer(3)]));
    }

    #[test]
    fn string_lists() {
        assert_eq!(string_list(&Value::from("a")).unwrap(), ["a"]);
        assert_eq!(string_list(&Value::from(json!(["a", "b"]))).unwrap(), ["a", "b"]);
        assert!(string_list(&Value::from(json!([1]))).is_err());
    }
}
