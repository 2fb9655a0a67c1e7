//! Dotted path helpers shared by the attribute store, the expression service
//! and the global registry.

use crate::error::{CommonError, CommonResult};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Splits a normalized `a.b.c` expression into its segments
pub fn split_path(expression: &str) -> Vec<&str> {
    if expression.is_empty() {
        return Vec::new();
    }
    expression.split('.').collect()
}

/// True for segments that address a list slot (`0`, `12`)
pub fn is_index_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Looks up one segment on a container without evaluating the result.
///
/// Maps are keyed lookups, lists accept numeric indexes and `length`, strings
/// expose `length`. Anything else yields `Undefined`.
pub fn lookup(container: &Value, segment: &str) -> Value {
    match container {
        Value::Map(map) => map.borrow().get(segment).cloned().unwrap_or_default(),
        Value::List(list) => {
            let list = list.borrow();
            if segment == "length" {
                return Value::from(list.len());
            }
            segment
                .parse::<usize>()
                .ok()
                .and_then(|index| list.get(index).cloned())
                .unwrap_or_default()
        }
        Value::String(s) if segment == "length" => Value::from(s.chars().count()),
        _ => Value::Undefined,
    }
}

/// Walks `segments` starting at `container`.
///
/// Lazy values met on the way are evaluated before the next step unless `raw`
/// is set. The walk stops at the first `Undefined` or `Null` and returns it.
pub fn resolve_path<S: AsRef<str>>(segments: &[S], container: &Value, raw: bool) -> Value {
    let mut current = container.clone();
    for segment in segments {
        if current.is_undefined_or_null() {
            return current;
        }
        if !raw {
            current = current.evaluated();
        }
        current = lookup(&current, segment.as_ref());
    }
    if !raw {
        current = current.evaluated();
    }
    current
}

/// Furthest a list write may land past the current end
pub const MAX_INDEX_GAP: usize = 1024;

/// Writes `value` into `container` at `segment`. Returns false when the
/// container cannot hold keyed values or the index is out of range.
pub fn put(container: &Value, segment: &str, value: Value) -> bool {
    try_put(container, segment, value).unwrap_or(false)
}

/// Like [`put`], but list indexes more than [`MAX_INDEX_GAP`] past the end
/// are an error. `Ok(false)` when the container cannot hold keyed values.
pub fn try_put(container: &Value, segment: &str, value: Value) -> CommonResult<bool> {
    match container {
        Value::Map(map) => {
            map.borrow_mut().insert(segment.to_string(), value);
            Ok(true)
        }
        Value::List(list) => {
            let Ok(index) = segment.parse::<usize>() else {
                return Ok(false);
            };
            let mut list = list.borrow_mut();
            let len = list.len();
            if index > len.saturating_add(MAX_INDEX_GAP) {
                return Err(CommonError::IndexOutOfRange { index, len });
            }
            if index >= len {
                list.resize(index + 1, Value::Undefined);
            }
            list[index] = value;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Finds a key on a map that matches `segment` ignoring ASCII case
pub fn find_case_insensitive(container: &Value, segment: &str) -> Option<String> {
    match container {
        Value::Map(map) => map
            .borrow()
            .keys()
            .find(|key| key.as_str() != segment && key.eq_ignore_ascii_case(segment))
            .cloned(),
        _ => None,
    }
}

/// Empty container for an intermediate segment: a list when the following
/// segment is an index, a map otherwise.
pub fn container_for(next_segment: &str) -> Value {
    if is_index_segment(next_segment) {
        Value::List(Rc::new(RefCell::new(Vec::new())))
    } else {
        Value::empty_map()
    }
}
