//! Item range of an iteration: `[start, end)` clamped to the item list.

use trellis_common::Value;

/// Integer part of a numeric or numeric-string attribute
fn parse_int(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(n) => *n,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if number.is_nan() {
        return None;
    }
    Some(number.trunc() as i64)
}

/// Declared start, never below zero
pub fn get_start(start: &Value) -> usize {
    parse_int(start).unwrap_or(0).max(0) as usize
}

/// Declared end when numeric, otherwise the item count. Never exceeds the
/// item count and is zero for an empty or missing list.
pub fn get_end(items: &Value, end: &Value) -> usize {
    let len = items.len().unwrap_or(0);
    if len == 0 {
        return 0;
    }
    match parse_int(end) {
        Some(end) => end.clamp(0, len as i64) as usize,
        None => len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: i32) -> Value {
        Value::list((0..n).map(Value::from))
    }

    #[test]
    fn test_start_is_clamped() {
        assert_eq!(get_start(&Value::Undefined), 0);
        assert_eq!(get_start(&Value::from(-4)), 0);
        assert_eq!(get_start(&Value::from(2.7)), 2);
        assert_eq!(get_start(&Value::from("3")), 3);
        assert_eq!(get_start(&Value::from("soon")), 0);
    }

    #[test]
    fn test_end_falls_back_to_length() {
        assert_eq!(get_end(&items(3), &Value::from(3)), 3);
        assert_eq!(get_end(&items(3), &Value::Undefined), 3);
        assert_eq!(get_end(&items(3), &Value::from(10)), 3);
        assert_eq!(get_end(&items(3), &Value::from(1)), 1);
        assert_eq!(get_end(&items(3), &Value::from(-1)), 0);
        assert_eq!(get_end(&items(0), &Value::from(2)), 0);
        assert_eq!(get_end(&Value::Undefined, &Value::from(2)), 0);
    }
}
