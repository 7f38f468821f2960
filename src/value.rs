//! Retained topic values.
//!
//! Values are plain JSON documents so every retained value can be compared,
//! persisted in a snapshot and moved across threads through the deferred
//! queue. Byte strings are arrays of integers in `0..=255`.

use serde_json::Number;
pub use serde_json::Value;

/// Compact rendering of a value for error messages and log fields.
///
/// Long documents are cut at `MAX_PREVIEW` characters.
pub fn preview(value: &Value) -> String {
    const MAX_PREVIEW: usize = 64;
    let mut s = value.to_string();
    if s.chars().count() > MAX_PREVIEW {
        s = s.chars().take(MAX_PREVIEW).collect::<String>() + "…";
    }
    s
}

/// Equality that treats `1`, `1.0` and `1u64` as the same number.
///
/// `serde_json::Number` compares its representation, which makes an integer
/// option never match a float payload.
pub fn loose_eq(
    a: &Value,
    b: &Value,
) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_eq(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| loose_eq(l, r))
        }
        _ => a == b,
    }
}

fn number_eq(
    x: &Number,
    y: &Number,
) -> bool {
    match (as_i128(x), as_i128(y)) {
        (Some(l), Some(r)) => l == r,
        _ => match (x.as_f64(), y.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        },
    }
}

/// Exact integer view of a JSON number, if it holds one.
pub fn as_i128(n: &Number) -> Option<i128> {
    if let Some(v) = n.as_i64() {
        Some(v as i128)
    } else {
        n.as_u64().map(|v| v as i128)
    }
}

/// Builds a JSON integer from an `i128` when it fits in 64 bits.
pub fn from_i128(v: i128) -> Option<Value> {
    if let Ok(i) = i64::try_from(v) {
        Some(Value::from(i))
    } else if let Ok(u) = u64::try_from(v) {
        Some(Value::from(u))
    } else {
        None
    }
}

/// Truthiness used by reducers: null, false, zero and empty containers are
/// false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Integers and floats with the same magnitude compare equal.
    #[test]
    fn test_loose_eq_numbers() {
        assert!(loose_eq(&json!(15), &json!(15.0)));
        assert!(loose_eq(&json!([1, 2]), &json!([1.0, 2])));
        assert!(!loose_eq(&json!(15), &json!("15")));
        assert!(loose_eq(&json!(u64::MAX), &json!(u64::MAX)));
    }

    /// `from_i128` covers the union of the i64 and u64 ranges.
    #[test]
    fn test_from_i128_bounds() {
        assert_eq!(from_i128(-1), Some(json!(-1)));
        assert_eq!(from_i128(u64::MAX as i128), Some(json!(u64::MAX)));
        assert_eq!(from_i128(u64::MAX as i128 + 1), None);
    }

    /// Previews of large documents are truncated.
    #[test]
    fn test_preview_truncates() {
        let long = Value::String("x".repeat(200));
        assert!(preview(&long).chars().count() <= 65);
        assert_eq!(preview(&json!(1)), "1");
    }

    /// Zero, empty and null are falsy.
    #[test]
    fn test_is_truthy() {
        for v in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([])] {
            assert!(!is_truthy(&v), "{v}");
        }
        for v in [json!(true), json!(2), json!(-0.5), json!("x"), json!([0])] {
            assert!(is_truthy(&v), "{v}");
        }
    }
}
