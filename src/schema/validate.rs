//! Runtime payload validation against a declared mapping.
//!
//! Validation is strict and fails fast: the first undeclared or invalid field
//! is reported with its dotted path.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::ValidationError;

use super::geo::validate_geo_shape;
use super::{FieldType, Mapping, MappingNode};

/// Largest magnitude a `float` field accepts (exclusive).
pub const FLOAT_MAX_MAGNITUDE: f64 = 3.4e38;

/// Validates `payload` against `mapping`.
///
/// `payload` must be a JSON object. Every present field must be declared;
/// `null` values are treated as absent. Arrays are accepted for any declared
/// field and each element is checked against the field's type.
pub fn validate(mapping: &Mapping, payload: &JsonValue) -> Result<(), ValidationError> {
    let JsonValue::Object(obj) = payload else {
        return Err(ValidationError::InvalidPayload {
            field: String::new(),
            reason: format!("event data must be a JSON object, got {}", kind_of(payload)),
        });
    };
    validate_object(mapping, obj, "")
}

fn validate_object(
    mapping: &Mapping,
    obj: &Map<String, JsonValue>,
    prefix: &str,
) -> Result<(), ValidationError> {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let Some(node) = mapping.get(key) else {
            return Err(ValidationError::UndeclaredField { field: path });
        };
        validate_node(node, value, &path)?;
    }
    Ok(())
}

fn validate_node(node: &MappingNode, value: &JsonValue, path: &str) -> Result<(), ValidationError> {
    match (node, value) {
        (_, JsonValue::Null) => Ok(()),
        (_, JsonValue::Array(items)) => items.iter().try_for_each(|v| validate_node(node, v, path)),
        (MappingNode::Object(children), JsonValue::Object(obj)) => {
            validate_object(children, obj, path)
        }
        (MappingNode::Object(_), other) => Err(ValidationError::InvalidPayload {
            field: path.to_string(),
            reason: format!("field '{path}' must be an object, got {}", kind_of(other)),
        }),
        (MappingNode::Field(field_type), value) => validate_value(*field_type, value, path),
    }
}

/// Checks one scalar value against its declared type.
pub(crate) fn validate_value(
    field_type: FieldType,
    value: &JsonValue,
    path: &str,
) -> Result<(), ValidationError> {
    match field_type {
        FieldType::String => {
            if value.is_string() {
                Ok(())
            } else {
                Err(expected(path, field_type, value))
            }
        }
        FieldType::Long | FieldType::Integer | FieldType::Short | FieldType::Byte => {
            validate_integral(field_type, value, path)
        }
        FieldType::Double => {
            if value.is_number() {
                Ok(())
            } else {
                Err(expected(path, field_type, value))
            }
        }
        FieldType::Float => {
            let Some(v) = value.as_f64() else {
                return Err(expected(path, field_type, value));
            };
            if v.abs() >= FLOAT_MAX_MAGNITUDE {
                return Err(ValidationError::OutOfRange {
                    field: path.to_string(),
                    expected: field_type,
                    value: value.to_string(),
                });
            }
            Ok(())
        }
        FieldType::Boolean => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(expected(path, field_type, value))
            }
        }
        FieldType::Binary => {
            let Some(s) = value.as_str() else {
                return Err(expected(path, field_type, value));
            };
            BASE64
                .decode(s)
                .map(|_| ())
                .map_err(|e| ValidationError::mismatch(path, field_type, format!("not base64: {e}")))
        }
        FieldType::Ip => {
            let Some(s) = value.as_str() else {
                return Err(expected(path, field_type, value));
            };
            if is_dotted_quad(s) {
                Ok(())
            } else {
                Err(ValidationError::mismatch(
                    path,
                    field_type,
                    format!("'{s}' is not a dotted-quad IPv4 address"),
                ))
            }
        }
        FieldType::Date => validate_date(value, path),
        FieldType::GeoPoint => validate_geo_point(value, path),
        FieldType::GeoShape => validate_geo_shape(value, path),
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn expected(path: &str, field_type: FieldType, value: &JsonValue) -> ValidationError {
    ValidationError::mismatch(path, field_type, format!("got {}", kind_of(value)))
}

fn integral(n: &Number) -> Option<i128> {
    if let Some(v) = n.as_i64() {
        return Some(i128::from(v));
    }
    if let Some(v) = n.as_u64() {
        return Some(i128::from(v));
    }
    let f = n.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e30 {
        #[allow(clippy::cast_possible_truncation)]
        return Some(f as i128);
    }
    None
}

fn validate_integral(field_type: FieldType, value: &JsonValue, path: &str) -> Result<(), ValidationError> {
    let JsonValue::Number(n) = value else {
        return Err(expected(path, field_type, value));
    };
    let Some(v) = integral(n) else {
        return Err(ValidationError::mismatch(
            path,
            field_type,
            format!("{n} is not an integral number"),
        ));
    };
    let bits = field_type.integral_bits().unwrap_or(64);
    let max = (1i128 << (bits - 1)) - 1;
    let min = -(1i128 << (bits - 1));
    if v < min || v > max {
        return Err(ValidationError::OutOfRange {
            field: path.to_string(),
            expected: field_type,
            value: n.to_string(),
        });
    }
    Ok(())
}

/// Dotted-quad IPv4 syntax, each octet 1-3 digits in 0..=255.
pub(crate) fn is_dotted_quad(s: &str) -> bool {
    let octets: Vec<&str> = s.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|o| {
            !o.is_empty()
                && o.len() <= 3
                && o.bytes().all(|b| b.is_ascii_digit())
                && o.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}

fn validate_date(value: &JsonValue, path: &str) -> Result<(), ValidationError> {
    match value {
        JsonValue::String(s) => {
            if DateTime::parse_from_rfc3339(s).is_ok()
                || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            {
                Ok(())
            } else {
                Err(ValidationError::mismatch(
                    path,
                    FieldType::Date,
                    format!("'{s}' is neither RFC3339 nor YYYY-MM-DD"),
                ))
            }
        }
        JsonValue::Number(n) => match integral(n) {
            Some(millis) if millis > 0 => Ok(()),
            _ => Err(ValidationError::mismatch(
                path,
                FieldType::Date,
                format!("{n} is not a positive epoch-millis integer"),
            )),
        },
        other => Err(expected(path, FieldType::Date, other)),
    }
}

fn validate_geo_point(value: &JsonValue, path: &str) -> Result<(), ValidationError> {
    let JsonValue::Object(obj) = value else {
        return Err(expected(path, FieldType::GeoPoint, value));
    };
    for key in ["lat", "lon"] {
        match obj.get(key) {
            Some(v) if v.is_number() => {}
            Some(other) => {
                return Err(ValidationError::mismatch(
                    path,
                    FieldType::GeoPoint,
                    format!("'{key}' must be a number, got {}", kind_of(other)),
                ))
            }
            None => {
                return Err(ValidationError::mismatch(
                    path,
                    FieldType::GeoPoint,
                    format!("missing '{key}'"),
                ))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(field_type: FieldType, value: JsonValue) -> Result<(), ValidationError> {
        let mapping = Mapping::new().field("f", field_type);
        validate(&mapping, &json!({ "f": value }))
    }

    #[test]
    fn integer_boundaries() {
        assert!(check(FieldType::Integer, json!(2_147_483_647i64)).is_ok());
        assert!(matches!(
            check(FieldType::Integer, json!(2_147_483_648i64)),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(check(FieldType::Integer, json!(-2_147_483_648i64)).is_ok());
        assert!(check(FieldType::Integer, json!(1.5)).is_err());
        assert!(check(FieldType::Integer, json!(17.0)).is_ok());
        assert!(check(FieldType::Integer, json!("17")).is_err());
    }

    #[test]
    fn short_and_byte_boundaries() {
        assert!(check(FieldType::Short, json!(-32768)).is_ok());
        assert!(check(FieldType::Short, json!(-32769)).is_err());
        assert!(check(FieldType::Short, json!(32767)).is_ok());
        assert!(check(FieldType::Byte, json!(127)).is_ok());
        assert!(check(FieldType::Byte, json!(128)).is_err());
        assert!(check(FieldType::Byte, json!(-128)).is_ok());
    }

    #[test]
    fn long_rejects_values_beyond_i64() {
        assert!(check(FieldType::Long, json!(i64::MAX)).is_ok());
        assert!(check(FieldType::Long, json!(u64::MAX)).is_err());
    }

    #[test]
    fn float_magnitude() {
        assert!(check(FieldType::Float, json!(3.3e38)).is_ok());
        assert!(check(FieldType::Float, json!(-3.3e38)).is_ok());
        assert!(matches!(
            check(FieldType::Float, json!(3.4e38)),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(check(FieldType::Float, json!(-3.5e38)).is_err());
        assert!(check(FieldType::Double, json!(3.5e38)).is_ok());
        assert!(check(FieldType::Double, json!(true)).is_err());
    }

    #[test]
    fn string_boolean_binary() {
        assert!(check(FieldType::String, json!("x")).is_ok());
        assert!(check(FieldType::String, json!(1)).is_err());
        assert!(check(FieldType::Boolean, json!(false)).is_ok());
        assert!(check(FieldType::Boolean, json!("false")).is_err());
        assert!(check(FieldType::Binary, json!("aGVsbG8=")).is_ok());
        assert!(check(FieldType::Binary, json!("not base64!")).is_err());
    }

    #[test]
    fn ip_addresses() {
        assert!(check(FieldType::Ip, json!("10.0.0.255")).is_ok());
        assert!(check(FieldType::Ip, json!("256.0.0.1")).is_err());
        assert!(check(FieldType::Ip, json!("10.0.0")).is_err());
        assert!(check(FieldType::Ip, json!("a.b.c.d")).is_err());
        assert!(check(FieldType::Ip, json!(10)).is_err());
    }

    #[test]
    fn dates() {
        assert!(check(FieldType::Date, json!("2016-07-01T12:00:00Z")).is_ok());
        assert!(check(FieldType::Date, json!("2016-07-01T12:00:00+02:00")).is_ok());
        assert!(check(FieldType::Date, json!("2016-07-01")).is_ok());
        assert!(check(FieldType::Date, json!(1_467_374_400_000i64)).is_ok());
        assert!(check(FieldType::Date, json!(0)).is_err());
        assert!(check(FieldType::Date, json!(-5)).is_err());
        assert!(check(FieldType::Date, json!("yesterday")).is_err());
    }

    #[test]
    fn geo_points() {
        assert!(check(FieldType::GeoPoint, json!({"lat": 1.5, "lon": -3})).is_ok());
        assert!(check(FieldType::GeoPoint, json!({"lat": 1.5})).is_err());
        assert!(check(FieldType::GeoPoint, json!({"lat": "1", "lon": 2})).is_err());
        assert!(check(FieldType::GeoPoint, json!("1,2")).is_err());
    }

    #[test]
    fn undeclared_fields_fail_with_path() {
        let mapping = Mapping::new().object("loc", Mapping::new().field("lat", FieldType::Double));
        let err = validate(&mapping, &json!({"loc": {"lat": 1.0, "lon": 2.0}})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UndeclaredField {
                field: "loc.lon".to_string()
            }
        );
    }

    #[test]
    fn nested_type_errors_name_the_path() {
        let mapping = Mapping::new().object("a", Mapping::new().field("n", FieldType::Short));
        let err = validate(&mapping, &json!({"a": {"n": 40000}})).unwrap_err();
        match err {
            ValidationError::OutOfRange { field, .. } => assert_eq!(field, "a.n"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(validate(&mapping, &json!({"a": 5})).is_err());
    }

    #[test]
    fn nulls_and_arrays() {
        let mapping = Mapping::new().field("n", FieldType::Integer);
        assert!(validate(&mapping, &json!({"n": null})).is_ok());
        assert!(validate(&mapping, &json!({"n": [1, 2, 3]})).is_ok());
        assert!(validate(&mapping, &json!({"n": [1, "x"]})).is_err());
        assert!(validate(&mapping, &json!([1])).is_err());
    }

    #[test]
    fn malformed_event_data_is_a_payload_error() {
        let mapping = Mapping::new().object("a", Mapping::new().field("n", FieldType::Short));
        assert_eq!(
            validate(&mapping, &json!({"a": "flat"})).unwrap_err(),
            ValidationError::InvalidPayload {
                field: "a".to_string(),
                reason: "field 'a' must be an object, got a string".to_string(),
            }
        );
        match validate(&mapping, &json!([1])).unwrap_err() {
            ValidationError::InvalidPayload { field, .. } => assert!(field.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
