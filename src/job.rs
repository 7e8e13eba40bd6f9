//! Job templates.
//!
//! A trigger's job is a JSON object whose strings may reference event data
//! with `$field` placeholders (dotted paths reach nested fields). Templates
//! are instantiated structurally:
//!
//! - a string that is exactly `$field` becomes the field's JSON value, type intact;
//! - `$field` inside a longer string is replaced by the value's text form;
//! - `$$` is a literal `$`;
//! - placeholders naming absent fields are left as written.
//!
//! Object keys are never rewritten, so the instance is always valid JSON.

use serde_json::{Map, Value as JsonValue};

use crate::error::ValidationError;

/// Checks that a job template is a JSON object.
pub fn validate_template(template: &JsonValue) -> Result<(), ValidationError> {
    if template.is_object() {
        Ok(())
    } else {
        Err(ValidationError::InvalidJobTemplate {
            reason: format!("job template must be a JSON object, got {template}"),
        })
    }
}

/// Instantiates `template` against event `data`.
#[must_use]
pub fn instantiate(template: &JsonValue, data: &JsonValue) -> JsonValue {
    match template {
        JsonValue::String(s) => substitute(s, data),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(|v| instantiate(v, data)).collect()),
        JsonValue::Object(obj) => JsonValue::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), instantiate(v, data)))
                .collect::<Map<String, JsonValue>>(),
        ),
        other => other.clone(),
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Length in bytes of the placeholder path starting at `s`.
///
/// Dots are part of the path only when followed by another path character,
/// so a sentence-ending `.` is not swallowed.
fn token_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut end = 0;
    while end < bytes.len() {
        let c = bytes[end] as char;
        if is_token_char(c) {
            end += 1;
        } else if c == '.' && end > 0 && bytes.get(end + 1).is_some_and(|&b| is_token_char(b as char)) {
            end += 1;
        } else {
            break;
        }
    }
    end
}

fn lookup<'a>(data: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(data, |current, seg| match current {
        JsonValue::Object(obj) => obj.get(seg),
        JsonValue::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn text_form(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute(s: &str, data: &JsonValue) -> JsonValue {
    if let Some(path) = s.strip_prefix('$') {
        if !path.is_empty() && token_len(path) == path.len() {
            if let Some(value) = lookup(data, path) {
                return value.clone();
            }
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }
        let len = token_len(after);
        let path = &after[..len];
        match (len, lookup(data, path)) {
            (0, _) | (_, None) => {
                out.push('$');
                out.push_str(path);
            }
            (_, Some(value)) => out.push_str(&text_form(value)),
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    JsonValue::String(out)
}
