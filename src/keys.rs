//! Canonical cache keys.
//!
//! Field keys qualify a field name with a stable rendering of its arguments
//! so that semantically equal argument sets always land on the same record
//! or link, across writes and reads alike.

use crate::json_ext::Object;
use crate::json_ext::Value;

/// Returns the canonical field key for a field name and its arguments.
///
/// `name` when the arguments are absent or empty, `name({...})` otherwise.
/// The argument rendering sorts object keys recursively, so key order in the
/// incoming arguments is immaterial.
pub fn key_of_field(name: &str, args: Option<&Object>) -> String {
    match args {
        Some(args) if !args.is_empty() => format!("{name}({})", stringify_args(args)),
        _ => name.to_string(),
    }
}

/// Joins a parent key with a child key into a fully qualified key.
pub fn join_keys(parent: &str, child: &str) -> String {
    format!("{parent}.{child}")
}

fn stringify_args(args: &Object) -> String {
    let mut out = String::new();
    write_object(&mut out, args);
    out
}

fn write_object(out: &mut String, object: &Object) {
    let mut keys: Vec<&str> = object.keys().map(|key| key.as_str()).collect();
    keys.sort_unstable();

    out.push('{');
    for (index, key) in keys.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        if let Some(value) = object.get(*key) {
            write_value(out, value);
        }
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(string) => write_string(out, string.as_str()),
        Value::Array(values) => {
            out.push('[');
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, value);
            }
            out.push(']');
        }
        Value::Object(object) => write_object(out, object),
    }
}

fn write_string(out: &mut String, string: &str) {
    // serde_json's escaping rules, so the rendering matches what a JSON
    // consumer would produce for the same argument value
    match serde_json::to_string(string) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}
