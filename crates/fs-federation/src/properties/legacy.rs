//! Line-oriented legacy sidecar format.
//!
//! One value per line: `name (type) = value`. Multi-valued properties repeat
//! the name. Backslash, CR and LF in values are escaped.

use crate::error::{ConnectorError, Result};
use crate::types::{ExtraProperties, Value};

pub const LEGACY_EXTENSION: &str = ".modeshape";
pub const LEGACY_CONTENT_EXTENSION: &str = ".content.modeshape";

const HEADER: &str = "# extra properties";

pub fn encode(properties: &ExtraProperties) -> Result<Vec<u8>> {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (name, values) in properties {
        validate_name(name)?;
        for value in values {
            out.push_str(name);
            out.push_str(" (");
            out.push_str(value.type_name());
            out.push_str(") = ");
            out.push_str(&escape(&value.to_string()));
            out.push('\n');
        }
    }
    Ok(out.into_bytes())
}

pub fn decode(bytes: &[u8]) -> Result<ExtraProperties> {
    let text = std::str::from_utf8(bytes)
        .map_err(|error| ConnectorError::Serialization(format!("legacy sidecar: {error}")))?;

    let mut properties = ExtraProperties::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = || {
            ConnectorError::Serialization(format!(
                "legacy sidecar line {}: malformed entry '{line}'",
                index + 1
            ))
        };
        let (head, raw_value) = line.split_once(" = ").ok_or_else(malformed)?;
        let (name, type_part) = head.rsplit_once(" (").ok_or_else(malformed)?;
        let type_name = type_part.strip_suffix(')').ok_or_else(malformed)?;
        let value = Value::parse_typed(type_name, &unescape(raw_value))?;
        properties.entry(name.to_string()).or_default().push(value);
    }
    Ok(properties)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('#') || name.contains(" = ") || name.contains('\n') {
        return Err(ConnectorError::InvalidInput(format!(
            "property name '{name}' cannot be stored in a legacy sidecar"
        )));
    }
    Ok(())
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_value() {
        let mut properties = ExtraProperties::new();
        properties.insert("extraProp".into(), vec![Value::from("extraValue")]);
        properties.insert("tags".into(), vec![Value::from("a"), Value::from("b")]);
        let text = String::from_utf8(encode(&properties).expect("encode")).expect("utf8");

        assert!(text.contains("extraProp (string) = extraValue\n"));
        assert!(text.contains("tags (string) = a\ntags (string) = b\n"));
        assert_eq!(decode(text.as_bytes()).expect("decode"), properties);
    }

    #[test]
    fn multiline_values_are_escaped() {
        let mut properties = ExtraProperties::new();
        properties.insert("note".into(), vec![Value::from("line1\nline2 \\ end")]);
        properties.insert("count".into(), vec![Value::Long(42)]);
        properties.insert("flag".into(), vec![Value::Boolean(true)]);
        let bytes = encode(&properties).expect("encode");
        assert_eq!(decode(&bytes).expect("decode"), properties);
    }

    #[test]
    fn malformed_lines_are_reported() {
        let error = decode(b"no separator here\n").expect_err("malformed");
        assert!(error.to_string().contains("line 1"));
    }

    #[test]
    fn names_with_separator_are_rejected() {
        let mut properties = ExtraProperties::new();
        properties.insert("a = b".into(), vec![Value::from("x")]);
        assert!(encode(&properties).is_err());
    }
}
