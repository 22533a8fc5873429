//! JSON sidecar serialization.

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::types::ExtraProperties;

pub const JSON_EXTENSION: &str = ".modeshape.json";
pub const JSON_CONTENT_EXTENSION: &str = ".modeshape.content.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SidecarDocument {
    #[serde(default)]
    properties: ExtraProperties,
}

pub fn encode(properties: &ExtraProperties) -> Result<Vec<u8>> {
    let document = SidecarDocument {
        properties: properties.clone(),
    };
    serde_json::to_vec_pretty(&document)
        .map_err(|error| ConnectorError::Serialization(format!("json sidecar encode: {error}")))
}

pub fn decode(bytes: &[u8]) -> Result<ExtraProperties> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ExtraProperties::new());
    }
    let document: SidecarDocument = serde_json::from_slice(bytes)
        .map_err(|error| ConnectorError::Serialization(format!("json sidecar parse: {error}")))?;
    Ok(document.properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn document_wraps_properties() {
        let mut properties = ExtraProperties::new();
        properties.insert("extraProp".into(), vec![Value::from("extraValue")]);
        let bytes = encode(&properties).expect("encode");
        let text = String::from_utf8(bytes.clone()).expect("utf8");
        assert!(text.contains("\"properties\""));
        assert!(text.contains("\"extraValue\""));
        assert_eq!(decode(&bytes).expect("decode"), properties);
    }

    #[test]
    fn blank_sidecar_is_empty() {
        assert!(decode(b"  \n").expect("decode").is_empty());
        assert!(decode(b"{}").expect("decode").is_empty());
    }

    #[test]
    fn corrupt_sidecar_is_a_serialization_error() {
        let error = decode(b"{not json").expect_err("corrupt");
        assert!(matches!(error, ConnectorError::Serialization(_)));
    }
}
