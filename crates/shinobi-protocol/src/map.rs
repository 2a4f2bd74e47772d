//! Level payloads carried by `SYNCED MAP::`.
//!
//! The host ships its current level as a compact JSON document. JSON only
//! allows `|` and `>` inside strings, so both are written as `\u` escapes:
//! the frame delimiter can never appear in the payload and a trailing
//! `>>>clientId` target is never ambiguous.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ProtocolError;

/// A serialized level, ready to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapPayload(String);

impl MapPayload {
    /// Serializes any level document.
    pub fn from_value<T: Serialize>(level: &T) -> Result<Self, ProtocolError> {
        let json = serde_json::to_string(level).map_err(ProtocolError::Encode)?;
        Ok(Self(escape(&json)))
    }

    /// Compacts a JSON document read from a level file.
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(ProtocolError::Decode)?;
        Self::from_value(&value)
    }

    /// Wraps a payload received from the network.
    pub fn from_wire(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        if raw.contains('|') {
            return Err(ProtocolError::InvalidField {
                field: "map_payload",
                value: raw.chars().take(32).collect(),
            });
        }
        Ok(Self(raw))
    }

    /// Deserializes the level into the caller's type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_str(&self.0).map_err(ProtocolError::Decode)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

fn escape(json: &str) -> String {
    json.replace('|', "\\u007c").replace('>', "\\u003e")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Level {
        name: String,
        tiles: Vec<(i32, i32)>,
    }

    #[test]
    fn test_from_value_escapes_delimiter_and_marker() {
        let level = Level {
            name: "pipe|dream>>>client_1".into(),
            tiles: vec![(0, 1)],
        };
        let payload = MapPayload::from_value(&level).unwrap();

        assert!(!payload.as_str().contains('|'));
        assert!(!payload.as_str().contains(">>>"));
        assert_eq!(payload.parse::<Level>().unwrap(), level);
    }

    #[test]
    fn test_from_json_str_compacts_whitespace() {
        let payload = MapPayload::from_json_str("{\n  \"name\": \"cave\",\n  \"tiles\": []\n}").unwrap();
        assert_eq!(payload.as_str(), r#"{"name":"cave","tiles":[]}"#);
    }

    #[test]
    fn test_from_json_str_invalid_json_is_error() {
        assert!(matches!(
            MapPayload::from_json_str("{not json"),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_from_wire_rejects_delimiter() {
        assert!(MapPayload::from_wire("{}").is_ok());
        assert!(MapPayload::from_wire("{|}").is_err());
    }
}
