//! Opaque network state documents

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A network state document as produced or consumed by nmstate.
///
/// The content is never interpreted here; it is handed around as raw bytes
/// (YAML or JSON) and only the extraction views in `nmstate-core` look
/// inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub raw: Vec<u8>,
}

impl State {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self { raw: raw.into() }
    }

    /// True for documents that contain nothing but whitespace
    pub fn is_empty(&self) -> bool {
        self.raw.iter().all(|b| b.is_ascii_whitespace())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Lossy UTF-8 view, suitable for logs and diagnostics
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

impl From<String> for State {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&str> for State {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.raw))
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.raw))
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(State::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_only_state_is_empty() {
        assert!(State::default().is_empty());
        assert!(State::from(" \n\t").is_empty());
        assert!(!State::from("interfaces: []").is_empty());
    }

    #[test]
    fn test_state_serializes_as_text() {
        let state = State::from("interfaces: []\n");
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "\"interfaces: []\\n\"");

        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
