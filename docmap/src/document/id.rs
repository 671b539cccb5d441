use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Store-native document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(Ulid);

impl ObjectId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse an identifier from its string form. Returns `None` when the
    /// string is not a valid identifier.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim()).map(Self)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        let id = ObjectId::new();
        let lower = id.to_string().to_lowercase();
        assert_eq!(ObjectId::parse(&lower), Some(id));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ObjectId::parse("not-an-id"), None);
        assert_eq!(ObjectId::parse(""), None);
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let id = ObjectId::new();
        let padded = format!(" {id}\n");
        assert_eq!(padded.parse::<ObjectId>().ok(), Some(id));
        assert_eq!(ObjectId::parse(&padded), Some(id));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }
}
