use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::codec::{DecodeResult, Reader, Writer};
use crate::error::FormatError;

/// Record identifier: `#cluster:position`.
///
/// A position of `-1` marks a record that has not been assigned a slot yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub cluster: i16,
    pub position: i64,
}

impl RecordId {
    pub const UNASSIGNED: i64 = -1;

    pub fn new(cluster: i16, position: i64) -> Self {
        Self { cluster, position }
    }

    /// Identifier for a record that will be created in `cluster`.
    pub fn unassigned(cluster: i16) -> Self {
        Self::new(cluster, Self::UNASSIGNED)
    }

    pub fn is_assigned(&self) -> bool {
        self.position >= 0
    }

    pub fn parse(input: &str) -> Result<Self, FormatError> {
        input.parse()
    }

    pub fn encode(&self, w: &mut Writer) {
        w.write_short(self.cluster).write_long(self.position);
    }

    pub fn decode(r: &mut Reader<'_>) -> DecodeResult<Self> {
        let cluster = r.read_short()?;
        let position = r.read_long()?;
        Ok(Self { cluster, position })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

impl FromStr for RecordId {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FormatError::InvalidRid(s.to_string());
        let body = s.strip_prefix('#').ok_or_else(invalid)?;
        let (cluster, position) = body.split_once(':').ok_or_else(invalid)?;

        let digits = position.strip_prefix('-').unwrap_or(position);
        if !is_digits(cluster) || !is_digits(digits) {
            return Err(invalid());
        }
        let cluster: i16 = cluster.parse().map_err(|_| invalid())?;
        let position: i64 = position.parse().map_err(|_| invalid())?;

        Ok(Self { cluster, position })
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        for (cluster, position) in [(0, 0), (12, 7), (5, -1), (i16::MAX, i64::MAX)] {
            let rid = RecordId::new(cluster, position);
            assert_eq!(RecordId::parse(&rid.to_string()).unwrap(), rid);
        }
        assert_eq!(RecordId::new(12, 7).to_string(), "#12:7");
    }

    #[test]
    fn malformed_strings_are_rejected() {
        for bad in [
            "12:7", "#12", "#a:7", "#12:x", "#:7", "#12:", "", "#-1:0", "#12:7:1", "# 12:7",
            "#1:+5", "#1:-", "#1: 5",
        ] {
            assert_eq!(
                RecordId::parse(bad),
                Err(FormatError::InvalidRid(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn binary_form() {
        let mut w = Writer::new();
        RecordId::new(3, 258).encode(&mut w);
        let bytes = w.freeze();
        assert_eq!(&bytes[..], &[0, 3, 0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(
            RecordId::decode(&mut Reader::new(&bytes)).unwrap(),
            RecordId::new(3, 258)
        );
    }

    #[test]
    fn serde_uses_the_string_form() {
        let rid = RecordId::new(9, 1);
        let json = serde_json::to_string(&rid).unwrap();
        assert_eq!(json, "\"#9:1\"");
        let back: RecordId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rid);
    }

    #[test]
    fn unassigned_position() {
        let rid = RecordId::unassigned(4);
        assert!(!rid.is_assigned());
        assert_eq!(rid.to_string(), "#4:-1");
    }
}
