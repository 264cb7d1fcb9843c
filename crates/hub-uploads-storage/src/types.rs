//! Backend-neutral upload and funding types

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Result of a successful upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Gateway URI the content can be fetched from
    pub uri: String,
    /// Backend-assigned content identifier
    pub cid: String,
}

impl UploadResult {
    /// Build the result for `cid` served from `gateway`
    ///
    /// The URI is always `gateway + "/" + cid`; a trailing slash on the
    /// gateway base is not doubled.
    pub fn new(gateway: &str, cid: impl Into<String>) -> Self {
        let cid = cid.into();
        Self {
            uri: format!("{}/{}", gateway.trim_end_matches('/'), cid),
            cid,
        }
    }
}

/// Storage price in the backend's atomic unit (e.g. winston for arweave)
///
/// Serialized as a decimal string since prices routinely exceed the range
/// JSON numbers can carry without loss.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(pub u128);

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_matches('"').parse().map(Price)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata tag attached to an uploaded blob
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The `Content-Type` tag gateways use to serve the blob
    pub fn content_type(value: impl Into<String>) -> Self {
        Self::new("Content-Type", value)
    }
}
