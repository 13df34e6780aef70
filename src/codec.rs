use crate::core::{ProxyError, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::str::FromStr;

/// Wire format used for operation arguments, results and log envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Compact binary encoding via MessagePack.
    #[default]
    MessagePack,
    /// Human readable JSON, handy when inspecting a log by hand.
    Json,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::MessagePack => rmp_serde::to_vec_named(value)
                .map_err(|err| ProxyError::SerializationError(err.to_string())),
            Self::Json => serde_json::to_vec(value)
                .map_err(|err| ProxyError::SerializationError(err.to_string())),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::MessagePack => rmp_serde::from_slice(bytes)
                .map_err(|err| ProxyError::SerializationError(err.to_string())),
            Self::Json => serde_json::from_slice(bytes)
                .map_err(|err| ProxyError::SerializationError(err.to_string())),
        }
    }
}

impl FromStr for Codec {
    type Err = ProxyError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(Self::MessagePack),
            "json" => Ok(Self::Json),
            other => Err(ProxyError::ConfigError(format!("unknown codec '{}'", other))),
        }
    }
}
