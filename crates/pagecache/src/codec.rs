//! Payload serialization boundary
//!
//! Tiers only ever see [`Payload`]: encoded bytes plus the schema tag and
//! codec version they were produced with. Typed encode/decode happens at the
//! call site through a [`Codec`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Serializer used to move business data in and out of the cache
pub trait Codec: Send + Sync + 'static {
    /// Version stamped on every payload this codec produces
    fn format_version(&self) -> u32;

    /// Serialize `value`
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value of type `T`
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON codec backed by serde_json
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format_version(&self) -> u32 {
        1
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Stable name identifying a payload type in storage
///
/// The name is persisted with every payload and checked on decode, so it
/// must not change while stored data of that type is expected to restore.
pub trait Schema {
    /// Schema name, e.g. `"feed.v1"`
    const NAME: &'static str;
}

/// Type-erased business data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    schema: String,
    format_version: u32,
}

impl Payload {
    /// Encode `value` with `codec`, tagging it with the schema of `T`
    pub fn encode<C: Codec, T: Serialize + Schema>(codec: &C, value: &T) -> Result<Self> {
        Ok(Self {
            bytes: codec.encode(value)?,
            schema: T::NAME.to_string(),
            format_version: codec.format_version(),
        })
    }

    /// Rebuild a payload from stored parts
    pub fn from_parts(bytes: Vec<u8>, schema: String, format_version: u32) -> Self {
        Self {
            bytes,
            schema,
            format_version,
        }
    }

    /// Decode as `T`; schema or version mismatches are codec errors
    pub fn decode<C: Codec, T: DeserializeOwned + Schema>(&self, codec: &C) -> Result<T> {
        if self.format_version != codec.format_version() {
            return Err(Error::Codec(format!(
                "format version {} does not match codec version {}",
                self.format_version,
                codec.format_version()
            )));
        }
        let expected = T::NAME;
        if self.schema != expected {
            return Err(Error::Codec(format!(
                "payload schema '{}' does not match '{}'",
                self.schema, expected
            )));
        }
        codec.decode(&self.bytes)
    }

    /// Encoded bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Schema tag
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Codec version
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Split into `(bytes, schema, format_version)`
    pub fn into_parts(self) -> (Vec<u8>, String, u32) {
        (self.bytes, self.schema, self.format_version)
    }
}
