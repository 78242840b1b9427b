//! Value codecs
//!
//! The cache never interprets stored bytes; a [`Codec`] turns values into
//! bytes on `put` and back on `get`.

use std::io::{Read, Write};

use diskstore::CodecError;

/// Serializes values of one type to and from entry files
pub trait Codec<K: ?Sized>: Send + Sync + 'static {
    /// Type of cached values
    type Value;

    /// Write `value` to `sink`; the sink is flushed and closed for you
    fn to_disk(&self, key: &K, value: &Self::Value, sink: &mut dyn Write) -> Result<(), CodecError>;

    /// Rebuild a value from `source`
    fn from_disk(&self, key: &K, source: &mut dyn Read) -> Result<Self::Value, CodecError>;
}

/// Stores raw bytes unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl<K: ?Sized> Codec<K> for BytesCodec {
    type Value = Vec<u8>;

    fn to_disk(&self, _key: &K, value: &Vec<u8>, sink: &mut dyn Write) -> Result<(), CodecError> {
        sink.write_all(value)?;
        Ok(())
    }

    fn from_disk(&self, _key: &K, source: &mut dyn Read) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Stores UTF-8 text; reading invalid UTF-8 is a codec error
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl<K: ?Sized> Codec<K> for Utf8Codec {
    type Value = String;

    fn to_disk(&self, _key: &K, value: &String, sink: &mut dyn Write) -> Result<(), CodecError> {
        sink.write_all(value.as_bytes())?;
        Ok(())
    }

    fn from_disk(&self, _key: &K, source: &mut dyn Read) -> Result<String, CodecError> {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
