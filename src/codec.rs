//! Text codecs converting store values to and from their stored form.
//!
//! The default is JSON via `serde_json`. Custom codecs are plain closure
//! pairs, so either direction can be overridden on its own.

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;

use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Encode function stored by a [`Codec`].
pub type EncodeFn<T> = Rc<dyn Fn(&T) -> Result<String, CodecError>>;
/// Decode function stored by a [`Codec`].
pub type DecodeFn<T> = Rc<dyn Fn(&str) -> Result<T, CodecError>>;

/// A bijective text encoding for `T`.
///
/// `decode(encode(v))` must reproduce `v` for every value the store holds.
pub struct Codec<T> {
    encode: EncodeFn<T>,
    decode: DecodeFn<T>,
}

impl<T> Clone for Codec<T> {
    fn clone(&self) -> Self {
        Self {
            encode: Rc::clone(&self.encode),
            decode: Rc::clone(&self.decode),
        }
    }
}

impl<T> std::fmt::Debug for Codec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

impl<T> Codec<T> {
    /// Build a codec from an encode/decode pair.
    pub fn from_fns(
        encode: impl Fn(&T) -> Result<String, CodecError> + 'static,
        decode: impl Fn(&str) -> Result<T, CodecError> + 'static,
    ) -> Self {
        Self {
            encode: Rc::new(encode),
            decode: Rc::new(decode),
        }
    }

    pub(crate) fn from_parts(encode: EncodeFn<T>, decode: DecodeFn<T>) -> Self {
        Self { encode, decode }
    }

    pub(crate) fn encoder(&self) -> EncodeFn<T> {
        Rc::clone(&self.encode)
    }

    pub(crate) fn decoder(&self) -> DecodeFn<T> {
        Rc::clone(&self.decode)
    }

    /// Encode `value` to text.
    ///
    /// # Errors
    ///
    /// Returns the encoder's [`CodecError`].
    pub fn encode(&self, value: &T) -> Result<String, CodecError> {
        (self.encode)(value)
    }

    /// Decode stored `text`.
    ///
    /// # Errors
    ///
    /// Returns the decoder's [`CodecError`] for malformed text.
    pub fn decode(&self, text: &str) -> Result<T, CodecError> {
        (self.decode)(text)
    }
}

impl<T: Serialize + DeserializeOwned + 'static> Codec<T> {
    /// The default JSON codec.
    #[must_use]
    pub fn json() -> Self {
        Self::from_parts(json_encoder(), json_decoder())
    }
}

pub(crate) fn json_encoder<T: Serialize + 'static>() -> EncodeFn<T> {
    Rc::new(|value: &T| serde_json::to_string(value).map_err(CodecError::from))
}

pub(crate) fn json_decoder<T: DeserializeOwned + 'static>() -> DecodeFn<T> {
    Rc::new(|text: &str| serde_json::from_str(text).map_err(CodecError::from))
}
