//! Construction options for [`ReaperStore`](crate::ReaperStore).
//!
//! DESIGN
//! ======
//! Options always carry a complete codec. For serde types they start from the
//! JSON codec and each direction can be swapped independently; other types
//! supply a full [`Codec`] up front.

#[cfg(test)]
#[path = "options_test.rs"]
mod options_test;

use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{Codec, json_decoder, json_encoder};
use crate::error::CodecError;

/// When a store listens for changes made by other contexts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Listen from construction until `destroy()` or drop.
    #[default]
    Eager,
    /// Listen only while at least one subscription is alive.
    WhileObserved,
}

/// Options accepted by the store constructors.
pub struct Options<T> {
    pub(crate) codec: Codec<T>,
    pub(crate) sync: SyncPolicy,
}

impl<T> Clone for Options<T> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            sync: self.sync,
        }
    }
}

impl<T> std::fmt::Debug for Options<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options").field("sync", &self.sync).finish_non_exhaustive()
    }
}

impl<T: Serialize + DeserializeOwned + 'static> Default for Options<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned + 'static> Options<T> {
    /// JSON codec, eager sync.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(Codec::json())
    }
}

impl<T: 'static> Options<T> {
    /// Use `codec` for both directions.
    #[must_use]
    pub fn with_codec(codec: Codec<T>) -> Self {
        Self {
            codec,
            sync: SyncPolicy::default(),
        }
    }

    /// Replace the encoder, keeping the current decoder.
    #[must_use]
    pub fn serialize(mut self, encode: impl Fn(&T) -> Result<String, CodecError> + 'static) -> Self {
        self.codec = Codec::from_parts(Rc::new(encode), self.codec.decoder());
        self
    }

    /// Replace the decoder, keeping the current encoder.
    #[must_use]
    pub fn deserialize(mut self, decode: impl Fn(&str) -> Result<T, CodecError> + 'static) -> Self {
        self.codec = Codec::from_parts(self.codec.encoder(), Rc::new(decode));
        self
    }

    /// Choose when the store listens for cross-context changes.
    #[must_use]
    pub fn sync(mut self, policy: SyncPolicy) -> Self {
        self.sync = policy;
        self
    }

    #[must_use]
    pub fn codec(&self) -> &Codec<T> {
        &self.codec
    }

    #[must_use]
    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync
    }
}

impl<T: Serialize + DeserializeOwned + 'static> From<SyncPolicy> for Options<T> {
    fn from(policy: SyncPolicy) -> Self {
        Self::new().sync(policy)
    }
}

/// JSON options with the encoder side kept, for callers that only need to
/// customise decoding of legacy text.
#[must_use]
pub fn json_with_decoder<T>(decode: impl Fn(&str) -> Result<T, CodecError> + 'static) -> Options<T>
where
    T: Serialize + 'static,
{
    Options::with_codec(Codec::from_parts(json_encoder(), Rc::new(decode)))
}

/// JSON options with the decoder side kept, for callers that only need a
/// custom text layout on write.
#[must_use]
pub fn json_with_encoder<T>(encode: impl Fn(&T) -> Result<String, CodecError> + 'static) -> Options<T>
where
    T: DeserializeOwned + 'static,
{
    Options::with_codec(Codec::from_parts(Rc::new(encode), json_decoder()))
}
