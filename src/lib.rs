//! Reactive key/value stores persisted to browser storage.
//!
//! A [`ReaperStore`] holds one value under one storage key. Local writes are
//! persisted immediately; writes made by other contexts sharing the same
//! storage area (other tabs) are adopted as they arrive, and observers are
//! told about both.
//!
//! | Module | Role |
//! |--------|------|
//! | [`store`] | The store itself: construction, mutation, sync, lifecycle |
//! | [`view`] | Cached views for in-place nested mutation |
//! | [`subscription`] | Observer registration guards |
//! | [`storage`] | Storage and change-feed protocols |
//! | [`memory`] | In-memory backend with simulated contexts |
//! | `web` | `window.localStorage` backend (`hydrate` feature) |
//! | [`codec`] | Value to text conversion, JSON by default |
//! | [`options`] | Codec and sync policy selection |
//! | [`error`] | Error types and stable codes |
//!
//! The crate never installs a `tracing` subscriber; hosts choose their own.

pub mod codec;
pub mod error;
pub mod memory;
pub mod options;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod view;
#[cfg(feature = "hydrate")]
pub mod web;

pub use codec::Codec;
pub use error::{CodecError, ErrorCode, StorageError, StoreError};
pub use memory::{MemoryArea, MemoryContext};
pub use options::{Options, SyncPolicy};
pub use storage::{Backend, ChangeFeed, ChangeListener, ListenerId, Storage, StorageChange};
pub use store::ReaperStore;
pub use subscription::Subscription;
pub use view::{Entry, JsonView, Projection, View};
#[cfg(feature = "hydrate")]
pub use web::LocalStorage;
