//! Backend collaborators of the desk.
//!
//! - `client`: REST operations on conversations
//! - `resolver`: Private/public endpoint selection
//! - `kv_store`: Key-value persistence for the resolved route
//! - `records`: Raw conversation records and derived views
//! - `poller`: Active conversation list refresh
//! - `error`: Backend error type

pub mod client;
pub mod error;
pub mod kv_store;
pub mod poller;
pub mod records;
pub mod resolver;

pub use client::{ApiFuture, ConversationApi, ConversationQuery, HttpConversationApi};
pub use error::{BackendError, BackendResult};
pub use kv_store::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore, StoreFuture};
pub use poller::{ActiveConversationPoller, DateRange, fetch_active};
pub use records::{
    ActiveConversation, ActiveConversations, ConversationKind, ConversationRecord,
    ConversationSnapshot,
};
pub use resolver::{EndpointResolver, ResolvedEndpoints, Route};
