//! External collaborator abstractions
//!
//! Trait seams for the request store, user directory, field catalog, option
//! catalogs and history sink, plus their bindings: REST over HTTP, an
//! in-process snapshot store and a read-through cache.

pub mod cache;
pub mod http;
pub mod memory;
pub mod store;

pub use cache::CatalogCache;
pub use http::HttpStoreClient;
pub use memory::{InMemoryStore, WorkspaceSnapshot};
pub use store::{
    FieldDefinitionSource, HistorySink, OptionCatalogSource, RequestStore, StoreError,
    UserDirectory, WorkflowBackend,
};
