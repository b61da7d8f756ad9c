//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                             │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    Ports (Traits)                         │  │
//! │  │            TierStore      │      EventPublisher           │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                      │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │ HttpRemoteStore │ InMemoryRemoteStore                     │  │
//! │  │ TracingEventPublisher │ BroadcastEventPublisher │ ...     │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The memory and local tiers live in [`crate::cache`] because the unified
//! cache depends on their concrete inspection methods.
//!
//! # Usage
//!
//! ```ignore
//! use otakon_cache::adapters::{HttpRemoteConfig, HttpRemoteStore};
//!
//! let remote = HttpRemoteStore::new(HttpRemoteConfig::default(), "user-1", token)?;
//! service.authenticate("user-1", Arc::new(remote)).await?;
//! ```

pub mod event_publisher;
pub mod remote_http;
pub mod remote_memory;

pub use event_publisher::{
    BroadcastEventPublisher, CompositeEventPublisher, EventRecorder, EventSeverity,
    TracingEventPublisher, DEFAULT_EVENT_CAPACITY,
};
pub use remote_http::{classify_status, HttpRemoteConfig, HttpRemoteStore, RemoteRow};
pub use remote_memory::InMemoryRemoteStore;
