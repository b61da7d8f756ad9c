//! Domain Layer
//!
//! Ports (trait abstractions over storage tiers and event sinks) and the
//! typed events that flow between components.
//!
//! - **Ports** (`ports.rs`) - `TierStore`, `EventPublisher`, `Tier`
//! - **Events** (`events.rs`) - `CacheEvent` notifications
//!
//! # Usage
//!
//! ```ignore
//! use otakon_cache::domain::{TierStore, Tier};
//!
//! async fn warm<T: TierStore + ?Sized>(store: &T, entry: CacheEntry) -> Result<()> {
//!     assert_eq!(store.tier(), Tier::Local);
//!     store.set(entry).await
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::{CacheEvent, EvictionReason};
pub use ports::{EventPublisher, Tier, TierStore};
