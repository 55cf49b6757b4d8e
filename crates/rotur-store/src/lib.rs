//! # rotur-store
//!
//! In-memory state of the rotur backend, persisted as one JSON file per
//! collection. Every collection sits behind its own reader/writer lock and
//! is written back asynchronously through an atomic temp-file rename.
//!
//! [`Store`] is the single entry point: domain operations (users, economy,
//! posts, items, keys, billing, followers, groups, systems) are methods on
//! it, implemented in the module named after their area. The per-user OFSF
//! file store is reached through [`Store::ofsf`].

pub mod billing;
pub mod collection;
pub mod models;
pub mod ofsf;
pub mod persist;

mod economy;
mod error;
mod followers;
mod groups;
mod items;
mod keys;
mod posts;
mod store;
mod systems;
mod users;

pub use billing::{EvictedHolder, SubscriptionStatus, SweepReport};
pub use error::{Result, StoreError};
pub use models::*;
pub use ofsf::{Command, CommandKind, OfsfStore, UpdateReport};
pub use store::{BackgroundOptions, Store, StorePaths};
