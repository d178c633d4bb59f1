//! autoprov-state — persisted demand counts and local object caches.
//!
//! Backed by [redb](https://docs.rs/redb), the `StateStore` is the
//! reference metrics store: it keeps the latest cumulative count each
//! node reported per (app, zone) and answers summed, monotonic counts.
//! It also records the app instances created by auto-provisioning.
//!
//! # Architecture
//!
//! ```text
//! StateStore (redb, JSON values)
//!   ├── counts     "{app}|{zone}|{node}" → NodeCount
//!   └── app_insts  "{app}|{zone}"        → AppInst
//!
//! CacheData (in-memory mirror of replicated definitions)
//!   ├── apps, policies, app_insts, cluster_insts, alerts
//!   └── update/delete callbacks per cache
//! ```
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod cache;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use cache::{Cache, CacheData, Keyed};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
