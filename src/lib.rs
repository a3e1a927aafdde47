//! # blobdepot
//!
//! A virtual blob group: logical keys mapped onto physical blob locations,
//! split between a lightweight per-client agent and an authoritative depot.
//! - Identifier leasing per storage channel with trim on reconnect
//! - Garbage-collection push/trim that never races in-flight commits
//! - Resumable, paginated range resolve over a durable index
//! - Commit validation against allocation state and collection barriers
//! - Lazy import of ranges from a predecessor group while decommissioning
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   Register / AllocateIds / Commit / Resolve   ┌──────────────┐
//! │    Agent     │ ────────────────────────────────────────────► │    Depot     │
//! │ (id leases)  │ ◄──────────────────────────────────────────── │ (authority)  │
//! └──────────────┘        results, PushNotify (same link)        └──────┬───────┘
//!                                                                       │
//!                              ┌────────────────────────────────────────┤
//!                              │                                        │
//!                              ▼                                        ▼
//!                       ┌─────────────┐                          ┌─────────────┐
//!                       │ IndexEngine │                          │ Predecessor │
//!                       │ WAL+MemTable│                          │   group     │
//!                       │  + tables   │                          │ (decommit)  │
//!                       └─────────────┘                          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod types;

pub mod engine;
pub mod memtable;
pub mod storage;
pub mod wal;

pub mod agent;
pub mod depot;
pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use agent::{Agent, DepotLink};
pub use config::Config;
pub use depot::{Depot, DepotOutput};
pub use engine::IndexEngine;
pub use error::{DepotError, Result};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blobdepot
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
