//! Account pool for gateway credential rotation
//!
//! Manages a fixed set of upstream accounts, each represented by an opaque,
//! externally-owned authentication manager. The pool picks which manager
//! serves the next outbound call and tracks per-account health from reported
//! outcomes. Managers are identity-compared (`Arc::ptr_eq`); the pool never
//! inspects or mutates their contents.
//!
//! Request lifecycle:
//! 1. Gateway builds the pool once from its configured managers
//! 2. Request handler calls `select()` → random pick among non-cooling slots
//! 3. Handler performs the upstream call with the returned manager
//! 4. Handler reports the outcome: `record_success` clears the slot's health
//!    state, `record_error(status)` counts it and may start a cooldown
//!    (402/429 → long quota cooldown, 5xx or repeated failures → short backoff)
//! 5. Cooldowns expire by wall clock; an all-cooling pool still yields the
//!    slot that recovers soonest, so selection never starves
//!
//! Health state is in-memory only and discarded on shutdown.

pub mod error;
pub mod policy;
pub mod pool;

pub use error::{Error, Result};
pub use policy::{CooldownPolicy, FailureAction};
pub use pool::AccountPool;
