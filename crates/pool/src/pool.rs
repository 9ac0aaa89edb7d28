//! Slot health tracking and random account selection
//!
//! The pool wraps each manager in a slot with a stable index and keeps the
//! two health maps (cooldown expiry, consecutive-error count) behind one
//! mutex so both are updated atomically. The slot list itself is fixed at
//! construction and iterated without the lock.
//!
//! Selection is uniformly random over non-cooling slots, which spreads load
//! across healthy accounts without converging on a "first" one. When every
//! slot is cooling, the slot that recovers soonest is returned anyway so the
//! gateway keeps serving during a total outage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::RngExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::policy::{CooldownPolicy, FailureAction};

/// One account's pool membership: a stable index plus the externally-owned
/// manager it wraps.
struct Slot<M> {
    index: usize,
    manager: Arc<M>,
}

/// Mutable per-slot health, keyed by slot index. Absent entry means
/// available now / zero consecutive errors.
#[derive(Default)]
struct HealthState {
    cooldowns: HashMap<usize, Instant>,
    errors: HashMap<usize, u32>,
}

/// Account pool rotating across a fixed set of authentication managers.
///
/// Generic over the manager type `M`, which the pool treats as opaque:
/// managers are held as `Arc<M>` and matched back to their slot by pointer
/// identity, never by value. Two slots holding equal-looking credentials are
/// tracked independently.
///
/// All operations are synchronous, in-memory, and safe to call from any
/// thread or task; share the pool via `Arc` across request handlers.
pub struct AccountPool<M> {
    slots: Vec<Slot<M>>,
    health: Mutex<HealthState>,
    policy: CooldownPolicy,
}

impl<M> AccountPool<M> {
    /// Create a pool with the default cooldown policy.
    ///
    /// Slot *i* wraps `managers[i]`; input order is preserved and indices are
    /// never reassigned. Duplicate `Arc`s are allowed and produce duplicate
    /// slots (reports resolve to the first matching slot).
    pub fn new(managers: Vec<Arc<M>>) -> Self {
        Self::with_policy(managers, CooldownPolicy::default())
    }

    /// Create a pool with an explicit cooldown policy.
    pub fn with_policy(managers: Vec<Arc<M>>, policy: CooldownPolicy) -> Self {
        let slots: Vec<Slot<M>> = managers
            .into_iter()
            .enumerate()
            .map(|(index, manager)| Slot { index, manager })
            .collect();
        info!(slots = slots.len(), "account pool initialized");
        Self {
            slots,
            health: Mutex::new(HealthState::default()),
            policy,
        }
    }

    /// Pick a manager for the next upstream call.
    ///
    /// Returns a uniformly-random manager among slots whose cooldown has
    /// expired (or was never set). If every slot is cooling, returns the one
    /// whose cooldown expires soonest — still unhealthy, but the gateway
    /// keeps serving rather than refusing all traffic. `None` only for an
    /// empty pool. Never mutates health state.
    pub fn select(&self) -> Option<Arc<M>> {
        if self.slots.is_empty() {
            return None;
        }

        let now = Instant::now();
        let state = self.lock();

        let available: Vec<&Slot<M>> = self
            .slots
            .iter()
            .filter(|slot| {
                state
                    .cooldowns
                    .get(&slot.index)
                    .is_none_or(|until| *until <= now)
            })
            .collect();

        if !available.is_empty() {
            let pick = available[rand::rng().random_range(0..available.len())];
            debug!(slot = pick.index, candidates = available.len(), "selected");
            metrics::counter!("pool_selections_total", "outcome" => "available").increment(1);
            return Some(Arc::clone(&pick.manager));
        }

        // Every slot is cooling; yield the soonest to recover. Ties keep the
        // first minimum in slot order (not a guarantee).
        let soonest = self
            .slots
            .iter()
            .min_by_key(|slot| state.cooldowns.get(&slot.index).copied().unwrap_or(now))?;
        let remaining = state
            .cooldowns
            .get(&soonest.index)
            .map(|until| until.saturating_duration_since(now).as_secs())
            .unwrap_or(0);
        warn!(
            slot = soonest.index,
            cooldown_remaining_secs = remaining,
            "all slots cooling, falling back to soonest recovery"
        );
        metrics::counter!("pool_selections_total", "outcome" => "fallback").increment(1);
        Some(Arc::clone(&soonest.manager))
    }

    /// Report a successful call for `manager`.
    ///
    /// Resets the slot's consecutive-error count and clears any cooldown, so
    /// the account is immediately selectable again. A manager that doesn't
    /// belong to this pool is ignored; a report racing a reconfigured caller
    /// must not take down request handling.
    pub fn record_success(&self, manager: &Arc<M>) {
        let Some(index) = self.find_slot(manager) else {
            warn!("success report for manager not in pool, ignoring");
            return;
        };
        let mut state = self.lock();
        let was_cooling = state.cooldowns.remove(&index).is_some();
        state.errors.remove(&index);
        if was_cooling {
            info!(slot = index, "slot recovered, cooldown cleared");
        } else {
            debug!(slot = index, "success recorded");
        }
    }

    /// Report a failed call for `manager` with its HTTP-style status code.
    ///
    /// Increments the slot's consecutive-error count, then applies the
    /// cooldown policy: 402/429 start the long quota cooldown, a 5xx or
    /// reaching the consecutive-failure threshold starts the short backoff,
    /// anything else is tolerated. An existing cooldown is only ever
    /// extended, never shortened, and the error count is only reset by
    /// success. Unknown managers are ignored as in `record_success`.
    pub fn record_error(&self, manager: &Arc<M>, status: u16) {
        let Some(index) = self.find_slot(manager) else {
            warn!(status, "error report for manager not in pool, ignoring");
            return;
        };

        let mut state = self.lock();
        let consecutive = {
            let count = state.errors.entry(index).or_insert(0);
            *count += 1;
            *count
        };

        let action = self.policy.classify(status, consecutive);
        let Some(cooldown) = self.policy.cooldown(action) else {
            debug!(
                slot = index,
                status, consecutive, "failure tolerated, no cooldown"
            );
            return;
        };
        let reason = if action == FailureAction::QuotaCooldown {
            "quota"
        } else {
            "failure"
        };

        let until = Instant::now() + cooldown;
        let entry = state.cooldowns.entry(index).or_insert(until);
        if until > *entry {
            *entry = until;
        }

        info!(
            slot = index,
            status,
            consecutive,
            cooldown_secs = cooldown.as_secs(),
            reason,
            "slot entering cooldown"
        );
        metrics::counter!("pool_cooldowns_total", "reason" => reason).increment(1);
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots not currently cooling.
    pub fn available_count(&self) -> usize {
        let now = Instant::now();
        let state = self.lock();
        self.slots
            .iter()
            .filter(|slot| {
                state
                    .cooldowns
                    .get(&slot.index)
                    .is_none_or(|until| *until <= now)
            })
            .count()
    }

    /// Pool health summary for a gateway health endpoint.
    ///
    /// Status rollup: all slots available → healthy, some → degraded, none
    /// (or empty pool) → unhealthy. Read-only.
    pub fn health(&self) -> serde_json::Value {
        let now = Instant::now();
        let state = self.lock();

        let mut slots = Vec::with_capacity(self.slots.len());
        let mut available_count = 0usize;

        for slot in &self.slots {
            let errors = state.errors.get(&slot.index).copied().unwrap_or(0);
            match state.cooldowns.get(&slot.index) {
                Some(until) if *until > now => {
                    slots.push(serde_json::json!({
                        "index": slot.index,
                        "status": "cooling",
                        "cooldown_remaining_secs": (*until - now).as_secs(),
                        "consecutive_errors": errors,
                    }));
                }
                _ => {
                    available_count += 1;
                    slots.push(serde_json::json!({
                        "index": slot.index,
                        "status": "available",
                        "consecutive_errors": errors,
                    }));
                }
            }
        }

        let total = self.slots.len();
        let status = if available_count == total && total > 0 {
            "healthy"
        } else if available_count > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "slots_total": total,
            "slots_available": available_count,
            "slots_cooling": total - available_count,
            "slots": slots,
        })
    }

    /// Resolve a manager back to its slot index by pointer identity.
    /// First match wins when the same `Arc` occupies multiple slots.
    fn find_slot(&self, manager: &Arc<M>) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| Arc::ptr_eq(&slot.manager, manager))
            .map(|slot| slot.index)
    }

    /// Lock the health maps, recovering from poisoning. No critical section
    /// can leave the maps half-updated, so the state is usable either way.
    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }
}
