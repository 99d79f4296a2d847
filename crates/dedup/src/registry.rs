//! In-memory bookkeeping of items being compressed and items recently
//! compressed.
//!
//! A compression writes to the filesystem, which makes the media index fire a
//! change notification for the very file that was just produced. The cooldown
//! map lets callers ignore those echoes; the in-flight set keeps two triggers
//! from compressing the same item at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::ItemId;

/// In-flight entries older than this are treated as abandoned
pub const DEFAULT_IN_FLIGHT_TTL_SECS: i64 = 10 * 60;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One in-flight claim. `owner` tells a reclaimed entry apart from the one
/// it replaced.
#[derive(Debug, Clone, Copy)]
struct InFlightEntry {
    marked_at: DateTime<Utc>,
    owner: u64,
}

/// Process-wide registry shared by every trigger source via `Arc`
pub struct ProcessingRegistry {
    clock: Arc<dyn Clock>,
    in_flight_ttl: Duration,
    next_owner: AtomicU64,
    in_flight: Mutex<HashMap<ItemId, InFlightEntry>>,
    cooldown_until: Mutex<HashMap<ItemId, DateTime<Utc>>>,
}

impl ProcessingRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), Duration::seconds(DEFAULT_IN_FLIGHT_TTL_SECS))
    }

    pub fn with_clock(clock: Arc<dyn Clock>, in_flight_ttl: Duration) -> Self {
        Self {
            clock,
            in_flight_ttl,
            next_owner: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
            cooldown_until: Mutex::new(HashMap::new()),
        }
    }

    fn is_stale(&self, entry: &InFlightEntry, now: DateTime<Utc>) -> bool {
        now - entry.marked_at >= self.in_flight_ttl
    }

    fn new_entry(&self, now: DateTime<Utc>) -> InFlightEntry {
        InFlightEntry {
            marked_at: now,
            owner: self.next_owner.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn is_in_flight(&self, id: &ItemId) -> bool {
        let now = self.clock.now();
        lock(&self.in_flight)
            .get(id)
            .is_some_and(|entry| !self.is_stale(entry, now))
    }

    /// Idempotent; re-marking keeps the original start instant
    pub fn mark_in_flight(&self, id: &ItemId) {
        let now = self.clock.now();
        let entry = self.new_entry(now);
        lock(&self.in_flight).entry(id.clone()).or_insert(entry);
    }

    /// Returns whether the id was present. Clearing twice is harmless.
    pub fn clear_in_flight(&self, id: &ItemId) -> bool {
        let removed = lock(&self.in_flight).remove(id).is_some();
        if !removed {
            debug!("clear_in_flight for {} which was not in flight", id);
        }
        removed
    }

    /// Check-and-mark under a single lock. The returned guard clears the
    /// entry when dropped, whichever way the attempt ends.
    pub fn try_begin(self: &Arc<Self>, id: &ItemId) -> Option<InFlightGuard> {
        let now = self.clock.now();
        let mut in_flight = lock(&self.in_flight);
        if let Some(entry) = in_flight.get(id) {
            if !self.is_stale(entry, now) {
                return None;
            }
            warn!(
                "Reclaiming abandoned in-flight entry for {} (marked at {})",
                id, entry.marked_at
            );
        }
        let entry = self.new_entry(now);
        in_flight.insert(id.clone(), entry);
        drop(in_flight);

        Some(InFlightGuard {
            registry: Arc::clone(self),
            id: id.clone(),
            owner: entry.owner,
            released: false,
        })
    }

    /// Remove the entry only while `owner` still holds it
    fn clear_owned(&self, id: &ItemId, owner: u64) -> bool {
        let mut in_flight = lock(&self.in_flight);
        match in_flight.get(id) {
            Some(entry) if entry.owner == owner => {
                in_flight.remove(id);
                true
            }
            Some(_) => {
                debug!("In-flight entry for {} was reclaimed, leaving it to its new owner", id);
                false
            }
            None => false,
        }
    }

    pub fn start_cooldown(&self, id: &ItemId, duration: Duration) {
        let until = self.clock.now() + duration;
        lock(&self.cooldown_until).insert(id.clone(), until);
    }

    /// Expired entries are dropped on the way out
    pub fn is_cooling_down(&self, id: &ItemId) -> bool {
        let now = self.clock.now();
        let mut cooldowns = lock(&self.cooldown_until);
        match cooldowns.get(id) {
            Some(until) if now < *until => true,
            Some(_) => {
                cooldowns.remove(id);
                false
            }
            None => false,
        }
    }

    /// Drop expired cooldowns and abandoned in-flight entries. Returns how
    /// many entries were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();

        let mut cooldowns = lock(&self.cooldown_until);
        let before = cooldowns.len();
        cooldowns.retain(|_, until| now < *until);
        let cooldowns_removed = before - cooldowns.len();
        drop(cooldowns);

        let mut in_flight = lock(&self.in_flight);
        let before = in_flight.len();
        in_flight.retain(|id, entry| {
            let stale = self.is_stale(entry, now);
            if stale {
                warn!("Dropping abandoned in-flight entry for {}", id);
            }
            !stale
        });
        let in_flight_removed = before - in_flight.len();

        if cooldowns_removed + in_flight_removed > 0 {
            debug!(
                "Pruned {} cooldown(s) and {} in-flight entr(ies)",
                cooldowns_removed, in_flight_removed
            );
        }
        cooldowns_removed + in_flight_removed
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn cooldown_count(&self) -> usize {
        lock(&self.cooldown_until).len()
    }
}

impl Default for ProcessingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds an item in flight until dropped or released
pub struct InFlightGuard {
    registry: Arc<ProcessingRegistry>,
    id: ItemId,
    owner: u64,
    released: bool,
}

impl InFlightGuard {
    pub fn id(&self) -> &ItemId {
        &self.id
    }

    /// Clear now and report whether this guard still owned the entry
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry.clear_owned(&self.id, self.owner)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.clear_owned(&self.id, self.owner);
        }
    }
}
