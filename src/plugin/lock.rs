//! Single-flight construction lock
//!
//! Serializes construction per plugin identity. The first caller for a key
//! becomes the leader and holds the identity lock until its guard drops.
//! Callers arriving meanwhile wait for the leader to finish and then return
//! as followers without constructing anything; they are expected to check
//! the cache again.
//!
//! A leader that constructs a referenced plugin may itself have to wait on
//! another leader. Those waits are recorded per held identity, and a wait
//! that would close a cycle is refused with [`Flight::Cycle`].

use crate::core::sync::recover_mutex;
use crate::plugin::types::PluginKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

#[derive(Debug)]
struct Entry {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Identity the leader of this one is blocked on
    waiting_on: Option<PluginKey>,
}

type LockTable = Arc<Mutex<HashMap<PluginKey, Entry>>>;

/// Outcome of [`ConstructionLocks::acquire`]
#[derive(Debug)]
pub enum Flight {
    /// This caller owns the identity until the guard is dropped
    Leader(FlightGuard),
    /// Another caller held the identity and has since released it
    Follower,
    /// Waiting would deadlock; the keys form the cycle, first and last equal
    Cycle(Vec<PluginKey>),
}

impl Flight {
    pub fn is_leader(&self) -> bool {
        matches!(self, Flight::Leader(_))
    }
}

/// Held by the leader for one identity
#[derive(Debug)]
pub struct FlightGuard {
    key: PluginKey,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FlightGuard {
    pub fn key(&self) -> &PluginKey {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Unpublish first so no new follower can queue on a lock that is
        // about to be released
        recover_mutex(self.table.lock()).remove(&self.key);
        self.guard.take();
    }
}

#[derive(Debug, Default)]
pub struct ConstructionLocks {
    table: LockTable,
}

impl ConstructionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `key` for a caller that holds no other identity
    pub async fn acquire(&self, key: &PluginKey) -> Flight {
        self.acquire_in(key, &[]).await
    }

    /// Acquire `key` for a caller already leading every key in `held`
    pub async fn acquire_in(&self, key: &PluginKey, held: &[PluginKey]) -> Flight {
        let existing = {
            let mut table = recover_mutex(self.table.lock());
            match table.get(key).map(|entry| entry.lock.clone()) {
                Some(lock) => {
                    if let Some(cycle) = find_cycle(&table, key, held) {
                        return Flight::Cycle(cycle);
                    }
                    for held_key in held {
                        if let Some(entry) = table.get_mut(held_key) {
                            entry.waiting_on = Some(key.clone());
                        }
                    }
                    lock
                }
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    match lock.clone().try_lock_owned() {
                        Ok(guard) => {
                            table.insert(
                                key.clone(),
                                Entry {
                                    lock,
                                    waiting_on: None,
                                },
                            );
                            return Flight::Leader(FlightGuard {
                                key: key.clone(),
                                table: self.table.clone(),
                                guard: Some(guard),
                            });
                        }
                        // unreachable for a fresh lock
                        Err(_) => lock,
                    }
                }
            }
        };

        log::trace!("Waiting for construction of {} to finish", key);
        drop(existing.lock().await);

        let mut table = recover_mutex(self.table.lock());
        for held_key in held {
            if let Some(entry) = table.get_mut(held_key) {
                if entry.waiting_on.as_ref() == Some(key) {
                    entry.waiting_on = None;
                }
            }
        }
        Flight::Follower
    }

    /// Wait until this caller is leader for `key`
    pub async fn acquire_exclusive(&self, key: &PluginKey) -> FlightGuard {
        loop {
            if let Flight::Leader(guard) = self.acquire(key).await {
                return guard;
            }
        }
    }

    /// Number of identities currently held
    pub fn in_flight(&self) -> usize {
        recover_mutex(self.table.lock()).len()
    }
}

/// Follow waits-for edges from `key`; a cycle exists when they reach `held`
fn find_cycle(
    table: &HashMap<PluginKey, Entry>,
    key: &PluginKey,
    held: &[PluginKey],
) -> Option<Vec<PluginKey>> {
    let mut path = vec![key.clone()];
    let mut current = key;
    loop {
        if let Some(start) = held.iter().position(|k| k == current) {
            let mut cycle = held[start..].to_vec();
            cycle.extend(path);
            return Some(cycle);
        }
        let next = table.get(current)?.waiting_on.as_ref()?;
        if path.contains(next) {
            return None;
        }
        path.push(next.clone());
        current = next;
    }
}
