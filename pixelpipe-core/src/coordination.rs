//! Deduplication of concurrent work that shares a key
//!
//! The first caller for a key becomes the leader and runs its work function.
//! Callers arriving while the leader runs become waiters and do not run
//! anything. When the leader succeeds its value is handed to every waiter.
//! When it fails, or its future is dropped, the oldest live waiter is
//! promoted and runs its own work function from scratch; the rest keep
//! waiting on the new leader. A key never stays blocked: the slot is removed
//! as soon as nobody is left to lead.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use tokio::sync::oneshot;
use tracing::debug;

/// Whether concurrent work for the same key is shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationPolicy {
    #[default]
    Deduplicate,
    /// Every caller runs its own work
    Uncoordinated,
}

enum Handoff<T> {
    Resolved(T),
    /// The previous leader gave up; the receiver leads now
    Lead,
}

struct Slot<T> {
    waiters: VecDeque<oneshot::Sender<Handoff<T>>>,
}

type Slots<T> = Mutex<HashMap<String, Slot<T>>>;

pub struct RequestCoordinator<T> {
    policy: CoordinationPolicy,
    slots: Slots<T>,
}

impl<T: Clone + Send + 'static> RequestCoordinator<T> {
    pub fn new(policy: CoordinationPolicy) -> Self {
        Self {
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> CoordinationPolicy {
        self.policy
    }

    /// Keys with a leader currently running
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }

    /// Callers currently waiting on `key`
    pub fn waiters(&self, key: &str) -> usize {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.waiters.len())
            .unwrap_or(0)
    }

    /// Run `work`, or wait for an identical in-flight run to finish
    ///
    /// Without a key (or when uncoordinated) `work` simply runs.
    pub async fn run<F, Fut, E>(&self, key: Option<&str>, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match (self.policy, key) {
            (CoordinationPolicy::Deduplicate, Some(key)) => key,
            _ => return work().await,
        };

        loop {
            let receiver = {
                let mut slots = self.slots.lock();
                match slots.get_mut(key) {
                    Some(slot) => {
                        let (sender, receiver) = oneshot::channel();
                        slot.waiters.push_back(sender);
                        Some(receiver)
                    }
                    None => {
                        slots.insert(
                            key.to_string(),
                            Slot {
                                waiters: VecDeque::new(),
                            },
                        );
                        None
                    }
                }
            };

            let Some(receiver) = receiver else {
                break;
            };

            debug!("Waiting on in-flight request {}", key);
            let mut waiter = Waiter {
                slots: &self.slots,
                key,
                receiver,
            };
            match (&mut waiter.receiver).await {
                Ok(Handoff::Resolved(value)) => return Ok(value),
                Ok(Handoff::Lead) => {
                    debug!("Promoted to leader for {}", key);
                    break;
                }
                // Slot went away without a handoff; start over
                Err(_) => continue,
            }
        }

        let leader = Leader {
            slots: &self.slots,
            key,
            finished: false,
        };
        let result = work().await;
        if let Ok(value) = &result {
            leader.succeed(value);
        }
        result
    }
}

impl<T: Clone + Send + 'static> Default for RequestCoordinator<T> {
    fn default() -> Self {
        Self::new(CoordinationPolicy::default())
    }
}

/// Pass leadership to the oldest live waiter, or remove the slot
fn hand_off<T>(slots: &Slots<T>, key: &str) {
    let mut slots = slots.lock();
    let Some(slot) = slots.get_mut(key) else {
        return;
    };
    while let Some(waiter) = slot.waiters.pop_front() {
        if waiter.send(Handoff::Lead).is_ok() {
            return;
        }
    }
    slots.remove(key);
}

/// Held by the running leader; hands off unless it finished successfully
struct Leader<'a, T> {
    slots: &'a Slots<T>,
    key: &'a str,
    finished: bool,
}

impl<T: Clone> Leader<'_, T> {
    fn succeed(mut self, value: &T) {
        self.finished = true;
        let slot = self.slots.lock().remove(self.key);
        if let Some(slot) = slot {
            if !slot.waiters.is_empty() {
                debug!("Sharing result of {} with {} waiters", self.key, slot.waiters.len());
            }
            for waiter in slot.waiters {
                let _ = waiter.send(Handoff::Resolved(value.clone()));
            }
        }
    }
}

impl<T> Drop for Leader<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            hand_off(self.slots, self.key);
        }
    }
}

/// A registered waiter; if it is dropped holding an unclaimed
/// leadership, it passes that on
struct Waiter<'a, T> {
    slots: &'a Slots<T>,
    key: &'a str,
    receiver: oneshot::Receiver<Handoff<T>>,
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        self.receiver.close();
        if let Ok(Handoff::Lead) = self.receiver.try_recv() {
            hand_off(self.slots, self.key);
        }
    }
}
