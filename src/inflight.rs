//! Serialization of overlapping identical requests.
//!
//! Two calls whose endpoint and body are identical share a
//! [`RequestFingerprint`]. When the client is built with
//! `serialize_identical_requests(true)`, the second call waits for the first
//! to finish before it starts its own attempts.

use crate::metadata::RequestSpec;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Identifies logically equivalent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(u64);

impl RequestFingerprint {
    /// Hashes the endpoint and the serialized body. Headers are ignored.
    pub fn of(spec: &RequestSpec) -> Self {
        let mut hasher = DefaultHasher::new();
        spec.endpoint.as_str().hash(&mut hasher);
        spec.body.to_string().hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

type Slots = HashMap<RequestFingerprint, Arc<AsyncMutex<()>>>;

/// Hands out one async lock per fingerprint.
///
/// Entries are dropped as soon as nobody holds or waits for them.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder of `fingerprint` is active, then returns a
    /// guard that releases the slot on drop.
    pub async fn acquire(&self, fingerprint: RequestFingerprint) -> InFlightGuard {
        let slot = {
            let mut slots = self.lock_slots();
            slots.entry(fingerprint).or_default().clone()
        };

        if slot.try_lock().is_err() {
            tracing::debug!(
                fingerprint = fingerprint.as_u64(),
                "Identical request in flight - waiting"
            );
        }

        let guard = slot.lock_owned().await;
        InFlightGuard {
            registry: self.clone(),
            fingerprint,
            guard: Some(guard),
        }
    }

    /// Number of fingerprints currently held or awaited.
    pub fn active(&self) -> usize {
        self.lock_slots().len()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases an [`InFlightRegistry`] slot when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightRegistry,
    fingerprint: RequestFingerprint,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.registry.lock_slots();
        // Only the map itself still references the slot.
        let idle = slots
            .get(&self.fingerprint)
            .is_some_and(|slot| Arc::strong_count(slot) == 1);
        if idle {
            slots.remove(&self.fingerprint);
        }
    }
}
