use std::sync::atomic::{AtomicUsize, Ordering};

use crate::health::HealthTracker;
use crate::registry::{ProviderRegistry, RegisteredProvider};

/// Round-robin over active providers.
///
/// Each call starts scanning one past the index it returned last time, so
/// repeated selections spread evenly across every active provider.
#[derive(Debug, Default)]
pub struct ProviderSelector {
    next: AtomicUsize,
}

impl ProviderSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when every provider is inactive (or none are registered).
    ///
    /// Choosing and advancing the cursor is one atomic update, so concurrent
    /// callers never claim the same slot.
    pub fn select<'a>(
        &self,
        registry: &'a ProviderRegistry,
        health: &HealthTracker,
    ) -> Option<&'a RegisteredProvider> {
        let len = registry.len();
        if len == 0 {
            return None;
        }
        let mut chosen = None;
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                chosen = first_active(registry, health, cursor % len);
                chosen.map(|index| (index + 1) % len)
            })
            .ok()?;
        chosen.and_then(|index| registry.get(index))
    }
}

fn first_active(registry: &ProviderRegistry, health: &HealthTracker, start: usize) -> Option<usize> {
    let len = registry.len();
    (0..len).map(|offset| (start + offset) % len).find(|&index| {
        registry
            .get(index)
            .is_some_and(|candidate| health.is_active(&candidate.descriptor.name))
    })
}
