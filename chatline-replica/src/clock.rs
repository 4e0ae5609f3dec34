//! Lamport clock discipline (spec.md §3) and the election lock guard
//! (spec.md §9: "model it as a guard object whose destruction releases").

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-replica Lamport counter. spec.md §3: "before emitting any message M,
/// LC ← LC+1 ... upon receiving any message M, LC ← max(LC, M.clock)." Both
/// operations are single `fetch`-style atomics here rather than a
/// `Mutex<u64>`: each is already an indivisible read-modify-write, so an
/// `AtomicU64` satisfies the "no partial exposure" requirement without a
/// lock, the way `busybee`'s sequence counters do.
#[derive(Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send-side tick: increment and return the new value to stamp on the
    /// outgoing message.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Receive-side observation: advance to at least `incoming`.
    pub fn observe(&self, incoming: u64) {
        let mut current = self.value.load(Ordering::SeqCst);
        while incoming > current {
            match self.value.compare_exchange_weak(current, incoming, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/////////////////////////////////////////////// ElectionGuard ///////////////////////////////////////

/// Non-blocking mutual-exclusion for election attempts (spec.md §3 "Election
/// Lock"; spec.md §8 property 7: "at most one election attempt per replica
/// is in flight at any moment").
#[derive(Clone, Default)]
pub struct ElectionLock {
    held: Arc<AtomicBool>,
}

impl ElectionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to acquire the lock without blocking. `None` means another
    /// election is already in flight.
    pub fn try_acquire(&self) -> Option<ElectionGuard> {
        if self.held.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            Some(ElectionGuard { held: self.held.clone() })
        } else {
            None
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// RAII handle on the election lock. Every path that acquires the lock —
/// self-win, concession, or an error partway through — releases it here, on
/// drop, including panics unwound through it.
pub struct ElectionGuard {
    held: Arc<AtomicBool>,
}

impl Drop for ElectionGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_strictly_increasing() {
        let clock = LamportClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(a < b);
    }

    #[test]
    fn observe_never_moves_backward() {
        let clock = LamportClock::new();
        clock.observe(10);
        assert_eq!(10, clock.get());
        clock.observe(3);
        assert_eq!(10, clock.get());
        clock.observe(41);
        assert_eq!(41, clock.get());
    }

    #[test]
    fn election_lock_excludes_a_second_concurrent_attempt() {
        let lock = ElectionLock::new();
        let guard = lock.try_acquire().expect("first acquire succeeds");
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }
}
