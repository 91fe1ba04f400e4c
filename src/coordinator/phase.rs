use std::sync::atomic::{AtomicU8, Ordering};

/// Step of a market's ingestion cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarketPhase {
    /// No cycle in flight, the market's lock is clear.
    Idle = 0,
    Fetching = 1,
    Decoding = 2,
    /// Queue read behind the checkpoint.
    Regressed = 3,
    /// Overwritten records skipped, checkpoint advanced.
    GapSkipped = 4,
    Delivering = 5,
}

impl MarketPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MarketPhase::Fetching,
            2 => MarketPhase::Decoding,
            3 => MarketPhase::Regressed,
            4 => MarketPhase::GapSkipped,
            5 => MarketPhase::Delivering,
            _ => MarketPhase::Idle,
        }
    }
}

/// Per-market cycle lock holding the current phase.
#[derive(Debug, Default)]
pub(crate) struct PhaseLock(AtomicU8);

impl PhaseLock {
    pub(crate) fn phase(&self) -> MarketPhase {
        MarketPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves the market from `Idle` to `Fetching`, `None` if a cycle is
    /// already in flight.
    pub(crate) fn try_acquire(&self) -> Option<PhaseGuard<'_>> {
        self.0
            .compare_exchange(
                MarketPhase::Idle as u8,
                MarketPhase::Fetching as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| PhaseGuard(&self.0))
    }
}

/// Held for the duration of a cycle, returns the market to `Idle` when
/// dropped on any exit path.
#[derive(Debug)]
pub(crate) struct PhaseGuard<'a>(&'a AtomicU8);

impl PhaseGuard<'_> {
    pub(crate) fn set(&self, phase: MarketPhase) {
        debug_assert_ne!(phase, MarketPhase::Idle);
        self.0.store(phase as u8, Ordering::Release);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(MarketPhase::Idle as u8, Ordering::Release);
    }
}
