use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::game_trait::{EnginePhase, RoundTiming};

/// Engine clock resolution.
pub const ENGINE_TICK: Duration = Duration::from_millis(100);

/// A phase transition reported by [`RoundClock::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: EnginePhase,
    pub to: EnginePhase,
    pub round: u32,
}

/// Drives Starting -> Playing -> RoundEnd -> Playing ... -> Finished on
/// elapsed time. Pausing freezes the clock mid-round.
#[derive(Debug, Clone)]
pub struct RoundClock {
    timing: RoundTiming,
    total_rounds: u32,
    round: u32,
    phase: EnginePhase,
    elapsed: Duration,
}

impl RoundClock {
    pub fn new(timing: RoundTiming, total_rounds: u32) -> Self {
        Self {
            timing,
            total_rounds,
            round: 0,
            phase: EnginePhase::Starting,
            elapsed: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn timing(&self) -> RoundTiming {
        self.timing
    }

    pub fn is_finished(&self) -> bool {
        self.phase == EnginePhase::Finished
    }

    /// Advance by `dt`, returning at most one transition.
    pub fn advance(&mut self, dt: Duration) -> Option<PhaseChange> {
        match self.phase {
            EnginePhase::Paused | EnginePhase::Finished => return None,
            _ => {},
        }
        self.elapsed += dt;
        match self.phase {
            EnginePhase::Starting if self.elapsed >= self.timing.warmup => {
                if self.total_rounds == 0 {
                    Some(self.transition(EnginePhase::Finished))
                } else {
                    self.round = 1;
                    Some(self.transition(EnginePhase::Playing))
                }
            },
            EnginePhase::Playing if self.elapsed >= self.timing.round => Some(self.close_round()),
            EnginePhase::RoundEnd if self.elapsed >= self.timing.between_rounds => {
                self.round += 1;
                Some(self.transition(EnginePhase::Playing))
            },
            _ => None,
        }
    }

    /// Close the open round now, e.g. once every player has answered.
    pub fn end_round_early(&mut self) -> Option<PhaseChange> {
        (self.phase == EnginePhase::Playing).then(|| self.close_round())
    }

    pub fn pause(&mut self) -> bool {
        if self.phase != EnginePhase::Playing {
            return false;
        }
        self.phase = EnginePhase::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.phase != EnginePhase::Paused {
            return false;
        }
        self.phase = EnginePhase::Playing;
        true
    }

    /// Jump straight to `Finished`.
    pub fn finish(&mut self) -> Option<PhaseChange> {
        (self.phase != EnginePhase::Finished).then(|| self.transition(EnginePhase::Finished))
    }

    fn close_round(&mut self) -> PhaseChange {
        if self.round >= self.total_rounds {
            self.transition(EnginePhase::Finished)
        } else {
            self.transition(EnginePhase::RoundEnd)
        }
    }

    fn transition(&mut self, to: EnginePhase) -> PhaseChange {
        let change = PhaseChange {
            from: self.phase,
            to,
            round: self.round,
        };
        self.phase = to;
        self.elapsed = Duration::ZERO;
        change
    }
}

/// State advanced by a [`spawn_ticker`] task.
pub trait Ticked: Send + 'static {
    /// Advance by `dt`. Returning false stops the ticker.
    fn tick(&mut self, dt: Duration) -> bool;
}

/// Lock an engine's shared state, recovering from poisoning.
pub fn lock<T>(inner: &Mutex<T>) -> MutexGuard<'_, T> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn a fixed-period ticker over shared engine state. Abort the returned
/// handle to stop it early.
pub fn spawn_ticker<T: Ticked>(inner: Arc<Mutex<T>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if !lock(&inner).tick(period) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> RoundTiming {
        RoundTiming {
            warmup: Duration::from_secs(3),
            round: Duration::from_secs(10),
            between_rounds: Duration::from_secs(2),
        }
    }

    #[test]
    fn walks_through_all_rounds() {
        let mut clock = RoundClock::new(timing(), 2);
        assert_eq!(clock.phase(), EnginePhase::Starting);
        assert!(clock.advance(Duration::from_secs(2)).is_none());

        let change = clock.advance(Duration::from_secs(1)).unwrap();
        assert_eq!(change.to, EnginePhase::Playing);
        assert_eq!(clock.round(), 1);

        let change = clock.advance(Duration::from_secs(10)).unwrap();
        assert_eq!(change.to, EnginePhase::RoundEnd);

        let change = clock.advance(Duration::from_secs(2)).unwrap();
        assert_eq!(change.to, EnginePhase::Playing);
        assert_eq!(clock.round(), 2);

        let change = clock.advance(Duration::from_secs(10)).unwrap();
        assert_eq!(change.to, EnginePhase::Finished);
        assert!(clock.advance(Duration::from_secs(100)).is_none());
    }

    #[test]
    fn pause_freezes_round_timer() {
        let mut clock = RoundClock::new(timing(), 1);
        clock.advance(Duration::from_secs(3));
        assert!(clock.pause());
        assert!(clock.advance(Duration::from_secs(60)).is_none());
        assert_eq!(clock.phase(), EnginePhase::Paused);
        assert!(clock.resume());
        assert!(clock.advance(Duration::from_secs(9)).is_none());
        assert_eq!(
            clock.advance(Duration::from_secs(1)).unwrap().to,
            EnginePhase::Finished
        );
    }

    #[test]
    fn pause_only_from_playing() {
        let mut clock = RoundClock::new(timing(), 1);
        assert!(!clock.pause());
        assert!(!clock.resume());
    }

    #[test]
    fn zero_rounds_finishes_after_warmup() {
        let mut clock = RoundClock::new(timing(), 0);
        let change = clock.advance(Duration::from_secs(3)).unwrap();
        assert_eq!(change.to, EnginePhase::Finished);
    }

    #[test]
    fn early_close_only_while_playing() {
        let mut clock = RoundClock::new(timing(), 3);
        assert!(clock.end_round_early().is_none());
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.end_round_early().unwrap().to, EnginePhase::RoundEnd);
    }

    struct Counter {
        ticks: u32,
        limit: u32,
    }

    impl Ticked for Counter {
        fn tick(&mut self, _dt: Duration) -> bool {
            self.ticks += 1;
            self.ticks < self.limit
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_when_state_says_so() {
        let inner = Arc::new(Mutex::new(Counter { ticks: 0, limit: 5 }));
        let handle = spawn_ticker(Arc::clone(&inner), ENGINE_TICK);
        handle.await.unwrap();
        assert_eq!(lock(&inner).ticks, 5);
    }
}
