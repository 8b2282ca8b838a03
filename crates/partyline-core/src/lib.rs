pub mod clock;
pub mod game_registry;
pub mod game_trait;
pub mod net;
pub mod player;
pub mod room;
pub mod score_table;
pub mod token;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::clock::lock;
    use crate::game_registry::GameType;
    use crate::game_trait::{
        EnginePhase, EngineSnapshot, GameEngine, GameEvent, GameFactory, GameSetup,
    };
    use crate::player::ConnectionId;
    use crate::score_table::ScoreTable;

    /// Create `n` (connection id, name) pairs: `conn-1`/`Player1`, ...
    pub fn make_players(n: usize) -> Vec<(ConnectionId, String)> {
        (1..=n)
            .map(|i| (format!("conn-{i}"), format!("Player{i}")))
            .collect()
    }

    /// What the server did to scripted engines, shared with the test body.
    #[derive(Debug, Default)]
    pub struct ProbeLog {
        pub built: usize,
        pub started: usize,
        pub destroyed: usize,
        pub last_setup: Option<GameSetup>,
        pub migrations: Vec<(ConnectionId, ConnectionId)>,
        pub scores_set: Vec<(ConnectionId, i64)>,
        pub added: Vec<(ConnectionId, String)>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct EngineProbe(Arc<Mutex<ProbeLog>>);

    impl EngineProbe {
        pub fn log(&self) -> std::sync::MutexGuard<'_, ProbeLog> {
            lock(&self.0)
        }

        /// Engines built and not yet destroyed.
        pub fn live(&self) -> usize {
            let log = self.log();
            log.built - log.destroyed
        }

        /// Factory producing [`ScriptedEngine`]s that report to this probe.
        pub fn factory(&self, game_type: GameType, warmup: Duration) -> GameFactory {
            let probe = self.clone();
            Box::new(move |setup: GameSetup| -> Box<dyn GameEngine> {
                Box::new(ScriptedEngine::new(game_type, warmup, setup, probe.clone()))
            })
        }
    }

    /// Deterministic engine for server tests. Leaves `Starting` once the
    /// warm-up has elapsed on the tokio clock and then stays in `Playing`.
    /// Input `{"points": n}` awards `n` to the sender.
    pub struct ScriptedEngine {
        game_type: GameType,
        warmup: Duration,
        started_at: Option<Instant>,
        paused: bool,
        finished: bool,
        destroyed: bool,
        scores: ScoreTable,
        probe: EngineProbe,
    }

    impl ScriptedEngine {
        pub fn new(
            game_type: GameType,
            warmup: Duration,
            setup: GameSetup,
            probe: EngineProbe,
        ) -> Self {
            let mut scores = ScoreTable::default();
            for (id, name) in &setup.players {
                scores.join(id, name);
            }
            {
                let mut log = probe.log();
                log.built += 1;
                log.last_setup = Some(setup);
            }
            Self {
                game_type,
                warmup,
                started_at: None,
                paused: false,
                finished: false,
                destroyed: false,
                scores,
                probe,
            }
        }

        fn phase(&self) -> EnginePhase {
            match self.started_at {
                _ if self.finished => EnginePhase::Finished,
                _ if self.paused => EnginePhase::Paused,
                Some(t) if t.elapsed() >= self.warmup => EnginePhase::Playing,
                _ => EnginePhase::Starting,
            }
        }
    }

    impl GameEngine for ScriptedEngine {
        fn game_type(&self) -> GameType {
            self.game_type
        }

        fn warmup(&self) -> Duration {
            self.warmup
        }

        fn start(&mut self) {
            self.started_at = Some(Instant::now());
            self.probe.log().started += 1;
        }

        fn state(&self) -> EngineSnapshot {
            EngineSnapshot {
                game_type: self.game_type,
                phase: self.phase(),
                round: u32::from(self.phase() != EnginePhase::Starting),
                total_rounds: 1,
                scores: self.scores.snapshot(),
                prompt: None,
            }
        }

        fn destroy(&mut self) {
            if !self.destroyed {
                self.destroyed = true;
                self.finished = true;
                self.probe.log().destroyed += 1;
            }
        }

        fn migrate_player(&mut self, old_id: &str, new_id: &str) {
            self.scores.migrate(old_id, new_id);
            self.probe
                .log()
                .migrations
                .push((old_id.to_string(), new_id.to_string()));
        }

        fn set_player_score(&mut self, player_id: &str, score: i64) {
            self.scores.set(player_id, score);
            self.probe
                .log()
                .scores_set
                .push((player_id.to_string(), score));
        }

        fn add_player(&mut self, player_id: &str, name: &str) {
            self.scores.join(player_id, name);
            self.probe
                .log()
                .added
                .push((player_id.to_string(), name.to_string()));
        }

        fn apply_input(&mut self, player_id: &str, input: &serde_json::Value) -> bool {
            if self.phase() != EnginePhase::Playing || !self.scores.contains(player_id) {
                return false;
            }
            match input.get("points").and_then(serde_json::Value::as_i64) {
                Some(points) => {
                    self.scores.award(player_id, points);
                    true
                },
                None => false,
            }
        }

        fn pause(&mut self) -> bool {
            if self.phase() != EnginePhase::Playing {
                return false;
            }
            self.paused = true;
            true
        }

        fn resume(&mut self) -> bool {
            if !self.paused {
                return false;
            }
            self.paused = false;
            true
        }

        fn drain_events(&mut self) -> Vec<GameEvent> {
            self.scores.drain_events()
        }
    }

    // ================================================================
    // Engine contract checks
    // ================================================================
    // Game crates run these from their own #[cfg(test)] modules against a
    // freshly built engine.

    /// A fresh engine reports `Starting` and knows every setup player.
    pub fn contract_starts_in_warmup(engine: &mut dyn GameEngine, players: usize) {
        engine.start();
        let state = engine.state();
        assert_eq!(state.phase, EnginePhase::Starting);
        assert_eq!(state.round, 0);
        assert_eq!(
            state.scores.len(),
            players,
            "every setup player must have a score entry"
        );
        engine.destroy();
    }

    /// Migration keeps the player's score under the new id.
    pub fn contract_migrate_keeps_score(engine: &mut dyn GameEngine, old_id: &str) {
        engine.set_player_score(old_id, 700);
        engine.migrate_player(old_id, "migrated-conn");
        let scores = engine.state().scores;
        assert_eq!(scores.get("migrated-conn"), Some(&700));
        assert!(!scores.contains_key(old_id));
        assert!(
            engine.drain_events().is_empty(),
            "set_player_score must not emit score events"
        );
    }

    /// Pausing outside a round is refused; destroy is idempotent and
    /// leaves the engine finished.
    pub fn contract_pause_and_destroy(engine: &mut dyn GameEngine) {
        assert!(!engine.pause(), "pause must be refused during warm-up");
        engine.destroy();
        engine.destroy();
        assert_eq!(engine.state().phase, EnginePhase::Finished);
        assert!(!engine.resume());
    }

    /// Late joiners get a zero score entry.
    pub fn contract_add_player(engine: &mut dyn GameEngine) {
        engine.add_player("late-conn", "Latecomer");
        assert_eq!(engine.state().scores.get("late-conn"), Some(&0));
    }
}
