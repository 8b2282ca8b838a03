use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;

use partyline_core::clock::ENGINE_TICK;
use partyline_core::game_registry::GameType;
use partyline_core::game_trait::{
    EnginePhase, EngineSnapshot, GameEngine, GameEvent, GameFactory, GameSetup,
};
use partyline_core::net::messages::{GameStateMsg, LeaderboardMsg, ServerMessage};
use partyline_core::room::CoarseState;

use crate::error::RoomError;
use crate::room_manager::{GameSession, RoomManager};
use crate::state::SharedRoomManager;

/// How often a running game's state is checked and pushed to the room.
pub const STATE_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Registry mapping game types to engine factories (server-side).
pub struct ServerGameRegistry {
    factories: HashMap<GameType, GameFactory>,
}

impl Default for ServerGameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerGameRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_defaults();
        registry
    }

    /// A registry with no games, for tests that register scripted engines.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    fn register_defaults(&mut self) {
        #[cfg(feature = "trivia")]
        self.register(GameType::Trivia, Box::new(partyline_trivia::create));
        #[cfg(feature = "pricing")]
        self.register(GameType::PriceGuess, Box::new(partyline_pricing::create));
    }

    pub fn register(&mut self, game_type: GameType, factory: GameFactory) {
        self.factories.insert(game_type, factory);
    }

    pub fn has(&self, game_type: GameType) -> bool {
        self.factories.contains_key(&game_type)
    }

    pub fn create(&self, game_type: GameType, setup: GameSetup) -> Option<Box<dyn GameEngine>> {
        self.factories.get(&game_type).map(|f| f(setup))
    }

    /// Return the number of registered game types.
    pub fn available_games(&self) -> usize {
        self.factories.len()
    }

    /// Registered game types in declaration order.
    pub fn game_types(&self) -> Vec<GameType> {
        GameType::ALL
            .iter()
            .copied()
            .filter(|g| self.has(*g))
            .collect()
    }
}

/// Result of [`RoomManager::start_game`].
#[derive(Debug, Clone)]
pub struct StartedGame {
    pub snapshot: EngineSnapshot,
    pub instance_id: u64,
    pub warmup: Duration,
}

impl RoomManager {
    /// Replace whatever runs in the room with a fresh engine of `game_type`.
    ///
    /// Connected players take part. Score events still pending in the old
    /// engine are credited to the leaderboard before it is destroyed.
    pub fn start_game(
        &mut self,
        code: &str,
        game_type: GameType,
        content: Vec<serde_json::Value>,
    ) -> Result<StartedGame, RoomError> {
        if !self.rooms.contains_key(code) {
            return Err(RoomError::RoomNotFound);
        }
        if !self.registry.has(game_type) {
            return Err(RoomError::EngineConstructionFailed(game_type));
        }
        self.sync_coarse_state(code);

        let entry = self.rooms.get_mut(code).ok_or(RoomError::RoomNotFound)?;
        if let Some(previous) = entry.game.take() {
            tracing::info!(room = code, instance = previous.instance_id, "Replacing running game");
            previous.shutdown();
        }

        let mut players: Vec<_> = entry
            .room
            .players
            .iter()
            .filter(|p| p.is_connected())
            .collect();
        players.sort_by_key(|p| p.joined_at);
        let setup = GameSetup {
            players: players
                .into_iter()
                .map(|p| (p.id.clone(), p.name.clone()))
                .collect(),
            content,
            timing: self.policy.timing,
            max_rounds: self.policy.max_rounds,
        };
        let mut engine = self
            .registry
            .create(game_type, setup)
            .ok_or(RoomError::EngineConstructionFailed(game_type))?;

        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;
        let warmup = engine.warmup();
        engine.start();
        entry.game = Some(GameSession {
            engine,
            instance_id,
            resync: None,
        });
        entry.room.current_game = Some(game_type);

        let snapshot = self
            .sync_coarse_state(code)
            .ok_or(RoomError::NoActiveGame)?;
        self.persist_room(code);
        tracing::info!(room = code, game = %game_type, instance = instance_id, "Game started");
        Ok(StartedGame {
            snapshot,
            instance_id,
            warmup,
        })
    }

    /// Attach the resync task to the game it was spawned for. A task for a
    /// game that has already been replaced or ended is aborted instead.
    pub fn set_resync(&mut self, code: &str, instance_id: u64, handle: JoinHandle<()>) {
        let session = self
            .rooms
            .get_mut(code)
            .and_then(|e| e.game.as_mut())
            .filter(|s| s.instance_id == instance_id);
        match session {
            Some(session) => {
                if let Some(previous) = session.resync.replace(handle) {
                    previous.abort();
                }
            },
            None => handle.abort(),
        }
    }

    /// Instance id of the room's live engine.
    pub fn game_instance(&self, code: &str) -> Option<u64> {
        self.rooms.get(code)?.game.as_ref().map(|s| s.instance_id)
    }

    pub fn get_game(&self, code: &str) -> Option<EngineSnapshot> {
        self.rooms
            .get(code)?
            .game
            .as_ref()
            .map(|s| s.engine.state())
    }

    /// Pull the engine's state into the room: coarse state, per-player
    /// scores, and pending score events into the session leaderboard.
    pub fn sync_coarse_state(&mut self, code: &str) -> Option<EngineSnapshot> {
        let entry = self.rooms.get_mut(code)?;
        let session = entry.game.as_mut()?;
        let snapshot = session.engine.state();
        let events = session.engine.drain_events();

        entry.room.coarse_state = CoarseState::from(snapshot.phase);
        for (id, score) in &snapshot.scores {
            if let Some(player) = entry.room.players.get_mut(id) {
                player.score = *score;
            }
        }

        let mut awards: Vec<(String, i64)> = Vec::with_capacity(events.len());
        for event in events {
            match event {
                GameEvent::ScoreAwarded { player_id, delta } => {
                    match entry.room.players.get(&player_id) {
                        Some(player) => awards.push((player.name.clone(), delta)),
                        None => tracing::debug!(
                            room = code, player_id = %player_id,
                            "Dropping score for a player no longer in the room"
                        ),
                    }
                },
            }
        }
        for (name, delta) in awards {
            self.update_session_score(code, &name, delta);
        }
        Some(snapshot)
    }

    /// Forward a player's input to the live engine. `Ok(false)` means the
    /// engine ignored it.
    pub fn apply_game_input(
        &mut self,
        code: &str,
        conn: &str,
        input: &serde_json::Value,
    ) -> Result<bool, RoomError> {
        let session = self.session_mut(code)?;
        let accepted = session.engine.apply_input(conn, input);
        if accepted {
            self.sync_coarse_state(code);
        }
        Ok(accepted)
    }

    /// Pause the live game. Only a game in `Playing` pauses.
    pub fn pause_game(&mut self, code: &str) -> Result<bool, RoomError> {
        let paused = self.session_mut(code)?.engine.pause();
        self.sync_coarse_state(code);
        Ok(paused)
    }

    pub fn resume_game(&mut self, code: &str) -> Result<bool, RoomError> {
        let resumed = self.session_mut(code)?.engine.resume();
        self.sync_coarse_state(code);
        Ok(resumed)
    }

    /// Stop the live game and return the room to the lobby. The session
    /// leaderboard is kept.
    pub fn end_game(&mut self, code: &str) -> Result<(), RoomError> {
        self.session_mut(code)?;
        self.sync_coarse_state(code);
        let entry = self.rooms.get_mut(code).ok_or(RoomError::RoomNotFound)?;
        if let Some(session) = entry.game.take() {
            tracing::info!(room = code, instance = session.instance_id, "Game ended");
            session.shutdown();
        }
        entry.room.current_game = None;
        entry.room.coarse_state = CoarseState::Lobby;
        self.persist_room(code);
        Ok(())
    }

    fn session_mut(&mut self, code: &str) -> Result<&mut GameSession, RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::RoomNotFound)?;
        entry.game.as_mut().ok_or(RoomError::NoActiveGame)
    }
}

/// Spawn the post-warm-up resync for one engine instance.
///
/// After the engine's warm-up plus one tick the room's coarse state is
/// resynced, then the task keeps pushing `GameState` whenever the phase or
/// round changes. It stops once the instance is no longer the room's live
/// engine, and after broadcasting the leaderboard when the game finishes.
pub fn spawn_state_pump(
    rooms: SharedRoomManager,
    code: String,
    instance_id: u64,
    warmup: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(warmup + ENGINE_TICK).await;
        let mut last_pushed: Option<(EnginePhase, u32)> = None;
        loop {
            {
                let mut mgr = rooms.write().await;
                if mgr.game_instance(&code) != Some(instance_id) {
                    tracing::debug!(
                        room = %code,
                        instance = instance_id,
                        "Stale game, pump stopping"
                    );
                    break;
                }
                let Some(snapshot) = mgr.sync_coarse_state(&code) else {
                    break;
                };
                let finished = snapshot.phase == EnginePhase::Finished;
                let key = (snapshot.phase, snapshot.round);
                if last_pushed != Some(key) {
                    last_pushed = Some(key);
                    mgr.broadcast(
                        &code,
                        &ServerMessage::GameState(Box::new(GameStateMsg {
                            room_code: code.clone(),
                            snapshot,
                        })),
                    );
                    mgr.broadcast_room_update(&code);
                }
                if finished {
                    let entries = mgr.get_session_leaderboard(&code);
                    mgr.broadcast(
                        &code,
                        &ServerMessage::Leaderboard(LeaderboardMsg {
                            room_code: code.clone(),
                            entries,
                        }),
                    );
                    break;
                }
            }
            tokio::time::sleep(STATE_PUSH_INTERVAL).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::*;
    use crate::players::JoinRequest;
    use crate::room_manager::RoomPolicy;
    use crate::room_manager::tests::make_sender;
    use partyline_core::net::protocol::decode_server_message;
    use partyline_core::test_helpers::EngineProbe;
    use serde_json::json;

    const WARMUP: Duration = Duration::from_secs(3);

    fn probed_manager() -> (RoomManager, EngineProbe, String) {
        let probe = EngineProbe::default();
        let mut registry = ServerGameRegistry::empty();
        registry.register(GameType::Trivia, probe.factory(GameType::Trivia, WARMUP));
        let mut mgr = RoomManager::new(Arc::new(registry), RoomPolicy::default(), None);
        let code = mgr.create_room("host-1", "Alice", None).code;
        (mgr, probe, code)
    }

    #[test]
    fn default_registry_has_both_games() {
        let registry = ServerGameRegistry::new();
        assert_eq!(registry.available_games(), 2);
        assert!(registry.has(GameType::Trivia));
        assert!(registry.has(GameType::PriceGuess));
        assert!(
            ServerGameRegistry::empty()
                .create(GameType::Trivia, GameSetup::default())
                .is_none()
        );
    }

    #[tokio::test]
    async fn unknown_game_type_fails_construction() {
        let (mut mgr, probe, code) = probed_manager();
        let err = mgr.start_game(&code, GameType::PriceGuess, Vec::new()).unwrap_err();
        assert_eq!(err, RoomError::EngineConstructionFailed(GameType::PriceGuess));
        assert_eq!(probe.log().built, 0);
        assert_eq!(
            mgr.start_game("ZZZZ", GameType::Trivia, Vec::new()).unwrap_err(),
            RoomError::RoomNotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_hands_connected_players_to_engine() {
        let (mut mgr, probe, code) = probed_manager();
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        mgr.join_room(&code, "p2", JoinRequest::named("Carol")).unwrap();
        mgr.leave_room("p2", true);

        let started = mgr.start_game(&code, GameType::Trivia, vec![json!({"q": 1})]).unwrap();
        assert_eq!(started.snapshot.phase, EnginePhase::Starting);
        assert_eq!(started.warmup, WARMUP);

        let room = mgr.get_room(&code).unwrap();
        assert_eq!(room.current_game, Some(GameType::Trivia));
        assert_eq!(room.coarse_state, CoarseState::Starting);

        let log = probe.log();
        let setup = log.last_setup.as_ref().unwrap();
        assert_eq!(setup.players, vec![("p1".to_string(), "Bob".to_string())]);
        assert_eq!(setup.content, vec![json!({"q": 1})]);
        assert_eq!(log.started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_engine_per_room() {
        let (mut mgr, probe, code) = probed_manager();
        let first = mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();
        let second = mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();
        assert!(second.instance_id > first.instance_id);
        assert_eq!(probe.live(), 1);
        assert_eq!(mgr.game_instance(&code), Some(second.instance_id));

        mgr.end_game(&code).unwrap();
        assert_eq!(probe.live(), 0);
        let room = mgr.get_room(&code).unwrap();
        assert_eq!(room.current_game, None);
        assert_eq!(room.coarse_state, CoarseState::Lobby);
        assert_eq!(mgr.end_game(&code).unwrap_err(), RoomError::NoActiveGame);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_room_destroys_engine() {
        let (mut mgr, probe, code) = probed_manager();
        mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();
        mgr.delete_room(&code);
        assert_eq!(probe.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scores_flow_into_leaderboard_and_survive_end() {
        let (mut mgr, _probe, code) = probed_manager();
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();

        // Input is refused during warm-up.
        assert_eq!(mgr.apply_game_input(&code, "p1", &json!({"points": 10})), Ok(false));
        tokio::time::advance(WARMUP + ENGINE_TICK).await;
        mgr.sync_coarse_state(&code);
        assert_eq!(mgr.get_room(&code).unwrap().coarse_state, CoarseState::Playing);

        assert_eq!(mgr.apply_game_input(&code, "p1", &json!({"points": 10})), Ok(true));
        assert_eq!(mgr.apply_game_input(&code, "p1", &json!({"points": 5})), Ok(true));
        assert_eq!(mgr.session_score(&code, "Bob"), Some(15));
        assert_eq!(mgr.get_player(&code, "p1").unwrap().score, 15);

        mgr.end_game(&code).unwrap();
        assert_eq!(mgr.session_score(&code, "Bob"), Some(15));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_only_while_playing() {
        let (mut mgr, _probe, code) = probed_manager();
        assert_eq!(mgr.pause_game(&code).unwrap_err(), RoomError::NoActiveGame);
        mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();
        assert_eq!(mgr.pause_game(&code), Ok(false));

        tokio::time::advance(WARMUP + ENGINE_TICK).await;
        assert_eq!(mgr.pause_game(&code), Ok(true));
        assert_eq!(mgr.get_room(&code).unwrap().coarse_state, CoarseState::Paused);
        assert_eq!(mgr.resume_game(&code), Ok(true));
        assert_eq!(mgr.get_room(&code).unwrap().coarse_state, CoarseState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_migrates_engine_bookkeeping() {
        let (mut mgr, probe, code) = probed_manager();
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        let token = mgr.issue_player_token(&code, "p1", "Bob").unwrap();
        mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();
        mgr.leave_room("p1", true);

        mgr.replace_player_socket_with_token(&code, &token, "p2", None).unwrap();
        assert!(mgr.restore_player_score_in_game(&code, "p2", 250));
        assert_eq!(mgr.get_game(&code).unwrap().scores.get("p2"), Some(&250));

        mgr.join_room(&code, "p3", JoinRequest::named("Dan")).unwrap();
        let log = probe.log();
        assert_eq!(log.migrations, vec![("p1".to_string(), "p2".to_string())]);
        assert_eq!(log.scores_set, vec![("p2".to_string(), 250)]);
        assert_eq!(log.added, vec![("p3".to_string(), "Dan".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_resync_handle_is_aborted() {
        let (mut mgr, _probe, code) = probed_manager();
        let first = mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();
        mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();

        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        mgr.set_resync(&code, first.instance_id, handle);
        // The task is dropped, and its sender with it, once aborted.
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn pump_resyncs_after_warmup_and_stops_with_game() {
        let (mut mgr, _probe, code) = probed_manager();
        let (tx, mut rx) = make_sender();
        mgr.register_sender("host-1", tx);
        let rooms: SharedRoomManager = Arc::new(RwLock::new(mgr));

        let started = {
            let mut mgr = rooms.write().await;
            let started = mgr.start_game(&code, GameType::Trivia, Vec::new()).unwrap();
            let handle =
                spawn_state_pump(
                    Arc::clone(&rooms),
                    code.clone(),
                    started.instance_id,
                    started.warmup,
                );
            mgr.set_resync(&code, started.instance_id, handle);
            started
        };
        assert_eq!(
            rooms.read().await.get_room(&code).unwrap().coarse_state,
            CoarseState::Starting
        );

        tokio::time::sleep(started.warmup + ENGINE_TICK * 2).await;
        assert_eq!(
            rooms.read().await.get_room(&code).unwrap().coarse_state,
            CoarseState::Playing
        );
        let pushed = decode_server_message(&rx.recv().await.unwrap()).unwrap();
        assert!(matches!(
            pushed,
            ServerMessage::GameState(ref s) if s.snapshot.phase == EnginePhase::Playing
        ));
        let update = decode_server_message(&rx.recv().await.unwrap()).unwrap();
        assert!(matches!(update, ServerMessage::RoomUpdate(_)));

        // Unchanged phase and round: nothing more is pushed.
        tokio::time::sleep(STATE_PUSH_INTERVAL * 3).await;
        assert!(rx.try_recv().is_err());

        rooms.write().await.end_game(&code).unwrap();
        tokio::time::sleep(STATE_PUSH_INTERVAL * 3).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            rooms.read().await.get_room(&code).unwrap().coarse_state,
            CoarseState::Lobby
        );
    }
}
