pub mod questions;
pub mod scoring;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use partyline_core::clock::{ENGINE_TICK, PhaseChange, RoundClock, Ticked, lock, spawn_ticker};
use partyline_core::game_registry::GameType;
use partyline_core::game_trait::{EnginePhase, EngineSnapshot, GameEngine, GameEvent, GameSetup};
use partyline_core::player::ConnectionId;
use partyline_core::score_table::ScoreTable;

pub use questions::TriviaQuestion;
use questions::{builtin_questions, parse_questions};
use scoring::answer_points;

/// Round state shared between the engine handle and its ticker.
struct TriviaRound {
    clock: RoundClock,
    questions: Vec<TriviaQuestion>,
    scores: ScoreTable,
    /// Answers for the open round, in arrival order.
    answers: Vec<(ConnectionId, usize)>,
}

impl TriviaRound {
    fn current(&self) -> Option<&TriviaQuestion> {
        let round = self.clock.round() as usize;
        round.checked_sub(1).and_then(|i| self.questions.get(i))
    }

    fn on_change(&mut self, change: PhaseChange) {
        if change.from == EnginePhase::Playing {
            self.settle(change.round);
        }
        if change.to == EnginePhase::Playing {
            self.answers.clear();
        }
    }

    fn settle(&mut self, round: u32) {
        let Some(question) = (round as usize)
            .checked_sub(1)
            .and_then(|i| self.questions.get(i))
        else {
            return;
        };
        let correct_answer = question.answer;
        let mut first = true;
        for (id, choice) in std::mem::take(&mut self.answers) {
            let correct = choice == correct_answer;
            self.scores.award(&id, answer_points(correct, correct && first));
            if correct {
                first = false;
            }
        }
        tracing::debug!(round, "Trivia round settled");
    }

    fn prompt(&self) -> Option<serde_json::Value> {
        let question = self.current()?;
        let mut prompt = json!({
            "index": self.clock.round(),
            "question": question.question,
            "choices": question.choices,
        });
        if matches!(
            self.clock.phase(),
            EnginePhase::RoundEnd | EnginePhase::Finished
        ) {
            prompt["answer"] = json!(question.answer);
        }
        Some(prompt)
    }
}

impl Ticked for TriviaRound {
    fn tick(&mut self, dt: Duration) -> bool {
        if let Some(change) = self.clock.advance(dt) {
            self.on_change(change);
        }
        !self.clock.is_finished()
    }
}

/// Multiple-choice trivia. Each round shows one question; answers are
/// scored when the round closes.
pub struct Trivia {
    inner: Arc<Mutex<TriviaRound>>,
    ticker: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl Trivia {
    pub fn new(setup: GameSetup) -> Self {
        let mut questions = parse_questions(&setup.content);
        if questions.is_empty() {
            questions = builtin_questions();
        }
        if setup.max_rounds > 0 {
            questions.truncate(setup.max_rounds as usize);
        }
        let mut scores = ScoreTable::default();
        for (id, name) in &setup.players {
            scores.join(id, name);
        }
        let clock = RoundClock::new(setup.timing, questions.len() as u32);
        Self {
            inner: Arc::new(Mutex::new(TriviaRound {
                clock,
                questions,
                scores,
                answers: Vec::new(),
            })),
            ticker: None,
            destroyed: false,
        }
    }

    /// Advance the round clock by hand. Tests drive the engine this way
    /// instead of waiting on the ticker.
    pub fn advance(&mut self, dt: Duration) {
        lock(&self.inner).tick(dt);
    }
}

/// Registry factory.
pub fn create(setup: GameSetup) -> Box<dyn GameEngine> {
    Box::new(Trivia::new(setup))
}

impl GameEngine for Trivia {
    fn game_type(&self) -> GameType {
        GameType::Trivia
    }

    fn warmup(&self) -> Duration {
        lock(&self.inner).clock.timing().warmup
    }

    fn start(&mut self) {
        if self.destroyed || self.ticker.is_some() {
            return;
        }
        self.ticker = Some(spawn_ticker(Arc::clone(&self.inner), ENGINE_TICK));
    }

    fn state(&self) -> EngineSnapshot {
        let inner = lock(&self.inner);
        EngineSnapshot {
            game_type: GameType::Trivia,
            phase: inner.clock.phase(),
            round: inner.clock.round(),
            total_rounds: inner.clock.total_rounds(),
            scores: inner.scores.snapshot(),
            prompt: inner.prompt(),
        }
    }

    fn destroy(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        lock(&self.inner).clock.finish();
        self.destroyed = true;
    }

    fn migrate_player(&mut self, old_id: &str, new_id: &str) {
        let mut inner = lock(&self.inner);
        inner.scores.migrate(old_id, new_id);
        for (id, _) in &mut inner.answers {
            if id == old_id {
                *id = new_id.to_string();
            }
        }
    }

    fn set_player_score(&mut self, player_id: &str, score: i64) {
        lock(&self.inner).scores.set(player_id, score);
    }

    fn add_player(&mut self, player_id: &str, name: &str) {
        lock(&self.inner).scores.join(player_id, name);
    }

    fn apply_input(&mut self, player_id: &str, input: &serde_json::Value) -> bool {
        let mut inner = lock(&self.inner);
        if inner.clock.phase() != EnginePhase::Playing || !inner.scores.contains(player_id) {
            return false;
        }
        let Some(choice) = input.get("answer").and_then(serde_json::Value::as_u64) else {
            return false;
        };
        let choice = choice as usize;
        let in_range = inner.current().is_some_and(|q| choice < q.choices.len());
        if !in_range || inner.answers.iter().any(|(id, _)| id == player_id) {
            return false;
        }
        inner.answers.push((player_id.to_string(), choice));
        if inner.answers.len() == inner.scores.len()
            && let Some(change) = inner.clock.end_round_early()
        {
            inner.on_change(change);
        }
        true
    }

    fn pause(&mut self) -> bool {
        lock(&self.inner).clock.pause()
    }

    fn resume(&mut self) -> bool {
        lock(&self.inner).clock.resume()
    }

    fn drain_events(&mut self) -> Vec<GameEvent> {
        lock(&self.inner).scores.drain_events()
    }
}

impl Drop for Trivia {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partyline_core::game_trait::RoundTiming;
    use partyline_core::test_helpers::{
        contract_add_player, contract_migrate_keeps_score, contract_pause_and_destroy,
        contract_starts_in_warmup, make_players,
    };

    fn setup(players: usize, content: Vec<serde_json::Value>) -> GameSetup {
        GameSetup {
            players: make_players(players),
            content,
            timing: RoundTiming::default(),
            max_rounds: 0,
        }
    }

    fn two_questions() -> Vec<serde_json::Value> {
        vec![
            json!({"question": "Q1", "choices": ["a", "b", "c"], "answer": 1}),
            json!({"question": "Q2", "choices": ["x", "y"], "answer": 0}),
        ]
    }

    fn to_first_round(game: &mut Trivia) {
        game.advance(RoundTiming::default().warmup);
        assert_eq!(game.state().phase, EnginePhase::Playing);
    }

    #[tokio::test]
    async fn engine_contract() {
        let mut game = Trivia::new(setup(3, vec![]));
        contract_starts_in_warmup(&mut game, 3);

        let mut game = Trivia::new(setup(2, vec![]));
        contract_migrate_keeps_score(&mut game, "conn-1");
        contract_add_player(&mut game);

        let mut game = Trivia::new(setup(2, vec![]));
        contract_pause_and_destroy(&mut game);
    }

    #[test]
    fn empty_content_uses_builtins() {
        let game = Trivia::new(setup(1, vec![json!({"nonsense": true})]));
        assert_eq!(
            game.state().total_rounds as usize,
            builtin_questions().len()
        );
    }

    #[test]
    fn max_rounds_caps_questions() {
        let mut s = setup(1, vec![]);
        s.max_rounds = 3;
        assert_eq!(Trivia::new(s).state().total_rounds, 3);
    }

    #[test]
    fn prompt_hides_answer_until_round_closes() {
        let mut game = Trivia::new(setup(2, two_questions()));
        to_first_round(&mut game);
        let prompt = game.state().prompt.unwrap();
        assert_eq!(prompt["question"], "Q1");
        assert!(prompt.get("answer").is_none());

        game.advance(RoundTiming::default().round);
        let state = game.state();
        assert_eq!(state.phase, EnginePhase::RoundEnd);
        assert_eq!(state.prompt.unwrap()["answer"], 1);
    }

    #[test]
    fn correct_answers_score_on_close() {
        let mut game = Trivia::new(setup(3, two_questions()));
        to_first_round(&mut game);
        assert!(game.apply_input("conn-2", &json!({"answer": 1})));
        assert!(game.apply_input("conn-1", &json!({"answer": 1})));
        // Not scored until the round closes
        assert!(game.drain_events().is_empty());

        game.advance(RoundTiming::default().round);
        let scores = game.state().scores;
        assert_eq!(scores["conn-2"], 150);
        assert_eq!(scores["conn-1"], 100);
        assert_eq!(scores["conn-3"], 0);
        assert_eq!(game.drain_events().len(), 2);
    }

    #[test]
    fn rejects_duplicate_and_invalid_answers() {
        let mut game = Trivia::new(setup(2, two_questions()));
        assert!(!game.apply_input("conn-1", &json!({"answer": 1})), "warm-up");
        to_first_round(&mut game);
        assert!(!game.apply_input("conn-1", &json!({"answer": 9})));
        assert!(!game.apply_input("conn-1", &json!({"guess": 1})));
        assert!(!game.apply_input("stranger", &json!({"answer": 1})));
        assert!(game.apply_input("conn-1", &json!({"answer": 0})));
        assert!(!game.apply_input("conn-1", &json!({"answer": 1})));
    }

    #[test]
    fn round_closes_early_once_everyone_answers() {
        let mut game = Trivia::new(setup(2, two_questions()));
        to_first_round(&mut game);
        game.apply_input("conn-1", &json!({"answer": 1}));
        game.apply_input("conn-2", &json!({"answer": 0}));
        assert_eq!(game.state().phase, EnginePhase::RoundEnd);
    }

    #[test]
    fn final_round_finishes_game() {
        let mut game = Trivia::new(setup(1, two_questions()));
        let timing = RoundTiming::default();
        to_first_round(&mut game);
        game.advance(timing.round);
        game.advance(timing.between_rounds);
        assert_eq!(game.state().round, 2);
        game.advance(timing.round);
        assert_eq!(game.state().phase, EnginePhase::Finished);
    }

    #[test]
    fn migrated_player_keeps_pending_answer() {
        let mut game = Trivia::new(setup(2, two_questions()));
        to_first_round(&mut game);
        game.apply_input("conn-1", &json!({"answer": 1}));
        game.migrate_player("conn-1", "conn-9");
        game.advance(RoundTiming::default().round);
        assert_eq!(game.state().scores["conn-9"], 150);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_drives_warmup() {
        let mut game = Trivia::new(setup(1, two_questions()));
        game.start();
        tokio::time::sleep(RoundTiming::default().warmup + ENGINE_TICK * 2).await;
        assert_eq!(game.state().phase, EnginePhase::Playing);
        game.destroy();
        assert_eq!(game.state().phase, EnginePhase::Finished);
    }
}
