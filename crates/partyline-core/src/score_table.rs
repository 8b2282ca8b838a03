use std::collections::HashMap;

use crate::game_trait::GameEvent;
use crate::player::ConnectionId;

/// Per-game score bookkeeping keyed by connection id, with a queue of
/// award events for the session leaderboard.
#[derive(Debug, Default, Clone)]
pub struct ScoreTable {
    scores: HashMap<ConnectionId, i64>,
    names: HashMap<ConnectionId, String>,
    pending: Vec<GameEvent>,
}

impl ScoreTable {
    pub fn join(&mut self, id: &str, name: &str) {
        self.scores.entry(id.to_string()).or_insert(0);
        self.names.insert(id.to_string(), name.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.scores.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.scores.keys()
    }

    /// Add points earned in play and queue a `ScoreAwarded` event.
    pub fn award(&mut self, id: &str, delta: i64) {
        if delta == 0 {
            return;
        }
        *self.scores.entry(id.to_string()).or_insert(0) += delta;
        self.pending.push(GameEvent::ScoreAwarded {
            player_id: id.to_string(),
            delta,
        });
    }

    /// Overwrite a score without emitting an event. Restored totals are
    /// already on the leaderboard.
    pub fn set(&mut self, id: &str, score: i64) {
        self.scores.insert(id.to_string(), score);
    }

    pub fn get(&self, id: &str) -> i64 {
        self.scores.get(id).copied().unwrap_or(0)
    }

    /// Move a player's score, name and undrained events to a new connection id.
    pub fn migrate(&mut self, old_id: &str, new_id: &str) {
        if old_id == new_id {
            return;
        }
        if let Some(score) = self.scores.remove(old_id) {
            self.scores.insert(new_id.to_string(), score);
        }
        if let Some(name) = self.names.remove(old_id) {
            self.names.insert(new_id.to_string(), name);
        }
        for GameEvent::ScoreAwarded { player_id, .. } in &mut self.pending {
            if player_id == old_id {
                *player_id = new_id.to_string();
            }
        }
    }

    pub fn snapshot(&self) -> HashMap<ConnectionId, i64> {
        self.scores.clone()
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending)
    }
}
