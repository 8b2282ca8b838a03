use partyline_core::net::messages::LeaderboardEntry;
use partyline_core::player::name_key;

use crate::room_manager::RoomManager;
use crate::store::StoreWrite;

impl RoomManager {
    /// Add `delta` to the player's cumulative session score and mirror the
    /// new total to the store. Returns the total, or `None` for an unknown
    /// room.
    pub fn update_session_score(
        &mut self,
        code: &str,
        player_name: &str,
        delta: i64,
    ) -> Option<i64> {
        let entry = self.rooms.get_mut(code)?;
        let total = add_to_ledger(&mut entry.leaderboard, player_name, delta);
        self.persist(StoreWrite::UpsertSessionScore {
            room_code: code.to_string(),
            player_name: player_name.to_string(),
            total,
        });
        Some(total)
    }

    /// Entries sorted by score, highest first. Ties keep first-scored order.
    pub fn get_session_leaderboard(&self, code: &str) -> Vec<LeaderboardEntry> {
        let Some(entry) = self.rooms.get(code) else {
            return Vec::new();
        };
        let mut entries = entry.leaderboard.clone();
        entries.sort_by(|a, b| b.total_score.cmp(&a.total_score));
        entries
    }

    pub fn session_score(&self, code: &str, player_name: &str) -> Option<i64> {
        let key = name_key(player_name);
        self.rooms
            .get(code)?
            .leaderboard
            .iter()
            .find(|e| name_key(&e.player_name) == key)
            .map(|e| e.total_score)
    }

    /// Remember a total read back from the store. An entry that appeared
    /// while the read was in flight wins.
    pub fn cache_session_score(&mut self, code: &str, player_name: &str, total: i64) -> i64 {
        if let Some(existing) = self.session_score(code, player_name) {
            return existing;
        }
        if let Some(entry) = self.rooms.get_mut(code) {
            entry.leaderboard.push(LeaderboardEntry {
                player_name: player_name.to_string(),
                total_score: total,
            });
        }
        total
    }
}

fn add_to_ledger(ledger: &mut Vec<LeaderboardEntry>, player_name: &str, delta: i64) -> i64 {
    let key = name_key(player_name);
    match ledger.iter_mut().find(|e| name_key(&e.player_name) == key) {
        Some(entry) => {
            entry.total_score += delta;
            entry.total_score
        },
        None => {
            ledger.push(LeaderboardEntry {
                player_name: player_name.to_string(),
                total_score: delta,
            });
            delta
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room_manager::tests::manager_with_room;
    use proptest::prelude::*;

    #[test]
    fn totals_accumulate_and_sort_stably() {
        let (mut mgr, code) = manager_with_room();
        mgr.update_session_score(&code, "Alice", 100);
        mgr.update_session_score(&code, "Bob", 50);
        mgr.update_session_score(&code, "Alice", 25);
        mgr.update_session_score(&code, "Bob", 75);
        mgr.update_session_score(&code, "Carol", 10);

        let board = mgr.get_session_leaderboard(&code);
        let names: Vec<_> = board.iter().map(|e| e.player_name.as_str()).collect();
        // Alice and Bob tie at 125; Alice scored first.
        assert_eq!(names, ["Alice", "Bob", "Carol"]);
        assert_eq!(board[0].total_score, 125);
        assert_eq!(board[1].total_score, 125);
    }

    #[test]
    fn names_match_case_insensitively() {
        let (mut mgr, code) = manager_with_room();
        mgr.update_session_score(&code, "Alice", 5);
        assert_eq!(mgr.update_session_score(&code, "ALICE", 5), Some(10));
        assert_eq!(mgr.session_score(&code, "alice"), Some(10));
        assert_eq!(mgr.get_session_leaderboard(&code).len(), 1);
    }

    #[test]
    fn unknown_room() {
        let mut mgr = crate::room_manager::RoomManager::default();
        assert_eq!(mgr.update_session_score("ZZZZ", "Alice", 5), None);
        assert!(mgr.get_session_leaderboard("ZZZZ").is_empty());
    }

    #[test]
    fn cached_store_total_does_not_clobber_live_entry() {
        let (mut mgr, code) = manager_with_room();
        assert_eq!(mgr.cache_session_score(&code, "Bob", 40), 40);
        mgr.update_session_score(&code, "Bob", 2);
        assert_eq!(mgr.cache_session_score(&code, "Bob", 40), 42);
    }

    proptest! {
        #[test]
        fn totals_equal_sum_of_deltas(
            updates in prop::collection::vec((0..4usize, -50i64..200), 0..40)
        ) {
            let (mut mgr, code) = manager_with_room();
            let names = ["Ann", "Ben", "Cy", "Di"];
            let mut expected = [0i64; 4];
            for (who, delta) in &updates {
                mgr.update_session_score(&code, names[*who], *delta);
                expected[*who] += delta;
            }
            let board = mgr.get_session_leaderboard(&code);
            for (i, name) in names.iter().enumerate() {
                let got = board.iter().find(|e| e.player_name == *name).map(|e| e.total_score);
                if updates.iter().any(|(w, _)| *w == i) {
                    prop_assert_eq!(got, Some(expected[i]));
                } else {
                    prop_assert_eq!(got, None);
                }
            }
            prop_assert!(board.windows(2).all(|w| w[0].total_score >= w[1].total_score));
        }
    }
}
