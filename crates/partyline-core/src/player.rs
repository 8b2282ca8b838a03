use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identity of a live transport connection. Not stable across reconnects.
pub type ConnectionId = String;

pub const MAX_PLAYER_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    Connected,
    Disconnected,
}

/// A player in a room. `name` is the stable identity; `id` follows the
/// player's current connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: ConnectionId,
    pub name: String,
    pub status: PlayerStatus,
    pub score: i64,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub avatar: String,
    pub language: Option<String>,
}

impl Player {
    pub fn new(
        id: ConnectionId,
        name: String,
        avatar: String,
        language: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            status: PlayerStatus::Connected,
            score: 0,
            joined_at: now,
            last_seen: now,
            avatar,
            language,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == PlayerStatus::Connected
    }
}

/// Case-insensitive key used for name matching.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Trim and validate a display name. Returns `None` for empty, overlong, or
/// control-character names.
pub fn validate_player_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty()
        || name.chars().count() > MAX_PLAYER_NAME_LEN
        || name.chars().any(char::is_control)
    {
        return None;
    }
    Some(name.to_string())
}

/// Fresh avatar descriptor in the given style, e.g. `bottts:9f03c2aa`.
pub fn generate_avatar(style: &str) -> String {
    let seed: u32 = rand::rng().random();
    format!("{style}:{seed:08x}")
}

/// Player records of one room, indexed by case-insensitive name (the arena)
/// and by current connection id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Player>", into = "Vec<Player>")]
pub struct Roster {
    by_name: HashMap<String, Player>,
    by_connection: HashMap<ConnectionId, String>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.by_name.values().filter(|p| p.is_connected()).count()
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.by_connection
            .get(id)
            .and_then(|key| self.by_name.get(key))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Player> {
        let key = self.by_connection.get(id)?;
        self.by_name.get_mut(key)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Player> {
        self.by_name.get(&name_key(name))
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.by_name.get_mut(&name_key(name))
    }

    /// Insert a player, replacing any record with the same case-insensitive
    /// name. Returns the replaced record.
    pub fn insert(&mut self, player: Player) -> Option<Player> {
        let key = name_key(&player.name);
        let previous = self.by_name.remove(&key);
        if let Some(ref old) = previous {
            self.by_connection.remove(&old.id);
        }
        self.by_connection.insert(player.id.clone(), key.clone());
        self.by_name.insert(key, player);
        previous
    }

    /// Point the named player's record at a new connection id, dropping the
    /// old connection index entry.
    pub fn rebind(&mut self, name: &str, new_id: ConnectionId) -> Option<&mut Player> {
        let key = name_key(name);
        let player = self.by_name.get_mut(&key)?;
        self.by_connection.remove(&player.id);
        player.id = new_id.clone();
        self.by_connection.insert(new_id, key);
        Some(player)
    }

    pub fn remove_by_connection(&mut self, id: &str) -> Option<Player> {
        let key = self.by_connection.remove(id)?;
        self.by_name.remove(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.by_name.values()
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.by_connection.keys()
    }

    /// Players ordered by join time, for display.
    pub fn to_sorted_vec(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.by_name.values().cloned().collect();
        players.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.name.cmp(&b.name)));
        players
    }
}

impl From<Vec<Player>> for Roster {
    fn from(players: Vec<Player>) -> Self {
        let mut roster = Roster::default();
        for player in players {
            roster.insert(player);
        }
        roster
    }
}

impl From<Roster> for Vec<Player> {
    fn from(roster: Roster) -> Self {
        roster.to_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn player(id: &str, name: &str) -> Player {
        Player::new(id.into(), name.into(), "bottts:0".into(), None, Utc::now())
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let mut roster = Roster::default();
        roster.insert(player("p1", "Bob"));
        assert_eq!(roster.find_by_name("bob").unwrap().id, "p1");
        assert_eq!(roster.find_by_name("BOB").unwrap().name, "Bob");
        assert_eq!(roster.get("p1").unwrap().name, "Bob");
    }

    #[test]
    fn rebind_moves_connection_index() {
        let mut roster = Roster::default();
        roster.insert(player("p1", "Bob"));
        roster.rebind("bob", "p3".into()).unwrap();
        assert!(roster.get("p1").is_none());
        assert_eq!(roster.get("p3").unwrap().name, "Bob");
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn insert_same_name_replaces_record() {
        let mut roster = Roster::default();
        roster.insert(player("p1", "Bob"));
        let old = roster.insert(player("p2", "BOB"));
        assert_eq!(old.unwrap().id, "p1");
        assert_eq!(roster.len(), 1);
        assert!(roster.get("p1").is_none());
    }

    #[test]
    fn name_validation() {
        assert_eq!(validate_player_name("  Alice "), Some("Alice".to_string()));
        assert_eq!(validate_player_name("   "), None);
        assert_eq!(validate_player_name("a\u{7}b"), None);
        assert_eq!(validate_player_name(&"x".repeat(33)), None);
    }

    #[test]
    fn roster_serializes_as_player_list() {
        let mut roster = Roster::default();
        roster.insert(player("p1", "Bob"));
        let json = serde_json::to_value(&roster).unwrap();
        assert!(json.is_array());
        let back: Roster = serde_json::from_value(json).unwrap();
        assert_eq!(back, roster);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, u8),
        Rebind(u8, u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, 0u8..4).prop_map(|(c, n)| Op::Insert(c, n)),
            (0u8..4, 0u8..6).prop_map(|(n, c)| Op::Rebind(n, c)),
            (0u8..6).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn indices_stay_consistent(ops in prop::collection::vec(op(), 0..40)) {
            let names = ["Ann", "bob", "Cat", "DAN"];
            let mut roster = Roster::default();
            let mut next = 100u32;
            for op in ops {
                match op {
                    Op::Insert(_, n) => {
                        next += 1;
                        roster.insert(player(&format!("c{next}"), names[n as usize]));
                    },
                    Op::Rebind(n, _) => {
                        next += 1;
                        roster.rebind(names[n as usize], format!("c{next}"));
                    },
                    Op::Remove(c) => {
                        let id = roster.connection_ids().nth(c as usize).cloned();
                        if let Some(id) = id {
                            roster.remove_by_connection(&id);
                        }
                    },
                }
                prop_assert_eq!(roster.by_connection.len(), roster.by_name.len());
                for (id, key) in &roster.by_connection {
                    let p = roster.by_name.get(key).expect("index points at a record");
                    prop_assert_eq!(&p.id, id);
                }
            }
        }
    }
}
