use chrono::Utc;

use partyline_core::player::{Player, PlayerStatus, generate_avatar, name_key, validate_player_name};
use partyline_core::room::Room;
use partyline_core::token::issue_token;

use crate::error::RoomError;
use crate::room_manager::{PlayerTokenBinding, RoomManager};
use crate::store::StoreWrite;

/// A player's request to enter a room.
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub name: String,
    /// Avatar the player picked explicitly.
    pub avatar: Option<String>,
    pub language: Option<String>,
    /// Avatar remembered in the player's stored profile.
    pub stored_avatar: Option<String>,
}

impl JoinRequest {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room: Room,
    pub player: Player,
    /// True when a disconnected record with this name was rebound.
    pub reconnected: bool,
}

impl RoomManager {
    /// Join `code` as `conn`.
    ///
    /// A disconnected player with the same (case-insensitive) name is
    /// rebound to the new connection, keeping score and join time, even
    /// when the room is full. A connected one makes the name unavailable.
    /// Capacity only counts connected players and only gates new seats.
    pub fn join_room(
        &mut self,
        code: &str,
        conn: &str,
        request: JoinRequest,
    ) -> Result<JoinOutcome, RoomError> {
        let name = validate_player_name(&request.name).ok_or(RoomError::InvalidName)?;
        let now = Utc::now();
        let entry = self.rooms.get_mut(code).ok_or(RoomError::RoomNotFound)?;
        if entry.room.is_expired_at(now) {
            return Err(RoomError::RoomExpired);
        }

        let existing = entry
            .room
            .players
            .find_by_name(&name)
            .map(|p| (p.status, p.id.clone()));
        if matches!(existing, Some((PlayerStatus::Connected, _))) {
            return Err(RoomError::NameTaken);
        }

        let (player, reconnected, old_conn) = match existing {
            Some((_, old_id)) => {
                if let Some(ref mut session) = entry.game {
                    session.engine.migrate_player(&old_id, conn);
                }
                let player = entry
                    .room
                    .players
                    .rebind(&name, conn.to_string())
                    .ok_or(RoomError::RoomNotFound)?;
                player.status = PlayerStatus::Connected;
                player.last_seen = now;
                if request.language.is_some() {
                    player.language = request.language;
                }
                (player.clone(), true, Some(old_id))
            },
            None => {
                let room = &entry.room;
                if room.connected_count() >= usize::from(room.settings.max_players) {
                    return Err(RoomError::RoomFull);
                }
                let avatar = request
                    .avatar
                    .clone()
                    .or(request.stored_avatar)
                    .unwrap_or_else(|| generate_avatar(&room.settings.avatar_style));
                let player = Player::new(
                    conn.to_string(),
                    name.clone(),
                    avatar,
                    request.language,
                    now,
                );
                entry.room.players.insert(player.clone());
                if let Some(ref mut session) = entry.game {
                    session.engine.add_player(conn, &name);
                }
                (player, false, None)
            },
        };

        if let Some(old) = old_conn {
            self.player_rooms.remove(&old);
        }
        self.player_rooms.insert(conn.to_string(), code.to_string());
        if !reconnected && let Some(avatar) = request.avatar {
            self.persist(StoreWrite::UpsertProfileAvatar {
                player_name: name.clone(),
                avatar,
            });
        }
        self.update_room_expiry_on_activity(code);

        tracing::info!(room = code, player = %name, reconnected, "Player joined");
        let room = self
            .get_room(code)
            .cloned()
            .ok_or(RoomError::RoomNotFound)?;
        Ok(JoinOutcome {
            room,
            player,
            reconnected,
        })
    }

    /// Handle a connection leaving. Host connections are disconnect-marked
    /// or end the room; players are disconnect-marked or removed outright.
    /// Returns the affected room, or `None` for an unknown connection.
    pub fn leave_room(&mut self, conn: &str, mark_disconnected: bool) -> Option<String> {
        if let Some(code) = self.get_room_by_host(conn).map(|r| r.code.clone()) {
            if mark_disconnected {
                self.mark_host_disconnected(&code);
            } else {
                self.delete_room(&code);
            }
            return Some(code);
        }

        let code = self.player_rooms.get(conn)?.clone();
        let entry = self.rooms.get_mut(&code)?;
        if mark_disconnected {
            let player = entry.room.players.get_mut(conn)?;
            player.status = PlayerStatus::Disconnected;
            player.last_seen = Utc::now();
            tracing::info!(room = %code, player = %player.name, "Player disconnected");
        } else {
            let player = entry.room.players.remove_by_connection(conn)?;
            self.player_rooms.remove(conn);
            let key = (code.clone(), name_key(&player.name));
            if let Some(token) = self.player_token_index.remove(&key) {
                self.player_tokens.remove(&token);
            }
            tracing::info!(room = %code, player = %player.name, "Player left");
        }
        self.update_room_expiry_on_activity(&code);
        Some(code)
    }

    /// Issue the reconnection token for `name` in `code`. Repeated calls
    /// from the same connection return the same token; issuing from another
    /// connection replaces it.
    pub fn issue_player_token(&mut self, code: &str, conn: &str, name: &str) -> Option<String> {
        let player = self.rooms.get(code)?.room.players.find_by_name(name)?;
        let key = (code.to_string(), name_key(&player.name));

        if let Some(token) = self.player_token_index.get(&key)
            && self
                .player_tokens
                .get(token)
                .is_some_and(|binding| binding.conn == conn)
        {
            return Some(token.clone());
        }

        let token = issue_token();
        if let Some(previous) = self.player_token_index.insert(key.clone(), token.clone()) {
            self.player_tokens.remove(&previous);
        }
        self.player_tokens.insert(
            token.clone(),
            PlayerTokenBinding {
                room_code: key.0,
                name_key: key.1,
                conn: conn.to_string(),
            },
        );
        Some(token)
    }

    /// Reattach a player to a new connection using their token. The live
    /// engine's bookkeeping follows the player to the new connection id.
    pub fn replace_player_socket_with_token(
        &mut self,
        code: &str,
        token: &str,
        new_conn: &str,
        language: Option<String>,
    ) -> Option<Player> {
        let binding = self.player_tokens.get(token)?;
        if binding.room_code != code {
            return None;
        }
        let name_key = binding.name_key.clone();

        let entry = self.rooms.get_mut(code)?;
        let old_conn = entry.room.players.find_by_name(&name_key)?.id.clone();
        if old_conn != new_conn
            && let Some(ref mut session) = entry.game
        {
            session.engine.migrate_player(&old_conn, new_conn);
        }
        let player = entry.room.players.rebind(&name_key, new_conn.to_string())?;
        player.status = PlayerStatus::Connected;
        player.last_seen = Utc::now();
        if language.is_some() {
            player.language = language;
        }
        let player = player.clone();

        self.player_rooms.remove(&old_conn);
        self.player_rooms
            .insert(new_conn.to_string(), code.to_string());
        if let Some(binding) = self.player_tokens.get_mut(token) {
            binding.conn = new_conn.to_string();
        }
        self.update_room_expiry_on_activity(code);

        tracing::info!(room = code, player = %player.name, "Player reconnected with token");
        Some(player)
    }

    /// Push a restored cumulative total into the live engine.
    pub fn restore_player_score_in_game(&mut self, code: &str, conn: &str, score: i64) -> bool {
        let Some(entry) = self.rooms.get_mut(code) else {
            return false;
        };
        let Some(ref mut session) = entry.game else {
            return false;
        };
        session.engine.set_player_score(conn, score);
        if let Some(player) = entry.room.players.get_mut(conn) {
            player.score = score;
        }
        true
    }

    pub fn player_room(&self, conn: &str) -> Option<&str> {
        self.player_rooms.get(conn).map(String::as_str)
    }

    pub fn get_player(&self, code: &str, conn: &str) -> Option<&Player> {
        self.rooms.get(code)?.room.players.get(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room_manager::tests::manager_with_room;
    use proptest::prelude::*;

    #[test]
    fn join_then_same_name_other_case_is_taken() {
        let (mut mgr, code) = manager_with_room();
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        let err = mgr
            .join_room(&code, "p2", JoinRequest::named("bob"))
            .unwrap_err();
        assert_eq!(err, RoomError::NameTaken);
    }

    #[test]
    fn disconnected_name_rejoins_as_reconnection() {
        let (mut mgr, code) = manager_with_room();
        let first = mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        mgr.rooms
            .get_mut(&code)
            .unwrap()
            .room
            .players
            .get_mut("p1")
            .unwrap()
            .score = 42;

        assert_eq!(mgr.leave_room("p1", true), Some(code.clone()));
        let bob = mgr.get_player(&code, "p1").unwrap();
        assert_eq!(bob.status, PlayerStatus::Disconnected);

        let again = mgr.join_room(&code, "p3", JoinRequest::named("Bob")).unwrap();
        assert!(again.reconnected);
        assert_eq!(again.player.id, "p3");
        assert_eq!(again.player.score, 42);
        assert_eq!(again.player.joined_at, first.player.joined_at);
        assert_eq!(again.player.status, PlayerStatus::Connected);
        assert_eq!(mgr.player_room("p3"), Some(code.as_str()));
        assert!(mgr.player_room("p1").is_none());
        assert_eq!(mgr.get_room(&code).unwrap().players.len(), 1);
    }

    #[test]
    fn capacity_counts_connected_players_only() {
        let (mut mgr, code) = manager_with_room();
        mgr.rooms.get_mut(&code).unwrap().room.settings.max_players = 2;
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        mgr.join_room(&code, "p2", JoinRequest::named("Carol")).unwrap();
        let err = mgr
            .join_room(&code, "p3", JoinRequest::named("Dave"))
            .unwrap_err();
        assert_eq!(err, RoomError::RoomFull);

        mgr.leave_room("p2", true);
        mgr.join_room(&code, "p3", JoinRequest::named("Dave")).unwrap();
        let err = mgr
            .join_room(&code, "p4", JoinRequest::named("Erin"))
            .unwrap_err();
        assert_eq!(err, RoomError::RoomFull);

        // A returning name keeps its seat even though Dave filled the room.
        let carol = mgr
            .join_room(&code, "p5", JoinRequest::named("Carol"))
            .unwrap();
        assert!(carol.reconnected);
        assert_eq!(carol.player.id, "p5");
        assert_eq!(mgr.get_room(&code).unwrap().connected_count(), 3);
    }

    #[test]
    fn dropped_player_rejoins_a_full_room() {
        let (mut mgr, code) = manager_with_room();
        mgr.rooms.get_mut(&code).unwrap().room.settings.max_players = 1;
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        mgr.leave_room("p1", true);
        mgr.join_room(&code, "p2", JoinRequest::named("Carol")).unwrap();

        let bob = mgr
            .join_room(&code, "p3", JoinRequest::named("Bob"))
            .unwrap();
        assert!(bob.reconnected);
        assert_eq!(mgr.player_room("p3"), Some(code.as_str()));
        assert!(mgr.player_room("p1").is_none());

        let err = mgr
            .join_room(&code, "p4", JoinRequest::named("Dave"))
            .unwrap_err();
        assert_eq!(err, RoomError::RoomFull);
    }

    #[test]
    fn join_errors() {
        let (mut mgr, code) = manager_with_room();
        assert_eq!(
            mgr.join_room("ZZZZ", "p1", JoinRequest::named("Bob")).unwrap_err(),
            RoomError::RoomNotFound
        );
        assert_eq!(
            mgr.join_room(&code, "p1", JoinRequest::named("   ")).unwrap_err(),
            RoomError::InvalidName
        );
        assert_eq!(
            mgr.join_room(&code, "p1", JoinRequest::named(&"x".repeat(33)))
                .unwrap_err(),
            RoomError::InvalidName
        );
        mgr.rooms.get_mut(&code).unwrap().room.expires_at = Utc::now();
        assert_eq!(
            mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap_err(),
            RoomError::RoomExpired
        );
    }

    #[test]
    fn avatar_preference_order() {
        let (mut mgr, code) = manager_with_room();
        let explicit = mgr
            .join_room(
                &code,
                "p1",
                JoinRequest {
                    avatar: Some("thumbs:1".into()),
                    stored_avatar: Some("bottts:2".into()),
                    ..JoinRequest::named("Bob")
                },
            )
            .unwrap();
        assert_eq!(explicit.player.avatar, "thumbs:1");

        let stored = mgr
            .join_room(
                &code,
                "p2",
                JoinRequest {
                    stored_avatar: Some("bottts:2".into()),
                    ..JoinRequest::named("Carol")
                },
            )
            .unwrap();
        assert_eq!(stored.player.avatar, "bottts:2");

        let generated = mgr.join_room(&code, "p3", JoinRequest::named("Dave")).unwrap();
        assert!(generated.player.avatar.starts_with("bottts:"));
        assert_eq!(generated.player.avatar.len(), "bottts:".len() + 8);
    }

    #[test]
    fn explicit_leave_removes_record_and_token() {
        let (mut mgr, code) = manager_with_room();
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        let token = mgr.issue_player_token(&code, "p1", "Bob").unwrap();
        assert_eq!(mgr.leave_room("p1", false), Some(code.clone()));
        assert!(mgr.get_room(&code).unwrap().players.is_empty());
        assert!(mgr.player_room("p1").is_none());
        assert!(
            mgr.replace_player_socket_with_token(&code, &token, "p2", None)
                .is_none()
        );
    }

    #[test]
    fn unknown_connection_leave_is_a_no_op() {
        let (mut mgr, _code) = manager_with_room();
        assert_eq!(mgr.leave_room("ghost", true), None);
        assert_eq!(mgr.leave_room("ghost", false), None);
    }

    #[test]
    fn host_leave_marks_or_deletes() {
        let (mut mgr, code) = manager_with_room();
        assert_eq!(mgr.leave_room("host-1", true), Some(code.clone()));
        assert!(mgr.is_host_disconnected(&code));

        mgr.update_host_socket(&code, "host-2");
        assert_eq!(mgr.leave_room("host-2", false), Some(code.clone()));
        assert!(!mgr.room_exists(&code));
    }

    #[test]
    fn player_token_is_idempotent_per_connection() {
        let (mut mgr, code) = manager_with_room();
        mgr.join_room(&code, "p1", JoinRequest::named("Bob")).unwrap();
        let a = mgr.issue_player_token(&code, "p1", "Bob").unwrap();
        let b = mgr.issue_player_token(&code, "p1", "Bob").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        // Another connection for the same player replaces the token.
        mgr.leave_room("p1", true);
        mgr.join_room(&code, "p2", JoinRequest::named("bob")).unwrap();
        let c = mgr.issue_player_token(&code, "p2", "Bob").unwrap();
        assert_ne!(a, c);
        assert!(mgr.replace_player_socket_with_token(&code, &a, "p3", None).is_none());
        assert!(mgr.issue_player_token(&code, "p2", "Nobody").is_none());
    }

    #[test]
    fn token_reconnect_preserves_identity() {
        let (mut mgr, code) = manager_with_room();
        let joined = mgr.join_room(&code, "p1", JoinRequest::named("Alice")).unwrap();
        let token = mgr.issue_player_token(&code, "p1", "Alice").unwrap();
        mgr.rooms
            .get_mut(&code)
            .unwrap()
            .room
            .players
            .get_mut("p1")
            .unwrap()
            .score = 300;
        mgr.leave_room("p1", true);

        let player = mgr
            .replace_player_socket_with_token(&code, &token, "p9", Some("de".into()))
            .unwrap();
        assert_eq!(player.id, "p9");
        assert_eq!(player.score, 300);
        assert_eq!(player.joined_at, joined.player.joined_at);
        assert_eq!(player.language.as_deref(), Some("de"));
        assert_eq!(mgr.player_room("p9"), Some(code.as_str()));

        // The token keeps working and now follows the new connection.
        assert_eq!(mgr.issue_player_token(&code, "p9", "Alice"), Some(token.clone()));
        assert!(
            mgr.replace_player_socket_with_token("ZZZZ", &token, "p10", None)
                .is_none()
        );
        assert!(
            mgr.replace_player_socket_with_token(&code, "bogus", "p10", None)
                .is_none()
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(u8, u8),
        Drop(u8),
        Quit(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..12u8, 0..6u8).prop_map(|(c, n)| Op::Join(c, n)),
            (0..12u8).prop_map(Op::Drop),
            (0..12u8).prop_map(Op::Quit),
        ]
    }

    proptest! {
        #[test]
        fn connected_names_unique_and_capacity_held(ops in prop::collection::vec(op(), 1..60)) {
            let (mut mgr, code) = manager_with_room();
            mgr.rooms.get_mut(&code).unwrap().room.settings.max_players = 2;
            let names = ["Ann", "ann", "Ben", "BEN", "Cy", "Dee"];
            for op in ops {
                match op {
                    Op::Join(c, n) => {
                        if mgr.player_room(&format!("c{c}")).is_none() {
                            let before = mgr.get_room(&code).unwrap().connected_count();
                            let joined = mgr.join_room(
                                &code,
                                &format!("c{c}"),
                                JoinRequest::named(names[n as usize]),
                            );
                            match joined {
                                Ok(outcome) if !outcome.reconnected => {
                                    prop_assert!(before < 2);
                                },
                                Err(RoomError::RoomFull) => prop_assert!(before >= 2),
                                _ => {},
                            }
                        }
                    },
                    Op::Drop(c) => {
                        mgr.leave_room(&format!("c{c}"), true);
                    },
                    Op::Quit(c) => {
                        mgr.leave_room(&format!("c{c}"), false);
                    },
                }
                let room = mgr.get_room(&code).unwrap();
                // Rebinds may overfill a room, never beyond one seat per name.
                prop_assert!(room.connected_count() <= 4);
                let mut seen = std::collections::HashSet::new();
                for p in room.players.iter().filter(|p| p.is_connected()) {
                    prop_assert!(seen.insert(name_key(&p.name)));
                }
            }
        }
    }
}
