use partyline_core::room::Room;
use partyline_core::token::issue_token;

use crate::room_manager::RoomManager;

impl RoomManager {
    /// Issue a fresh host token for `code`, invalidating any previous one.
    pub fn issue_host_token(&mut self, code: &str) -> String {
        let token = issue_token();
        self.install_host_token(code, token.clone());
        token
    }

    /// Bind `token` as the host token of `code`. The previous token, if any,
    /// stops resolving.
    pub fn install_host_token(&mut self, code: &str, token: String) {
        if let Some(previous) = self.room_host_tokens.insert(code.to_string(), token.clone()) {
            self.host_tokens.remove(&previous);
        }
        self.host_tokens.insert(token, code.to_string());
    }

    pub fn host_token(&self, code: &str) -> Option<&str> {
        self.room_host_tokens.get(code).map(String::as_str)
    }

    pub fn room_for_host_token(&self, token: &str) -> Option<&str> {
        self.host_tokens.get(token).map(String::as_str)
    }

    /// Point the room's host at a new connection and mark it present.
    pub fn update_host_socket(&mut self, code: &str, new_conn: &str) -> bool {
        let Some(entry) = self.rooms.get_mut(code) else {
            return false;
        };
        let room = &mut entry.room;
        if room.host_id != new_conn {
            tracing::info!(
                room = code,
                old = %room.host_id,
                new = new_conn,
                "Host socket replaced"
            );
        }
        room.host_id = new_conn.to_string();
        room.host_disconnected = false;
        self.update_room_expiry_on_activity(code);
        true
    }

    pub fn is_host_disconnected(&self, code: &str) -> bool {
        self.rooms
            .get(code)
            .is_some_and(|e| e.room.host_disconnected)
    }

    /// The host's transport dropped. The room stays; only its TTL changes.
    pub fn mark_host_disconnected(&mut self, code: &str) {
        let Some(entry) = self.rooms.get_mut(code) else {
            return;
        };
        entry.room.host_disconnected = true;
        tracing::info!(room = code, "Host disconnected");
        self.update_room_expiry_on_activity(code);
    }

    pub fn is_host(&self, code: &str, conn: &str) -> bool {
        self.rooms.get(code).is_some_and(|e| e.room.host_id == conn)
    }

    /// Host reconnection against live rooms only. `None` means the token is
    /// unknown here and the store should be consulted.
    pub fn reconnect_host_local(&mut self, token: &str, new_conn: &str) -> Option<Room> {
        let code = self.room_for_host_token(token)?.to_string();
        self.update_host_socket(&code, new_conn);
        self.get_room(&code).cloned()
    }
}

#[cfg(test)]
mod tests {
    use crate::room_manager::tests::manager_with_room;

    #[test]
    fn reissuing_invalidates_previous_token() {
        let (mut mgr, code) = manager_with_room();
        let first = mgr.host_token(&code).unwrap().to_string();
        let second = mgr.issue_host_token(&code);
        assert_ne!(first, second);
        assert!(mgr.room_for_host_token(&first).is_none());
        assert_eq!(mgr.room_for_host_token(&second), Some(code.as_str()));
    }

    #[test]
    fn host_reconnect_rebinds_and_clears_flag() {
        let (mut mgr, code) = manager_with_room();
        let token = mgr.host_token(&code).unwrap().to_string();
        mgr.mark_host_disconnected(&code);
        assert!(mgr.is_host_disconnected(&code));

        let room = mgr.reconnect_host_local(&token, "host-2").unwrap();
        assert_eq!(room.code, code);
        assert_eq!(room.host_id, "host-2");
        assert!(!room.host_disconnected);
        assert!(mgr.is_host(&code, "host-2"));
        assert!(!mgr.is_host(&code, "host-1"));
        assert!(mgr.reconnect_host_local("not-a-token", "host-3").is_none());
    }

    #[test]
    fn disconnect_mark_keeps_room() {
        let (mut mgr, code) = manager_with_room();
        mgr.mark_host_disconnected(&code);
        assert!(mgr.room_exists(&code));
        assert!(mgr.host_token(&code).is_some());
        mgr.mark_host_disconnected("ZZZZ");
        assert!(!mgr.is_host_disconnected("ZZZZ"));
        assert!(!mgr.update_host_socket("ZZZZ", "host-9"));
    }
}
