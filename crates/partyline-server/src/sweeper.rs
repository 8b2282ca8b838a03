use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::SharedRoomManager;

/// Background task deleting expired rooms every `period`.
pub fn spawn_expiry_sweeper(rooms: SharedRoomManager, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = rooms.write().await.cleanup_expired_rooms();
            if removed > 0 {
                tracing::info!(removed, "Swept expired rooms");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::RwLock;

    use super::*;
    use crate::room_manager::RoomManager;

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_each_interval() {
        let mut mgr = RoomManager::default();
        let stale = mgr.create_room("host-1", "Alice", None).code;
        let fresh = mgr.create_room("host-2", "Bob", None).code;
        mgr.rooms.get_mut(&stale).unwrap().room.expires_at =
            Utc::now() - chrono::Duration::seconds(1);
        let rooms: SharedRoomManager = Arc::new(RwLock::new(mgr));

        let handle = spawn_expiry_sweeper(Arc::clone(&rooms), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rooms.read().await.room_exists(&stale), "no sweep before the first period");

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!rooms.read().await.room_exists(&stale));
        assert!(rooms.read().await.room_exists(&fresh));
        handle.abort();
    }
}
