//! 过期会话的定期清理任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::SessionStore;
use crate::config::SESSION_PRUNE_INTERVAL_SECS;

pub fn spawn_background_tasks(sessions: Arc<SessionStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let pruned = sessions.prune_expired().await;
            if pruned > 0 {
                debug!(pruned, "expired sessions removed");
            }
        }
    });
}
