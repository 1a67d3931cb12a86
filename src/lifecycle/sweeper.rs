use super::SessionService;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::error;

/// Periodically deletes sessions past the retention window.
pub fn spawn_session_sweeper(
    service: Arc<SessionService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            if let Err(err) = service.sweep_expired().await {
                error!(error = ?err, "session sweep failed");
            }
        }
    })
}
