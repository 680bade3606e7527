use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::sessions::SessionManager;

/// Periodically removes expired and invalidated sessions.
pub struct SessionCleanupWorker {
    sessions: SessionManager,
    interval: Duration,
    shutdown_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCleanupWorker {
    pub fn new(sessions: SessionManager, interval: Duration) -> Self {
        Self {
            sessions,
            interval,
            shutdown_token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sweep loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return;
        }

        let sessions = self.sessions.clone();
        let interval = self.interval;
        let shutdown = self.shutdown_token.clone();

        tracing::info!(interval_secs = interval.as_secs(), "Starting session cleanup worker");

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Session cleanup worker shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = sessions.cleanup_expired().await {
                            tracing::error!(error = %e, "Session cleanup failed");
                        }
                    }
                }
            }
        }));
    }

    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Session cleanup worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientContext;
    use crate::services::AuditLedger;
    use crate::store::MemoryStore;
    use crate::utils::ManualClock;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_worker_sweeps_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let ledger = AuditLedger::new(store.clone(), clock.clone());
        let sessions =
            SessionManager::new(store, ledger, clock.clone(), chrono::Duration::minutes(30));

        let session = sessions
            .create(Uuid::new_v4(), &ClientContext::default())
            .await
            .unwrap();
        clock.advance(chrono::Duration::hours(1));

        let worker = SessionCleanupWorker::new(sessions.clone(), Duration::from_millis(10));
        worker.start();
        worker.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.shutdown().await;

        assert!(sessions
            .validate_and_extend(&session.token)
            .await
            .unwrap()
            .is_none());
        assert_eq!(sessions.cleanup_expired().await.unwrap(), 0);
    }
}
