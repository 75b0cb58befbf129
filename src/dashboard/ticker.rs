//! Periodic duration refresh

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::session::SessionRegistry;
use crate::types::now_millis;

/// Recomputes `duration` of every active session on a fixed period
#[derive(Debug, Clone)]
pub struct DurationTicker {
    registry: Arc<SessionRegistry>,
    period: Duration,
}

impl DurationTicker {
    pub fn new(registry: Arc<SessionRegistry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Spawn the ticking task
    ///
    /// The task runs until the returned handle is stopped or dropped.
    pub fn start(self) -> TickerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        let updated = self.registry.tick_durations(now_millis());
                        if updated > 0 {
                            tracing::trace!(updated, "Durations refreshed");
                        }
                    }
                }
            }
            tracing::debug!("Duration ticker stopped");
        });

        TickerHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Owns a running [`DurationTicker`]; cancels it on drop
#[derive(Debug)]
pub struct TickerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Cancel the ticker and wait for its task to end
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = ?e, "Duration ticker task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionStatus;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_ticker_refreshes_active_durations() {
        let registry = Arc::new(SessionRegistry::new());
        let id = registry.create();
        let idle = registry.create();
        registry
            .start(&id, "t", PathBuf::from("/srv"), now_millis() - 5_000)
            .unwrap();

        let handle = DurationTicker::new(registry.clone(), Duration::from_millis(10)).start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handle.is_running());
        handle.stop().await;

        assert!(registry.get(&id).unwrap().duration >= 5_000);
        assert_eq!(registry.get(&idle).unwrap().duration, 0);
        assert_eq!(registry.status(&id), Some(SessionStatus::Running));
    }

    #[tokio::test]
    async fn test_drop_cancels_ticker() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = DurationTicker::new(registry, Duration::from_millis(10)).start();
        let token = handle.cancel.clone();
        drop(handle);
        assert!(token.is_cancelled());
    }
}
