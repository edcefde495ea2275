//! Periodic keep-alive for a gateway session
//!
//! Transport failures are retried on the next tick. A reply carrying an
//! explicit error means the gateway dropped the session; the loop ends and
//! the reason is reported to whoever watches `ended`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::SignalingGateway;
use crate::types::SessionId;

pub struct KeepAlive {
    session: SessionId,
    task: JoinHandle<()>,
    ended: watch::Receiver<Option<String>>,
}

impl KeepAlive {
    pub fn spawn(gateway: Arc<dyn SignalingGateway>, session: SessionId, interval: Duration) -> Self {
        let (ended_tx, ended) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match gateway.keep_alive(session).await {
                    Ok(ack) => {
                        if let Some(reason) = ack.error {
                            log::warn!("Gateway ended session {}: {}", session, reason);
                            ended_tx.send_replace(Some(reason));
                            break;
                        }
                        log::trace!("Keep-alive acknowledged for session {}", session);
                    }
                    Err(e) => log::warn!("Keep-alive for session {} failed: {}", session, e),
                }
            }
        });

        Self {
            session,
            task,
            ended,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// A watcher that resolves when the gateway ends the session
    pub fn watch_end(&self) -> KeepAliveEnd {
        KeepAliveEnd {
            ended: self.ended.clone(),
        }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct KeepAliveEnd {
    ended: watch::Receiver<Option<String>>,
}

impl KeepAliveEnd {
    /// The gateway's reason when it ended the session remotely, or `None`
    /// once the keep-alive was cancelled locally.
    pub async fn wait(mut self) -> Option<String> {
        let reason = match self.ended.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;

    #[tokio::test(start_paused = true)]
    async fn test_reports_remote_end() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_keep_alive_after(2, "session expired");

        let keepalive = KeepAlive::spawn(gateway.clone(), SessionId(7), Duration::from_secs(25));
        let reason = keepalive.watch_end().wait().await;

        assert_eq!(reason.as_deref(), Some("session expired"));
        assert_eq!(gateway.keep_alive_count(), 3);
        tokio::task::yield_now().await;
        assert!(!keepalive.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_watchers_with_none() {
        let gateway = Arc::new(FakeGateway::new());
        let keepalive = KeepAlive::spawn(gateway.clone(), SessionId(7), Duration::from_secs(25));
        let end = keepalive.watch_end();

        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(keepalive);

        assert_eq!(end.wait().await, None);
        assert_eq!(gateway.keep_alive_count(), 2);
    }
}
