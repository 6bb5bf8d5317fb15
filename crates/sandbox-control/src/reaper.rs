//! Reconciler & Reaper (spec.md §4.6).
//!
//! Grounded on the teacher's `HeartbeatMonitor`: a config struct with a poll
//! interval and a staleness threshold, a `shutdown: Arc<Notify>` handle, and
//! a `tokio::select!` loop that checks once on startup before entering the
//! periodic cycle. Generalized from "mark one kind of stale instance" to the
//! three reap passes (idle/lifetime/heartbeat) plus the one-shot startup
//! state-sync spec.md names.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use sandbox_backend::{Backend, ContainerState};
use sandbox_core::config::DISABLED;
use sandbox_core::model::{ExecutionStatus, SessionStatus};
use sandbox_store::{ExecutionStore, SessionStore};

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub reap_interval: Duration,
    pub idle_threshold_minutes: i64,
    pub max_lifetime_hours: i64,
    pub termination_grace: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(300),
            idle_threshold_minutes: 30,
            max_lifetime_hours: 6,
            termination_grace: Duration::from_secs(10),
        }
    }
}

pub struct Reaper {
    sessions: Arc<SessionStore>,
    executions: Arc<ExecutionStore>,
    backend: Arc<dyn Backend>,
    config: ReaperConfig,
    shutdown: Arc<Notify>,
}

impl Reaper {
    pub fn new(
        sessions: Arc<SessionStore>,
        executions: Arc<ExecutionStore>,
        backend: Arc<dyn Backend>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            sessions,
            executions,
            backend,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Runs startup state-sync once, then the periodic reap loop until
    /// shutdown is signaled.
    pub async fn run(&self) {
        info!(
            reap_interval_secs = self.config.reap_interval.as_secs(),
            "reconciler starting"
        );

        if let Err(e) = self.startup_reconcile().await {
            error!(error = %e, "startup reconciliation failed");
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("reaper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.reap_interval) => {
                    if let Err(e) = self.periodic_reap().await {
                        error!(error = %e, "periodic reap failed");
                    }
                }
            }
        }

        info!("reaper stopped");
    }

    /// Runs exactly once at boot, before the server accepts traffic
    /// (spec.md §4.6): joins the backend's live container list against the
    /// session table and repairs every divergence.
    pub async fn startup_reconcile(&self) -> sandbox_store::Result<()> {
        let live_containers: HashSet<String> = self
            .backend
            .list_sandbox_containers()
            .await
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();

        let tracked = self.sessions.live_container_ids().await?;
        let tracked_containers: HashSet<String> =
            tracked.iter().map(|(_, cid)| cid.clone()).collect();

        for (session_id, container_id) in &tracked {
            let container_alive = match self.backend.inspect(container_id).await {
                Ok(status) => status.state == ContainerState::Running,
                Err(_) => false,
            };

            if !container_alive {
                warn!(session_id = %session_id, container_id = %container_id, "container gone or exited, failing session");
                self.sessions
                    .transition(*session_id, SessionStatus::Failed, |_| {})
                    .await
                    .ok();
                self.fail_running_executions(*session_id).await?;
            }
        }

        for container_id in live_containers.difference(&tracked_containers) {
            warn!(container_id = %container_id, "orphan container with no session, destroying");
            let _ = self.backend.delete(container_id, true).await;
        }

        self.reap_over_lifetime().await?;

        info!("startup reconciliation complete");
        Ok(())
    }

    async fn periodic_reap(&self) -> sandbox_store::Result<()> {
        let idle = self.reap_idle().await?;
        let lifetime = self.reap_over_lifetime().await?;
        let heartbeat = self.reap_missed_heartbeat().await?;

        if idle + lifetime + heartbeat > 0 {
            info!(idle, lifetime, heartbeat, "reap pass complete");
        } else {
            debug!("reap pass found nothing to do");
        }
        Ok(())
    }

    async fn reap_idle(&self) -> sandbox_store::Result<usize> {
        if self.config.idle_threshold_minutes == DISABLED {
            return Ok(0);
        }
        let threshold = ChronoDuration::minutes(self.config.idle_threshold_minutes);
        let idle = self.sessions.find_idle(threshold).await?;
        for session in &idle {
            self.terminate(session.id).await;
        }
        Ok(idle.len())
    }

    async fn reap_over_lifetime(&self) -> sandbox_store::Result<usize> {
        if self.config.max_lifetime_hours == DISABLED {
            return Ok(0);
        }
        let threshold = ChronoDuration::hours(self.config.max_lifetime_hours);
        let over = self.sessions.find_over_lifetime(threshold).await?;
        for session in &over {
            self.terminate(session.id).await;
        }
        Ok(over.len())
    }

    /// Executions `RUNNING` for > 2x their declared timeout with an
    /// unreachable container are marked `CRASHED` and their session
    /// terminated (spec.md §4.6 heartbeat reap).
    async fn reap_missed_heartbeat(&self) -> sandbox_store::Result<usize> {
        let sessions = self
            .sessions
            .find_missed_heartbeat(ChronoDuration::seconds(10))
            .await?;

        let mut reaped = 0;
        for session in &sessions {
            let container_alive = match &session.container_id {
                Some(cid) => matches!(self.backend.inspect(cid).await, Ok(s) if s.state == ContainerState::Running),
                None => false,
            };
            if container_alive {
                continue;
            }
            self.fail_running_executions(session.id).await?;
            self.terminate(session.id).await;
            reaped += 1;
        }
        Ok(reaped)
    }

    async fn fail_running_executions(&self, session_id: sandbox_core::ids::SessionId) -> sandbox_store::Result<()> {
        for execution in self.executions.find_active_for_session(session_id).await? {
            self.executions
                .complete(
                    execution.id,
                    ExecutionStatus::Crashed,
                    None,
                    Some("session reaped: container unreachable".to_string()),
                    None,
                    None,
                    Vec::new(),
                    None,
                    None,
                )
                .await?;
        }
        Ok(())
    }

    /// Persist-intent-then-act ordering from spec.md §5: mark TERMINATED
    /// first, then best-effort delete the container with the configured
    /// grace period.
    async fn terminate(&self, session_id: sandbox_core::ids::SessionId) {
        let session = match self
            .sessions
            .transition(session_id, SessionStatus::Terminated, |s| {
                s.completed_at = Some(chrono::Utc::now());
            })
            .await
        {
            Ok(s) => s,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "could not transition to TERMINATED (already terminal?)");
                return;
            }
        };

        if let Some(container_id) = session.container_id {
            let grace = self.config.termination_grace.as_secs() as u32;
            if let Err(e) = self.backend.stop(&container_id, grace).await {
                warn!(container_id = %container_id, error = %e, "best-effort stop failed");
            }
            let _ = self.backend.delete(&container_id, false).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sentinel_skips_idle_reap() {
        let config = ReaperConfig {
            idle_threshold_minutes: DISABLED,
            ..Default::default()
        };
        assert_eq!(config.idle_threshold_minutes, -1);
    }
}
